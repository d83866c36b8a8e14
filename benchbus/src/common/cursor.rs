use crate::error::ProtocolError;

/// read-only cursor over a PDU body
pub(crate) struct ReadCursor<'a> {
    src: &'a [u8],
}

impl<'a> ReadCursor<'a> {
    pub(crate) fn new(src: &'a [u8]) -> ReadCursor<'a> {
        ReadCursor { src }
    }

    pub(crate) fn len(&self) -> usize {
        self.src.len()
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        match self.src.split_first() {
            Some((first, rest)) => {
                self.src = rest;
                Ok(*first)
            }
            None => Err(ProtocolError::BadPayloadLength {
                expected: 1,
                actual: 0,
            }),
        }
    }

    pub(crate) fn read_u16_be(&mut self) -> Result<u16, ProtocolError> {
        let high = self.read_u8()?;
        let low = self.read_u8()?;
        Ok((high as u16) << 8 | (low as u16))
    }

    pub(crate) fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], ProtocolError> {
        match (self.src.get(0..count), self.src.get(count..)) {
            (Some(first), Some(rest)) => {
                self.src = rest;
                Ok(first)
            }
            _ => Err(ProtocolError::ByteCountMismatch {
                count,
                expected: self.src.len(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_big_endian_values() {
        let mut cursor = ReadCursor::new(&[0x12, 0x34, 0xAB]);
        assert_eq!(cursor.read_u16_be().unwrap(), 0x1234);
        assert_eq!(cursor.len(), 1);
        assert_eq!(cursor.read_u8().unwrap(), 0xAB);
        assert_eq!(cursor.len(), 0);
        assert!(cursor.read_u8().is_err());
    }

    #[test]
    fn refuses_to_read_past_the_end() {
        let mut cursor = ReadCursor::new(&[0x01, 0x02]);
        assert!(cursor.read_bytes(3).is_err());
        assert_eq!(cursor.read_bytes(2).unwrap(), &[0x01, 0x02]);
    }
}
