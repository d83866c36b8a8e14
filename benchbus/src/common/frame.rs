use crate::common::function::FunctionCode;
use crate::decode::FrameDecodeLevel;
use crate::error::ProtocolError;
use crate::exception::ExceptionCode;

pub(crate) mod constants {
    pub(crate) const HEADER_LENGTH: usize = 1;
    pub(crate) const FUNCTION_CODE_LENGTH: usize = 1;
    pub(crate) const CRC_LENGTH: usize = 2;
    pub(crate) const MIN_FRAME_LENGTH: usize = HEADER_LENGTH + FUNCTION_CODE_LENGTH + CRC_LENGTH;
    /// length of an exception response: header, function, exception code, crc
    pub(crate) const EXCEPTION_FRAME_LENGTH: usize = MIN_FRAME_LENGTH + 1;
    /// address/count or address/value pair carried by every supported request
    pub(crate) const REQUEST_BODY_LENGTH: usize = 4;
    pub(crate) const MAX_FRAME_LENGTH: usize = 256;
}

/// precomputes the CRC table as a constant!
const CRC: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_MODBUS);

/// CRC16/MODBUS (poly 0xA001 reflected, seed 0xFFFF) over `data`
pub fn crc16(data: &[u8]) -> u16 {
    CRC.checksum(data)
}

/// A decoded Modbus RTU frame
///
/// On the wire: `[slave_id][function_code][payload...][crc lsb][crc msb]`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// address of the slave the frame is to or from
    pub slave_id: u8,
    /// raw function code, including the exception flag on exception responses
    pub function_code: u8,
    /// PDU body following the function code
    pub payload: Vec<u8>,
    /// CRC16 over the address, function code and payload
    pub crc: u16,
}

impl Frame {
    /// build a frame and compute its CRC
    pub fn new(slave_id: u8, function_code: u8, payload: Vec<u8>) -> Self {
        let mut digest = CRC.digest();
        digest.update(&[slave_id, function_code]);
        digest.update(&payload);
        Self {
            slave_id,
            function_code,
            payload,
            crc: digest.finalize(),
        }
    }

    /// serialize to wire bytes with the little-endian CRC appended
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(constants::MIN_FRAME_LENGTH + self.payload.len());
        bytes.push(self.slave_id);
        bytes.push(self.function_code);
        bytes.extend_from_slice(&self.payload);
        bytes.extend_from_slice(&self.crc.to_le_bytes());
        bytes
    }

    /// parse wire bytes, validating the trailing CRC
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < constants::MIN_FRAME_LENGTH {
            return Err(ProtocolError::TooShort(bytes.len()));
        }

        let (body, crc) = bytes.split_at(bytes.len() - constants::CRC_LENGTH);
        let received = u16::from_le_bytes([crc[0], crc[1]]);
        let expected = crc16(body);
        if received != expected {
            return Err(ProtocolError::CrcMismatch { received, expected });
        }

        Ok(Self {
            slave_id: body[0],
            function_code: body[1],
            payload: body[2..].to_vec(),
            crc: received,
        })
    }

    /// true if the function code carries the exception flag
    pub fn is_exception(&self) -> bool {
        self.function_code & crate::constants::EXCEPTION_FLAG != 0
    }

    /// exception code of an exception response
    pub fn exception(&self) -> Option<ExceptionCode> {
        if !self.is_exception() {
            return None;
        }
        self.payload.first().map(|x| ExceptionCode::from(*x))
    }
}

/// encode a request frame, appending the little-endian CRC
pub fn encode_request(slave_id: u8, function_code: u8, payload: &[u8]) -> Vec<u8> {
    Frame::new(slave_id, function_code, payload.to_vec()).encode()
}

/// recompute the CRC over all but the last two bytes and compare it to the trailing value
pub fn verify(frame_bytes: &[u8]) -> bool {
    if frame_bytes.len() < constants::MIN_FRAME_LENGTH {
        return false;
    }
    let (body, crc) = frame_bytes.split_at(frame_bytes.len() - constants::CRC_LENGTH);
    crc16(body) == u16::from_le_bytes([crc[0], crc[1]])
}

/// encode an exception response for `function_code`
pub fn exception_response(slave_id: u8, function_code: u8, ex: ExceptionCode) -> Vec<u8> {
    Frame::new(
        slave_id,
        function_code | crate::constants::EXCEPTION_FLAG,
        vec![ex.into()],
    )
    .encode()
}

/// encode an address + count/value request body
pub(crate) fn address_pair(first: u16, second: u16) -> Vec<u8> {
    let mut body = Vec::with_capacity(constants::REQUEST_BODY_LENGTH);
    body.extend_from_slice(&first.to_be_bytes());
    body.extend_from_slice(&second.to_be_bytes());
    body
}

/// Total length of the response frame at the front of `buffer`, once enough of
/// the header has arrived to tell
pub(crate) fn expected_response_len(buffer: &[u8]) -> Option<usize> {
    let function = *buffer.get(1)?;
    if function & crate::constants::EXCEPTION_FLAG != 0 {
        return Some(constants::EXCEPTION_FRAME_LENGTH);
    }
    match FunctionCode::get(function) {
        Some(fc) if fc.is_write() => {
            Some(constants::MIN_FRAME_LENGTH + constants::REQUEST_BODY_LENGTH)
        }
        Some(_) => {
            let byte_count = *buffer.get(2)? as usize;
            Some(constants::MIN_FRAME_LENGTH + 1 + byte_count)
        }
        // can't size an unknown function, fall back to what is buffered
        None => None,
    }
}

pub(crate) struct RtuDisplay<'a> {
    level: FrameDecodeLevel,
    frame: &'a Frame,
}

impl<'a> RtuDisplay<'a> {
    pub(crate) fn new(level: FrameDecodeLevel, frame: &'a Frame) -> Self {
        RtuDisplay { level, frame }
    }
}

impl std::fmt::Display for RtuDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "unit: {:#04X} fc: {:#04X} crc: {:#06X} (payload len = {})",
            self.frame.slave_id,
            self.frame.function_code,
            self.frame.crc,
            self.frame.payload.len(),
        )?;
        if self.level.payload_enabled() {
            crate::common::phys::format_bytes(f, &self.frame.payload)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNIT_ID: u8 = 0x2A;

    const READ_COILS_REQUEST: &[u8] = &[
        UNIT_ID, // unit id
        0x01,    // function code
        0x00, 0x10, // starting address
        0x00, 0x13, // qty of outputs
        0x7A, 0x19, // crc
    ];

    const READ_HOLDING_REGISTERS_RESPONSE: &[u8] = &[
        UNIT_ID, // unit id
        0x03,    // function code
        0x06,    // byte count
        0x12, 0x34, 0x56, 0x78, 0x23, 0x45, // register values
        0x30, 0x60, // crc
    ];

    const WRITE_SINGLE_COIL_REQUEST: &[u8] = &[
        UNIT_ID, // unit id
        0x05,    // function code
        0x00, 0x10, // output address
        0xFF, 0x00, // output value
        0x8B, 0xE4, // crc
    ];

    #[test]
    fn crc_matches_reference_vector() {
        let crc = crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A]);
        // transmitted as C5 CD
        assert_eq!(crc.to_le_bytes(), [0xC5, 0xCD]);
    }

    #[test]
    fn crc_matches_bitwise_definition() {
        fn bitwise(data: &[u8]) -> u16 {
            let mut crc: u16 = 0xFFFF;
            for byte in data {
                crc ^= *byte as u16;
                for _ in 0..8 {
                    crc = if crc & 0x0001 != 0 {
                        (crc >> 1) ^ 0xA001
                    } else {
                        crc >> 1
                    };
                }
            }
            crc
        }

        for sample in [
            READ_COILS_REQUEST,
            READ_HOLDING_REGISTERS_RESPONSE,
            WRITE_SINGLE_COIL_REQUEST,
        ] {
            let body = &sample[..sample.len() - 2];
            assert_eq!(crc16(body), bitwise(body));
        }
    }

    #[test]
    fn encodes_known_frames() {
        assert_eq!(
            encode_request(UNIT_ID, 0x01, &address_pair(0x10, 0x13)),
            READ_COILS_REQUEST
        );
        assert_eq!(
            encode_request(UNIT_ID, 0x05, &address_pair(0x10, 0xFF00)),
            WRITE_SINGLE_COIL_REQUEST
        );
    }

    #[test]
    fn decode_recovers_encoded_fields() {
        let payload = vec![0x00, 0x01, 0xAB, 0xCD, 0xEF];
        let bytes = encode_request(0x11, 0x03, &payload);
        let frame = Frame::decode(&bytes).unwrap();
        assert_eq!(frame.slave_id, 0x11);
        assert_eq!(frame.function_code, 0x03);
        assert_eq!(frame.payload, payload);
        assert!(verify(&bytes));
    }

    #[test]
    fn decodes_response_with_byte_count() {
        let frame = Frame::decode(READ_HOLDING_REGISTERS_RESPONSE).unwrap();
        assert_eq!(frame.slave_id, UNIT_ID);
        assert_eq!(frame.payload[0], 6);
        assert_eq!(frame.crc, 0x6030);
    }

    #[test]
    fn fails_on_wrong_crc() {
        let mut bytes = READ_COILS_REQUEST.to_vec();
        bytes[6] = 0xFF;
        bytes[7] = 0xFF;
        assert!(!verify(&bytes));
        assert_eq!(
            Frame::decode(&bytes),
            Err(ProtocolError::CrcMismatch {
                received: 0xFFFF,
                expected: 0x197A
            })
        );
    }

    #[test]
    fn fails_on_short_frame() {
        assert_eq!(Frame::decode(&[0x01, 0x03, 0x00]), Err(ProtocolError::TooShort(3)));
        assert!(!verify(&[0x01]));
    }

    #[test]
    fn builds_exception_responses() {
        let bytes = exception_response(0x01, 0x03, ExceptionCode::IllegalDataAddress);
        assert_eq!(bytes.len(), constants::EXCEPTION_FRAME_LENGTH);
        let frame = Frame::decode(&bytes).unwrap();
        assert!(frame.is_exception());
        assert_eq!(frame.function_code, 0x83);
        assert_eq!(frame.exception(), Some(ExceptionCode::IllegalDataAddress));
    }

    #[test]
    fn sizes_responses_from_their_header() {
        assert_eq!(expected_response_len(&[UNIT_ID]), None);
        assert_eq!(expected_response_len(&[UNIT_ID, 0x83]), Some(5));
        assert_eq!(expected_response_len(&[UNIT_ID, 0x05]), Some(8));
        assert_eq!(expected_response_len(&[UNIT_ID, 0x03]), None);
        assert_eq!(
            expected_response_len(READ_HOLDING_REGISTERS_RESPONSE),
            Some(READ_HOLDING_REGISTERS_RESPONSE.len())
        );
        assert_eq!(expected_response_len(&[UNIT_ID, 0x2B, 0x00]), None);
    }
}
