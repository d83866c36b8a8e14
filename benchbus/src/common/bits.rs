pub(crate) fn num_bytes_for_bits(count: u16) -> usize {
    (count as usize + 7) / 8
}

/// pack bits LSB-first within each byte
pub(crate) fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; (bits.len() + 7) / 8];
    for (i, bit) in bits.iter().enumerate() {
        if *bit {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

/// unpack `count` bits from LSB-first packed bytes, ignoring padding bits
pub(crate) fn unpack_bits(bytes: &[u8], count: u16) -> Vec<bool> {
    (0..count as usize)
        .filter_map(|i| bytes.get(i / 8).map(|byte| byte & (1 << (i % 8)) != 0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calculates_number_of_bytes_needed_for_count_of_packed_bits() {
        assert_eq!(num_bytes_for_bits(7), 1);
        assert_eq!(num_bytes_for_bits(8), 1);
        assert_eq!(num_bytes_for_bits(9), 2);
        assert_eq!(num_bytes_for_bits(15), 2);
        assert_eq!(num_bytes_for_bits(16), 2);
        assert_eq!(num_bytes_for_bits(17), 3);
        assert_eq!(num_bytes_for_bits(0xFFFF), 8192); // ensure that it's free from overflow
    }

    #[test]
    fn packs_lsb_first() {
        let bits = [true, false, true, false, false, false, false, false, true];
        assert_eq!(pack_bits(&bits), vec![0x05, 0x01]);
    }

    #[test]
    fn unpacks_only_requested_count() {
        assert_eq!(
            unpack_bits(&[0xFF, 0x01], 10),
            vec![true, true, true, true, true, true, true, true, true, false]
        );
        assert_eq!(unpack_bits(&[0x01], 12).len(), 8);
    }
}
