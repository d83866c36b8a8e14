use crate::common::bits::{num_bytes_for_bits, pack_bits};
use crate::common::cursor::ReadCursor;
use crate::common::frame::{self, Frame};
use crate::common::function::FunctionCode;
use crate::constants::limits;
use crate::exception::ExceptionCode;
use crate::server::registers::RegisterSpace;
use crate::types::{coil_from_u16, AddressRange, Indexed};

/// Parse a request PDU and run it against the register space
///
/// Always produces a well-formed response frame: either the normal reply or an
/// exception frame. Framing and addressing checks happen before this point.
pub(crate) fn handle(device_id: u8, request: &Frame, registers: &mut RegisterSpace) -> Vec<u8> {
    let function = match FunctionCode::get(request.function_code) {
        Some(x) => x,
        None => {
            tracing::warn!(
                "received unknown function code: {:#04X}",
                request.function_code
            );
            return frame::exception_response(
                device_id,
                request.function_code,
                ExceptionCode::IllegalFunction,
            );
        }
    };

    match process(function, &request.payload, registers) {
        Ok(payload) => Frame::new(device_id, function.get_value(), payload).encode(),
        Err(ex) => {
            tracing::warn!("{} refused: {}", function, ex);
            frame::exception_response(device_id, function.get_value(), ex)
        }
    }
}

fn process(
    function: FunctionCode,
    payload: &[u8],
    registers: &mut RegisterSpace,
) -> Result<Vec<u8>, ExceptionCode> {
    let mut cursor = ReadCursor::new(payload);
    if cursor.len() != frame::constants::REQUEST_BODY_LENGTH {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let first = cursor
        .read_u16_be()
        .map_err(|_| ExceptionCode::IllegalDataValue)?;
    let second = cursor
        .read_u16_be()
        .map_err(|_| ExceptionCode::IllegalDataValue)?;

    match function {
        FunctionCode::ReadCoils => {
            let range = bits_range(first, second)?;
            Ok(bits_reply(registers.read_coils(range)?))
        }
        FunctionCode::ReadDiscreteInputs => {
            let range = bits_range(first, second)?;
            Ok(bits_reply(registers.read_discrete_inputs(range)?))
        }
        FunctionCode::ReadHoldingRegisters => {
            let range = registers_range(first, second)?;
            Ok(registers_reply(registers.read_holding_registers(range)?))
        }
        FunctionCode::ReadInputRegisters => {
            let range = registers_range(first, second)?;
            Ok(registers_reply(registers.read_input_registers(range)?))
        }
        FunctionCode::WriteSingleCoil => {
            let value = coil_from_u16(second).ok_or(ExceptionCode::IllegalDataValue)?;
            registers.write_coil(Indexed::new(first, value))?;
            Ok(payload.to_vec())
        }
        FunctionCode::WriteSingleRegister => {
            registers.write_holding_register(Indexed::new(first, second))?;
            Ok(payload.to_vec())
        }
    }
}

fn bits_range(start: u16, count: u16) -> Result<AddressRange, ExceptionCode> {
    limited_range(start, count, limits::MAX_READ_COILS_COUNT)
}

fn registers_range(start: u16, count: u16) -> Result<AddressRange, ExceptionCode> {
    limited_range(start, count, limits::MAX_READ_REGISTERS_COUNT)
}

fn limited_range(start: u16, count: u16, limit: u16) -> Result<AddressRange, ExceptionCode> {
    if count == 0 || count > limit {
        return Err(ExceptionCode::IllegalDataValue);
    }
    Ok(AddressRange::new(start, count))
}

fn bits_reply(bits: &[bool]) -> Vec<u8> {
    let packed = pack_bits(bits);
    let mut payload = Vec::with_capacity(1 + packed.len());
    // count is limited to 2000 bits, the byte count always fits
    payload.push(num_bytes_for_bits(bits.len() as u16) as u8);
    payload.extend(packed);
    payload
}

fn registers_reply(values: &[u16]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(1 + 2 * values.len());
    payload.push((2 * values.len()) as u8);
    for value in values {
        payload.extend_from_slice(&value.to_be_bytes());
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::frame::{address_pair, encode_request};

    const UNIT: u8 = 0x01;

    fn run(space: &mut RegisterSpace, function: u8, payload: &[u8]) -> Frame {
        let request = Frame::decode(&encode_request(UNIT, function, payload)).unwrap();
        Frame::decode(&handle(UNIT, &request, space)).unwrap()
    }

    #[test]
    fn reads_input_registers_big_endian() {
        let mut space = RegisterSpace::pcba_fixture();
        let reply = run(&mut space, 0x04, &address_pair(0, 5));
        assert_eq!(reply.function_code, 0x04);
        assert_eq!(
            reply.payload,
            vec![10, 0x0C, 0xE4, 0x13, 0x88, 0x04, 0xB0, 0x09, 0xC4, 0x07, 0x08]
        );
    }

    #[test]
    fn packs_coils_lsb_first() {
        let mut space = RegisterSpace::pcba_fixture();
        let reply = run(&mut space, 0x01, &address_pair(0, 4));
        assert_eq!(reply.payload, vec![0x01, 0b0000_0101]);

        let reply = run(&mut space, 0x02, &address_pair(0, 3));
        assert_eq!(reply.payload, vec![0x01, 0b0000_0101]);
    }

    #[test]
    fn write_single_coil_echoes_and_applies() {
        let mut space = RegisterSpace::default();
        let reply = run(&mut space, 0x05, &address_pair(5, 0xFF00));
        assert_eq!(reply.function_code, 0x05);
        assert_eq!(reply.payload, address_pair(5, 0xFF00));
        assert_eq!(space.coil(5), Some(true));

        run(&mut space, 0x05, &address_pair(5, 0x0000));
        assert_eq!(space.coil(5), Some(false));
    }

    #[test]
    fn rejects_invalid_coil_value() {
        let mut space = RegisterSpace::default();
        let reply = run(&mut space, 0x05, &address_pair(5, 0x1234));
        assert_eq!(reply.function_code, 0x85);
        assert_eq!(reply.exception(), Some(ExceptionCode::IllegalDataValue));
        assert_eq!(space.coil(5), Some(false));
    }

    #[test]
    fn write_single_register_echoes_and_applies() {
        let mut space = RegisterSpace::default();
        let reply = run(&mut space, 0x06, &address_pair(0, 2));
        assert_eq!(reply.payload, address_pair(0, 2));
        assert_eq!(space.holding_register(0), Some(2));
    }

    #[test]
    fn out_of_range_reads_are_illegal_addresses() {
        let mut space = RegisterSpace::default();
        let reply = run(&mut space, 0x03, &address_pair(995, 10));
        assert_eq!(reply.function_code, 0x83);
        assert_eq!(reply.exception(), Some(ExceptionCode::IllegalDataAddress));

        let reply = run(&mut space, 0x06, &address_pair(1000, 1));
        assert_eq!(reply.exception(), Some(ExceptionCode::IllegalDataAddress));

        let reply = run(&mut space, 0x01, &address_pair(0xFFFF, 2));
        assert_eq!(reply.exception(), Some(ExceptionCode::IllegalDataAddress));
    }

    #[test]
    fn bad_counts_are_illegal_values() {
        let mut space = RegisterSpace::default();
        for (function, count) in [(0x03, 0), (0x03, 126), (0x01, 2001)] {
            let reply = run(&mut space, function, &address_pair(0, count));
            assert_eq!(reply.exception(), Some(ExceptionCode::IllegalDataValue));
        }
    }

    #[test]
    fn truncated_body_is_illegal_value() {
        let mut space = RegisterSpace::default();
        let reply = run(&mut space, 0x03, &[0x00, 0x00, 0x00]);
        assert_eq!(reply.exception(), Some(ExceptionCode::IllegalDataValue));
    }

    #[test]
    fn unknown_function_is_illegal_function() {
        let mut space = RegisterSpace::default();
        let reply = run(&mut space, 0x10, &[0x00, 0x00, 0x00, 0x01, 0x02, 0x00, 0x01]);
        assert_eq!(reply.function_code, 0x90);
        assert_eq!(reply.exception(), Some(ExceptionCode::IllegalFunction));
    }
}
