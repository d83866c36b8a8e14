use std::fmt::{Display, Formatter};

mod constants {
    pub(crate) const READ_COILS: u8 = 1;
    pub(crate) const READ_DISCRETE_INPUTS: u8 = 2;
    pub(crate) const READ_HOLDING_REGISTERS: u8 = 3;
    pub(crate) const READ_INPUT_REGISTERS: u8 = 4;
    pub(crate) const WRITE_SINGLE_COIL: u8 = 5;
    pub(crate) const WRITE_SINGLE_REGISTER: u8 = 6;
}

/// Function codes understood by the simulator and the test client
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
#[repr(u8)]
pub enum FunctionCode {
    /// Read Coils (0x01)
    ReadCoils = constants::READ_COILS,
    /// Read Discrete Inputs (0x02)
    ReadDiscreteInputs = constants::READ_DISCRETE_INPUTS,
    /// Read Holding Registers (0x03)
    ReadHoldingRegisters = constants::READ_HOLDING_REGISTERS,
    /// Read Input Registers (0x04)
    ReadInputRegisters = constants::READ_INPUT_REGISTERS,
    /// Write Single Coil (0x05)
    WriteSingleCoil = constants::WRITE_SINGLE_COIL,
    /// Write Single Register (0x06)
    WriteSingleRegister = constants::WRITE_SINGLE_REGISTER,
}

impl Display for FunctionCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self {
            FunctionCode::ReadCoils => write!(f, "READ COILS ({:#04X})", self.get_value()),
            FunctionCode::ReadDiscreteInputs => {
                write!(f, "READ DISCRETE INPUTS ({:#04X})", self.get_value())
            }
            FunctionCode::ReadHoldingRegisters => {
                write!(f, "READ HOLDING REGISTERS ({:#04X})", self.get_value())
            }
            FunctionCode::ReadInputRegisters => {
                write!(f, "READ INPUT REGISTERS ({:#04X})", self.get_value())
            }
            FunctionCode::WriteSingleCoil => {
                write!(f, "WRITE SINGLE COIL ({:#04X})", self.get_value())
            }
            FunctionCode::WriteSingleRegister => {
                write!(f, "WRITE SINGLE REGISTER ({:#04X})", self.get_value())
            }
        }
    }
}

impl FunctionCode {
    /// raw value of the function code
    pub const fn get_value(self) -> u8 {
        self as u8
    }

    /// function code used in an exception response to this function
    pub const fn as_error(self) -> u8 {
        self.get_value() | crate::constants::EXCEPTION_FLAG
    }

    /// look up a supported function code
    pub fn get(value: u8) -> Option<Self> {
        match value {
            constants::READ_COILS => Some(FunctionCode::ReadCoils),
            constants::READ_DISCRETE_INPUTS => Some(FunctionCode::ReadDiscreteInputs),
            constants::READ_HOLDING_REGISTERS => Some(FunctionCode::ReadHoldingRegisters),
            constants::READ_INPUT_REGISTERS => Some(FunctionCode::ReadInputRegisters),
            constants::WRITE_SINGLE_COIL => Some(FunctionCode::WriteSingleCoil),
            constants::WRITE_SINGLE_REGISTER => Some(FunctionCode::WriteSingleRegister),
            _ => None,
        }
    }

    /// true for the two single-write functions whose response echoes the request
    pub(crate) fn is_write(self) -> bool {
        matches!(
            self,
            FunctionCode::WriteSingleCoil | FunctionCode::WriteSingleRegister
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_all_supported_codes() {
        for raw in 1u8..=6 {
            let fc = FunctionCode::get(raw).unwrap();
            assert_eq!(fc.get_value(), raw);
            assert_eq!(fc.as_error(), raw | 0x80);
        }
    }

    #[test]
    fn rejects_unsupported_codes() {
        assert_eq!(FunctionCode::get(0x00), None);
        assert_eq!(FunctionCode::get(0x0F), None);
        assert_eq!(FunctionCode::get(0x10), None);
    }
}
