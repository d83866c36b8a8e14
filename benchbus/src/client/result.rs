use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::common::function::FunctionCode;
use crate::exception::ExceptionCode;
use crate::types::Indexed;

/// Values decoded from a successful response
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize))]
pub enum ResponseValues {
    /// coils or discrete inputs, one entry per requested address
    Bits(Vec<Indexed<bool>>),
    /// holding or input registers, one entry per requested address
    Registers(Vec<Indexed<u16>>),
    /// address and value echoed by a single write
    Written(Indexed<u16>),
}

impl ResponseValues {
    /// value of the bit at `address`, if this response carries it
    pub fn bit(&self, address: u16) -> Option<bool> {
        match self {
            ResponseValues::Bits(bits) => bits
                .iter()
                .find(|x| x.index == address)
                .map(|x| x.value),
            _ => None,
        }
    }

    /// value of the register at `address`, if this response carries it
    pub fn register(&self, address: u16) -> Option<u16> {
        match self {
            ResponseValues::Registers(registers) => registers
                .iter()
                .find(|x| x.index == address)
                .map(|x| x.value),
            ResponseValues::Written(x) if x.index == address => Some(x.value),
            _ => None,
        }
    }

    /// register values in address order
    pub fn register_values(&self) -> Vec<u16> {
        match self {
            ResponseValues::Registers(registers) => registers.iter().map(|x| x.value).collect(),
            ResponseValues::Written(x) => vec![x.value],
            ResponseValues::Bits(_) => Vec::new(),
        }
    }

    /// bit values in address order
    pub fn bit_values(&self) -> Vec<bool> {
        match self {
            ResponseValues::Bits(bits) => bits.iter().map(|x| x.value).collect(),
            _ => Vec::new(),
        }
    }
}

/// Outcome of one request/response exchange with the simulator
///
/// Failures of any kind (no reply, bad CRC, exception response) are recorded
/// here with `success == false` rather than returned as errors.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize))]
pub struct ModbusTestResult {
    /// function that was exercised
    pub operation: FunctionCode,
    /// true if a valid, non-exception response was decoded
    pub success: bool,
    /// request frame as written to the line
    pub request: Vec<u8>,
    /// raw bytes received, if any
    pub response: Option<Vec<u8>>,
    /// decoded values of a successful response
    pub values: Option<ResponseValues>,
    /// reason for a failure
    pub error_message: Option<String>,
    /// exception code of an exception response
    pub exception: Option<ExceptionCode>,
    /// time from writing the request to finishing the decode
    pub duration: Duration,
    /// wall-clock time the request was issued
    pub timestamp: DateTime<Utc>,
}

impl ModbusTestResult {
    pub(crate) fn new(operation: FunctionCode, request: Vec<u8>, timestamp: DateTime<Utc>) -> Self {
        Self {
            operation,
            success: false,
            request,
            response: None,
            values: None,
            error_message: None,
            exception: None,
            duration: Duration::ZERO,
            timestamp,
        }
    }

    pub(crate) fn succeed(mut self, values: ResponseValues) -> Self {
        self.success = true;
        self.values = Some(values);
        self
    }

    pub(crate) fn fail(mut self, message: impl Into<String>) -> Self {
        self.success = false;
        self.error_message = Some(message.into());
        self
    }

    pub(crate) fn refuse(mut self, ex: ExceptionCode) -> Self {
        self.exception = Some(ex);
        let code: u8 = ex.into();
        self.fail(format!("Modbus exception code: {code} ({ex})"))
    }
}

impl std::fmt::Display for ModbusTestResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = if self.success { "PASS" } else { "FAIL" };
        write!(
            f,
            "{} {} in {} ms",
            self.operation,
            status,
            self.duration.as_millis()
        )?;
        if let Some(msg) = &self.error_message {
            write!(f, " - {msg}")?;
        }
        Ok(())
    }
}
