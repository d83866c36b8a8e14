use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::common::bits::{num_bytes_for_bits, unpack_bits};
use crate::common::cursor::ReadCursor;
use crate::common::frame::{self, constants, Frame, RtuDisplay};
use crate::common::function::FunctionCode;
use crate::common::phys::PhysLayer;
use crate::decode::DecodeLevel;
use crate::error::{ConnectionError, ProtocolError};
use crate::serial::SerialSettings;
use crate::types::{AddressRange, Indexed};

mod result;
mod suite;

pub use result::*;
pub use suite::*;

/// Configuration of a [`TestClient`]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// unit id requests are addressed to
    pub device_id: u8,
    /// how long to wait for a complete response
    pub timeout: Duration,
    /// decode level for logging
    pub decode: DecodeLevel,
    /// how many results the client keeps, oldest dropped first
    pub max_results: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            device_id: 1,
            timeout: Duration::from_secs(1),
            decode: DecodeLevel::default(),
            max_results: 10_000,
        }
    }
}

impl ClientConfig {
    /// default configuration addressing `device_id`
    pub fn new(device_id: u8) -> Self {
        Self {
            device_id,
            ..Self::default()
        }
    }

    /// set the response timeout
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    /// set how many results are kept
    pub fn with_max_results(self, max_results: usize) -> Self {
        Self {
            max_results,
            ..self
        }
    }
}

enum Endpoint {
    Serial {
        path: String,
        settings: SerialSettings,
    },
    // a loopback channel is parked here while the client is disconnected
    Loopback(Option<PhysLayer>),
}

/// Modbus RTU master that exercises the simulator and records every exchange
///
/// Requests are strictly sequential: each call writes one request and waits
/// for its response (or the timeout) before returning.
pub struct TestClient {
    endpoint: Endpoint,
    phys: Option<PhysLayer>,
    config: ClientConfig,
    results: VecDeque<ModbusTestResult>,
}

impl std::fmt::Debug for TestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestClient")
            .field("connected", &self.is_connected())
            .field("config", &self.config)
            .field("results", &self.results.len())
            .finish()
    }
}

impl TestClient {
    /// client for the serial port at `path`, not yet connected
    pub fn serial(path: &str, settings: SerialSettings, config: ClientConfig) -> Self {
        Self {
            endpoint: Endpoint::Serial {
                path: path.to_string(),
                settings,
            },
            phys: None,
            config,
            results: VecDeque::new(),
        }
    }

    /// client for one end of an in-process loopback, not yet connected
    pub fn loopback(phys: PhysLayer, config: ClientConfig) -> Self {
        Self {
            endpoint: Endpoint::Loopback(Some(phys)),
            phys: None,
            config,
            results: VecDeque::new(),
        }
    }

    /// open the channel, a no-op if already open
    pub fn connect(&mut self) -> Result<(), ConnectionError> {
        if self.phys.is_some() {
            return Ok(());
        }
        let phys = match &mut self.endpoint {
            Endpoint::Serial { path, settings } => {
                let phys = PhysLayer::open_serial(path, *settings)?;
                tracing::info!("connected to {} at {} baud", path, settings.baud_rate);
                phys
            }
            Endpoint::Loopback(parked) => parked.take().ok_or(ConnectionError::Closed)?,
        };
        self.phys = Some(phys);
        Ok(())
    }

    /// close the channel
    pub fn disconnect(&mut self) {
        if let Some(phys) = self.phys.take() {
            match &mut self.endpoint {
                Endpoint::Serial { path, .. } => tracing::info!("disconnected from {}", path),
                Endpoint::Loopback(parked) => *parked = Some(phys),
            }
        }
    }

    /// true while the channel is open
    pub fn is_connected(&self) -> bool {
        self.phys.is_some()
    }

    /// configuration in use
    pub fn config(&self) -> ClientConfig {
        self.config
    }

    /// the most recent results, oldest first
    pub fn results(&self) -> &VecDeque<ModbusTestResult> {
        &self.results
    }

    /// forget the recorded results
    pub fn clear_results(&mut self) {
        self.results.clear();
    }

    /// Read Coils (0x01)
    pub async fn read_coils(&mut self, start: u16, count: u16) -> ModbusTestResult {
        self.read(FunctionCode::ReadCoils, AddressRange::new(start, count))
            .await
    }

    /// Read Discrete Inputs (0x02)
    pub async fn read_discrete_inputs(&mut self, start: u16, count: u16) -> ModbusTestResult {
        self.read(FunctionCode::ReadDiscreteInputs, AddressRange::new(start, count))
            .await
    }

    /// Read Holding Registers (0x03)
    pub async fn read_holding_registers(&mut self, start: u16, count: u16) -> ModbusTestResult {
        self.read(FunctionCode::ReadHoldingRegisters, AddressRange::new(start, count))
            .await
    }

    /// Read Input Registers (0x04)
    pub async fn read_input_registers(&mut self, start: u16, count: u16) -> ModbusTestResult {
        self.read(FunctionCode::ReadInputRegisters, AddressRange::new(start, count))
            .await
    }

    /// Write Single Coil (0x05) with the raw on-the-wire value (`0xFF00` on, `0x0000` off)
    pub async fn write_single_coil(&mut self, address: u16, value: u16) -> ModbusTestResult {
        self.write(FunctionCode::WriteSingleCoil, Indexed::new(address, value))
            .await
    }

    /// Write Single Register (0x06)
    pub async fn write_single_register(&mut self, address: u16, value: u16) -> ModbusTestResult {
        self.write(FunctionCode::WriteSingleRegister, Indexed::new(address, value))
            .await
    }

    async fn read(&mut self, function: FunctionCode, range: AddressRange) -> ModbusTestResult {
        let body = frame::address_pair(range.start, range.count);
        self.transact(function, body, |payload| parse_read(function, range, payload))
            .await
    }

    async fn write(&mut self, function: FunctionCode, value: Indexed<u16>) -> ModbusTestResult {
        let body = frame::address_pair(value.index, value.value);
        let echo = body.clone();
        self.transact(function, body, move |payload| {
            if payload != echo.as_slice() {
                return Err(ProtocolError::ReplyEchoMismatch);
            }
            Ok(ResponseValues::Written(value))
        })
        .await
    }

    async fn transact<F>(&mut self, function: FunctionCode, body: Vec<u8>, parse: F) -> ModbusTestResult
    where
        F: FnOnce(&[u8]) -> Result<ResponseValues, ProtocolError>,
    {
        let request = frame::encode_request(self.config.device_id, function.get_value(), &body);
        let result = ModbusTestResult::new(function, request.clone(), chrono::Utc::now());
        let start = Instant::now();

        let result = match self.exchange(&request).await {
            Err(ConnectionError::NotConnected) => result.fail("Not connected to Modbus device"),
            Err(err) => result.fail(format!("Communication error: {err}")),
            Ok(response) if response.is_empty() => result.fail("No response received"),
            Ok(response) => {
                let result = ModbusTestResult {
                    response: Some(response.clone()),
                    ..result
                };
                self.interpret(function, &response, result, parse)
            }
        };
        let result = ModbusTestResult {
            duration: start.elapsed(),
            ..result
        };

        if result.success {
            tracing::debug!("{}", result);
        } else {
            tracing::warn!("{}", result);
        }
        self.record(&result);
        result
    }

    fn record(&mut self, result: &ModbusTestResult) {
        if self.config.max_results == 0 {
            return;
        }
        while self.results.len() >= self.config.max_results {
            self.results.pop_front();
        }
        self.results.push_back(result.clone());
    }

    fn interpret<F>(
        &self,
        function: FunctionCode,
        response: &[u8],
        result: ModbusTestResult,
        parse: F,
    ) -> ModbusTestResult
    where
        F: FnOnce(&[u8]) -> Result<ResponseValues, ProtocolError>,
    {
        let reply = match Frame::decode(response) {
            Ok(frame) => frame,
            Err(ProtocolError::CrcMismatch { .. }) => return result.fail("Invalid CRC"),
            Err(ProtocolError::TooShort(_)) => return result.fail("Response too short"),
            Err(err) => return result.fail(err.to_string()),
        };

        if self.config.decode.frame.enabled() {
            tracing::info!("RTU RX - {}", RtuDisplay::new(self.config.decode.frame, &reply));
        }

        if reply.slave_id != self.config.device_id {
            return result.fail(
                ProtocolError::UnexpectedUnit {
                    expected: self.config.device_id,
                    actual: reply.slave_id,
                }
                .to_string(),
            );
        }

        if let Some(ex) = reply.exception() {
            return result.refuse(ex);
        }

        if reply.function_code != function.get_value() {
            return result.fail(
                ProtocolError::UnexpectedFunction {
                    expected: function.get_value(),
                    actual: reply.function_code,
                }
                .to_string(),
            );
        }

        match parse(&reply.payload) {
            Ok(values) => result.succeed(values),
            Err(err) => result.fail(err.to_string()),
        }
    }

    /// clear the inbound side, write the request, then collect the response until complete or timed out
    async fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>, ConnectionError> {
        let decode = self.config.decode;
        let timeout = self.config.timeout;
        let phys = self.phys.as_mut().ok_or(ConnectionError::NotConnected)?;

        let stale = phys.drain().await?;
        if stale > 0 {
            tracing::debug!("discarded {} stale bytes", stale);
        }

        if decode.frame.enabled() {
            if let Ok(frame) = Frame::decode(request) {
                tracing::info!("RTU TX - {}", RtuDisplay::new(decode.frame, &frame));
            }
        }
        phys.write(request, decode.physical).await?;

        let deadline = Instant::now() + timeout;
        let mut response = Vec::new();
        let mut chunk = [0u8; constants::MAX_FRAME_LENGTH];
        loop {
            let read = tokio::time::timeout_at(deadline, phys.read(&mut chunk, decode.physical));
            match read.await {
                Err(_) => return Ok(response),
                Ok(Ok(0)) => {
                    if response.is_empty() {
                        return Err(ConnectionError::Closed);
                    }
                    return Ok(response);
                }
                Ok(Ok(count)) => response.extend_from_slice(&chunk[..count]),
                Ok(Err(err)) => return Err(err.into()),
            }

            let complete = match frame::expected_response_len(&response) {
                Some(length) => response.len() >= length,
                None => {
                    response.len() >= constants::EXCEPTION_FRAME_LENGTH
                        && frame::verify(&response)
                }
            };
            if complete {
                return Ok(response);
            }
        }
    }
}

fn parse_read(
    function: FunctionCode,
    range: AddressRange,
    payload: &[u8],
) -> Result<ResponseValues, ProtocolError> {
    let mut cursor = ReadCursor::new(payload);
    let byte_count = cursor.read_u8()? as usize;
    let expected = match function {
        FunctionCode::ReadCoils | FunctionCode::ReadDiscreteInputs => {
            num_bytes_for_bits(range.count)
        }
        _ => 2 * range.count as usize,
    };
    if byte_count != expected {
        return Err(ProtocolError::ByteCountMismatch {
            count: byte_count,
            expected,
        });
    }
    if cursor.len() != byte_count {
        return Err(ProtocolError::BadPayloadLength {
            expected: 1 + byte_count,
            actual: payload.len(),
        });
    }
    let data = cursor.read_bytes(byte_count)?;

    match function {
        FunctionCode::ReadCoils | FunctionCode::ReadDiscreteInputs => Ok(ResponseValues::Bits(
            range
                .iter()
                .zip(unpack_bits(data, range.count))
                .map(Indexed::from)
                .collect(),
        )),
        _ => {
            let mut cursor = ReadCursor::new(data);
            let mut values = Vec::with_capacity(range.count as usize);
            for index in range.iter() {
                values.push(Indexed::new(index, cursor.read_u16_be()?));
            }
            Ok(ResponseValues::Registers(values))
        }
    }
}
