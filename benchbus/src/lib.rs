//! Simulated PCBA test bench built on [Tokio](https://docs.rs/tokio):
//! a Modbus RTU PLC simulator, a Modbus RTU test client, SCPI instrument
//! drivers and an engine that runs ordered test sequences against them.
//!
//! # Features
//!
//! * Panic-free RTU parsing with CRC16/MODBUS checking
//! * Simulated PLC register space with live sensor drift
//! * Test client that records every exchange as a [`client::ModbusTestResult`]
//! * Multimeter and power supply drivers over serial or TCP
//! * Sequence execution with progress callbacks and cooperative cancellation
//!
//! # Supported Functions
//!
//! * Read Coils
//! * Read Discrete Inputs
//! * Read Holding Registers
//! * Read Input Registers
//! * Write Single Coil
//! * Write Single Register
//!
//! # Example
//!
//! Run the simulator and the client suite over an in-process loopback
//!
//! ```no_run
//! use benchbus::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (client_phys, server_phys) = benchbus::loopback_pair();
//!
//!     let simulator = spawn_simulator(
//!         server_phys,
//!         SimulatorConfig::new(1),
//!         RegisterSpace::pcba_fixture().into_shared(),
//!     );
//!
//!     let mut client = TestClient::loopback(client_phys, ClientConfig::new(1));
//!     client.connect()?;
//!
//!     let report = client.run_comprehensive_test_suite().await;
//!     println!(
//!         "{}/{} passed",
//!         report.summary.passed, report.summary.total
//!     );
//!
//!     simulator.shutdown().await;
//!     Ok(())
//! }
//! ```

/// Modbus RTU test client
pub mod client;
/// instrument transports, drivers and the equipment registry
pub mod hal;
/// test sequences and the execution engine
pub mod sequence;
/// PLC simulator
pub mod server;

mod common;
mod constants;
mod decode;
mod error;
mod exception;
mod serial;
mod types;

/// prelude that can be used to include all of the API types
pub mod prelude;

pub use crate::common::frame::{crc16, encode_request, exception_response, verify, Frame};
pub use crate::common::function::FunctionCode;
pub use crate::common::phys::PhysLayer;
pub use crate::decode::*;
pub use crate::error::*;
pub use crate::exception::*;
pub use crate::serial::{DataBits, Parity, SerialSettings, StopBits};
pub use crate::types::*;

/// Create a connected pair of in-process byte channels, one for a
/// [`client::TestClient`] and one for the simulator
pub fn loopback_pair() -> (PhysLayer, PhysLayer) {
    PhysLayer::loopback_pair()
}
