pub use crate::client::{ClientConfig, ModbusTestResult, ResponseValues, TestClient};
pub use crate::hal::{
    spawn_bench_instrument, ConnectionConfig, Equipment, EquipmentConfig, EquipmentKind,
    HardwareManager, Multimeter, PowerSupply, TestMeasurement, Transport,
};
pub use crate::sequence::{
    current_sweep_sequence, voltage_sweep_sequence, Limits, StepAction, StepStatus, SweepPoint,
    TestExecutionEngine, TestSequence, TestSequenceBuilder,
};
pub use crate::server::{
    map, spawn_simulator, RegisterSpace, SharedRegisters, SimulatorConfig, SimulatorHandle,
};
pub use crate::{
    loopback_pair, AddressRange, ConnectionError, DecodeLevel, ExceptionCode, FrameDecodeLevel,
    FunctionCode, Indexed, PhysDecodeLevel, PhysLayer, ProtocolError, SerialSettings,
};
