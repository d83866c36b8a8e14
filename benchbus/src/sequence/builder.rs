use crate::sequence::action::StepAction;
use crate::sequence::model::{Limits, TestSequence, TestStep};
use crate::sequence::step::StepType;

/// Registry name the canned sequences use for the multimeter
pub const DEFAULT_DMM: &str = "dmm";
/// Registry name the canned sequences use for the power supply
pub const DEFAULT_PSU: &str = "psu";

/// Fluent construction of a [`TestSequence`]
#[derive(Debug)]
pub struct TestSequenceBuilder {
    sequence: TestSequence,
}

impl TestSequenceBuilder {
    /// start an empty sequence
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            sequence: TestSequence::new(name, description),
        }
    }

    /// append a fully built step
    pub fn add_step(mut self, step: TestStep) -> Self {
        self.sequence.add_step(step);
        self
    }

    /// append a setup step
    pub fn add_setup_step(self, name: &str, equipment: &str, action: StepAction) -> Self {
        self.add_step(TestStep::new(name, StepType::Setup, equipment, action))
    }

    /// append a measurement step whose readings must fall within `limits`
    pub fn add_measurement_step(
        self,
        name: &str,
        equipment: &str,
        action: StepAction,
        limits: Limits,
    ) -> Self {
        self.add_step(
            TestStep::new(name, StepType::Measurement, equipment, action).with_limits(limits),
        )
    }

    /// append a verification step whose readings must fall within `limits`
    pub fn add_verification_step(
        self,
        name: &str,
        equipment: &str,
        action: StepAction,
        limits: Limits,
    ) -> Self {
        self.add_step(
            TestStep::new(name, StepType::Verification, equipment, action).with_limits(limits),
        )
    }

    /// append a cleanup step
    pub fn add_cleanup_step(self, name: &str, equipment: &str, action: StepAction) -> Self {
        self.add_step(TestStep::new(name, StepType::Cleanup, equipment, action))
    }

    /// finish construction
    pub fn build(self) -> TestSequence {
        self.sequence
    }
}

/// One point of a sweep: a supply setting and the window its reading must hit
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SweepPoint {
    /// volts for a voltage sweep, amps for a current sweep
    pub setpoint: f64,
    /// acceptance window of the reading
    pub limits: Limits,
}

impl SweepPoint {
    /// construct from its fields
    pub fn new(setpoint: f64, limits: Limits) -> Self {
        Self { setpoint, limits }
    }
}

fn enable_supply(builder: TestSequenceBuilder, volts: f64) -> TestSequenceBuilder {
    builder
        .add_setup_step("Reset DMM", DEFAULT_DMM, StepAction::Reset)
        .add_setup_step(
            "Setup Power Supply",
            DEFAULT_PSU,
            StepAction::SetVoltage { volts },
        )
        .add_setup_step(
            "Enable Power Supply",
            DEFAULT_PSU,
            StepAction::EnableOutput { on: true },
        )
}

fn release_supply(builder: TestSequenceBuilder) -> TestSequenceBuilder {
    builder
        .add_cleanup_step(
            "Disable Power Supply",
            DEFAULT_PSU,
            StepAction::EnableOutput { on: false },
        )
        .add_cleanup_step("Reset Power Supply", DEFAULT_PSU, StepAction::Reset)
}

/// Step the supply through each voltage and check the meter reading at each point
pub fn voltage_sweep_sequence(name: &str, points: &[SweepPoint]) -> TestSequence {
    let mut builder = enable_supply(
        TestSequenceBuilder::new(name, "Voltage measurement test sequence"),
        0.0,
    );
    for point in points {
        builder = builder
            .add_setup_step(
                &format!("Set Voltage {}V", point.setpoint),
                DEFAULT_PSU,
                StepAction::SetVoltage {
                    volts: point.setpoint,
                },
            )
            .add_measurement_step(
                &format!("Measure Voltage {}V", point.setpoint),
                DEFAULT_DMM,
                StepAction::MeasureVoltageDc { range: None },
                point.limits,
            );
    }
    release_supply(builder).build()
}

/// Step the supply through each current limit at 5 V and check the meter reading
pub fn current_sweep_sequence(name: &str, points: &[SweepPoint]) -> TestSequence {
    let mut builder = enable_supply(
        TestSequenceBuilder::new(name, "Current measurement test sequence"),
        5.0,
    );
    for point in points {
        builder = builder
            .add_setup_step(
                &format!("Set Current Limit {}A", point.setpoint),
                DEFAULT_PSU,
                StepAction::SetCurrentLimit {
                    amps: point.setpoint,
                },
            )
            .add_measurement_step(
                &format!("Measure Current {}A", point.setpoint),
                DEFAULT_DMM,
                StepAction::MeasureCurrentDc { range: None },
                point.limits,
            );
    }
    release_supply(builder).build()
}
