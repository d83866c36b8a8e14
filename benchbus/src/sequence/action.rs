use std::collections::BTreeMap;

use crate::hal::{Equipment, EquipmentKind, TestMeasurement};
use crate::sequence::step::StepError;

/// Command a step issues to its equipment
///
/// Meter actions apply to a [`Multimeter`](crate::hal::Multimeter), supply
/// actions to a [`PowerSupply`](crate::hal::PowerSupply), and
/// [`StepAction::Reset`] and [`StepAction::SelfTest`] to either.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize),
    serde(tag = "action", rename_all = "snake_case")
)]
pub enum StepAction {
    /// DC voltage reading, optionally at a fixed range
    MeasureVoltageDc {
        /// full scale in volts
        range: Option<f64>,
    },
    /// DC current reading, optionally at a fixed range
    MeasureCurrentDc {
        /// full scale in amps
        range: Option<f64>,
    },
    /// resistance reading, optionally at a fixed range
    MeasureResistance {
        /// full scale in ohms
        range: Option<f64>,
    },
    /// supply voltage setpoint
    SetVoltage {
        /// setpoint in volts
        volts: f64,
    },
    /// supply current limit
    SetCurrentLimit {
        /// limit in amps
        amps: f64,
    },
    /// switch the supply output
    EnableOutput {
        /// true for on
        on: bool,
    },
    /// read back the supply output voltage
    MeasureOutputVoltage,
    /// read back the supply output current
    MeasureOutputCurrent,
    /// `*RST`
    Reset,
    /// `*TST?`, fails the step unless the equipment passes
    SelfTest,
}

impl std::fmt::Display for StepAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

fn parse_f64(params: &BTreeMap<String, String>, key: &str) -> Result<Option<f64>, StepError> {
    match params.get(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| StepError::InvalidParameter {
                parameter: key.to_string(),
                value: value.clone(),
            }),
    }
}

fn parse_bool(params: &BTreeMap<String, String>, key: &str) -> Result<Option<bool>, StepError> {
    match params.get(key) {
        None => Ok(None),
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "true" | "on" | "1" => Ok(Some(true)),
            "false" | "off" | "0" => Ok(Some(false)),
            _ => Err(StepError::InvalidParameter {
                parameter: key.to_string(),
                value: value.clone(),
            }),
        },
    }
}

impl StepAction {
    /// snake_case name used in configuration and logs
    pub fn name(&self) -> &'static str {
        match self {
            StepAction::MeasureVoltageDc { .. } => "measure_voltage_dc",
            StepAction::MeasureCurrentDc { .. } => "measure_current_dc",
            StepAction::MeasureResistance { .. } => "measure_resistance",
            StepAction::SetVoltage { .. } => "set_voltage",
            StepAction::SetCurrentLimit { .. } => "set_current_limit",
            StepAction::EnableOutput { .. } => "enable_output",
            StepAction::MeasureOutputVoltage => "measure_output_voltage",
            StepAction::MeasureOutputCurrent => "measure_output_current",
            StepAction::Reset => "reset",
            StepAction::SelfTest => "self_test",
        }
    }

    /// Build an action from its name and textual parameters
    ///
    /// Names are matched case-insensitively. Recognised parameters are
    /// `range` for meter readings, `voltage` for `set_voltage`, `current` for
    /// `set_current_limit` and `enable` (default true) for `enable_output`.
    /// Any other keys, such as limits, are ignored here.
    pub fn parse(name: &str, params: &BTreeMap<String, String>) -> Result<Self, StepError> {
        let action = match name.trim().to_ascii_lowercase().as_str() {
            "measure_voltage_dc" => StepAction::MeasureVoltageDc {
                range: parse_f64(params, "range")?,
            },
            "measure_current_dc" => StepAction::MeasureCurrentDc {
                range: parse_f64(params, "range")?,
            },
            "measure_resistance" => StepAction::MeasureResistance {
                range: parse_f64(params, "range")?,
            },
            "set_voltage" => StepAction::SetVoltage {
                volts: parse_f64(params, "voltage")?.ok_or(StepError::MissingParameter {
                    action: "set_voltage",
                    parameter: "voltage",
                })?,
            },
            "set_current_limit" => StepAction::SetCurrentLimit {
                amps: parse_f64(params, "current")?.ok_or(StepError::MissingParameter {
                    action: "set_current_limit",
                    parameter: "current",
                })?,
            },
            "enable_output" => StepAction::EnableOutput {
                on: parse_bool(params, "enable")?.unwrap_or(true),
            },
            "measure_output_voltage" => StepAction::MeasureOutputVoltage,
            "measure_output_current" => StepAction::MeasureOutputCurrent,
            "reset" => StepAction::Reset,
            "self_test" => StepAction::SelfTest,
            _ => return Err(StepError::UnknownAction(name.to_string())),
        };
        Ok(action)
    }

    /// true if the action can run on `kind`
    pub fn supports(&self, kind: EquipmentKind) -> bool {
        match self {
            StepAction::MeasureVoltageDc { .. }
            | StepAction::MeasureCurrentDc { .. }
            | StepAction::MeasureResistance { .. } => kind == EquipmentKind::Multimeter,
            StepAction::SetVoltage { .. }
            | StepAction::SetCurrentLimit { .. }
            | StepAction::EnableOutput { .. }
            | StepAction::MeasureOutputVoltage
            | StepAction::MeasureOutputCurrent => kind == EquipmentKind::PowerSupply,
            StepAction::Reset | StepAction::SelfTest => true,
        }
    }

    /// Issue the action, returning the reading it produced if any
    pub async fn execute(
        &self,
        equipment: &mut Equipment,
    ) -> Result<Option<TestMeasurement>, StepError> {
        let measurement = match (self, &mut *equipment) {
            (StepAction::MeasureVoltageDc { range }, Equipment::Multimeter(dmm)) => {
                Some(dmm.measure_voltage_dc(*range).await?)
            }
            (StepAction::MeasureCurrentDc { range }, Equipment::Multimeter(dmm)) => {
                Some(dmm.measure_current_dc(*range).await?)
            }
            (StepAction::MeasureResistance { range }, Equipment::Multimeter(dmm)) => {
                Some(dmm.measure_resistance(*range).await?)
            }
            (StepAction::SetVoltage { volts }, Equipment::PowerSupply(psu)) => {
                psu.set_voltage(*volts).await?;
                None
            }
            (StepAction::SetCurrentLimit { amps }, Equipment::PowerSupply(psu)) => {
                psu.set_current_limit(*amps).await?;
                None
            }
            (StepAction::EnableOutput { on }, Equipment::PowerSupply(psu)) => {
                psu.enable_output(*on).await?;
                None
            }
            (StepAction::MeasureOutputVoltage, Equipment::PowerSupply(psu)) => {
                Some(psu.measure_output_voltage().await?)
            }
            (StepAction::MeasureOutputCurrent, Equipment::PowerSupply(psu)) => {
                Some(psu.measure_output_current().await?)
            }
            (StepAction::Reset, equipment) => {
                equipment.reset().await?;
                None
            }
            (StepAction::SelfTest, equipment) => {
                if !equipment.self_test().await? {
                    return Err(StepError::SelfTestFailed(equipment.name().to_string()));
                }
                None
            }
            (action, equipment) => {
                return Err(StepError::UnsupportedAction {
                    action: action.name(),
                    kind: equipment.kind(),
                })
            }
        };
        Ok(measurement)
    }
}
