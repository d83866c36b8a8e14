use crate::hal::{EquipmentKind, HalError, TestMeasurement};

/// Role of a step within a sequence
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum StepType {
    /// bring equipment or the DUT into position
    Setup,
    /// take a reading
    Measurement,
    /// check a reading or state
    Verification,
    /// release resources, runs even after earlier failures
    Cleanup,
}

/// Execution state of a step
///
/// Transitions only move forward: `Pending -> Running -> Completed | Failed`,
/// or `Pending -> Skipped` when the sequence is cancelled before the step starts.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum StepStatus {
    /// not started
    Pending,
    /// action in flight
    Running,
    /// action succeeded and every measurement was within limits
    Completed,
    /// action failed or a measurement was out of limits
    Failed,
    /// never started because the sequence was cancelled
    Skipped,
}

impl StepStatus {
    /// true once the step can no longer change
    pub fn is_final(self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped
        )
    }

    pub(crate) fn can_become(self, next: StepStatus) -> bool {
        matches!(
            (self, next),
            (StepStatus::Pending, StepStatus::Running)
                | (StepStatus::Pending, StepStatus::Skipped)
                | (StepStatus::Running, StepStatus::Completed)
                | (StepStatus::Running, StepStatus::Failed)
        )
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepStatus::Pending => "PENDING",
            StepStatus::Running => "RUNNING",
            StepStatus::Completed => "COMPLETED",
            StepStatus::Failed => "FAILED",
            StepStatus::Skipped => "SKIPPED",
        };
        f.write_str(s)
    }
}

/// Verdict of a finished step
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum StepOutcome {
    /// step completed
    Pass,
    /// step failed
    Fail,
}

/// Reasons a step fails, recorded as the step's error message
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StepError {
    /// no equipment registered under the step's equipment name
    #[error("equipment not found: {0}")]
    EquipmentMissing(String),
    /// equipment is registered but its transport is closed
    #[error("equipment not connected: {0}")]
    NotConnected(String),
    /// action does not apply to this kind of equipment
    #[error("action {action} is not supported by a {kind}")]
    UnsupportedAction {
        /// action name
        action: &'static str,
        /// kind of the resolved equipment
        kind: EquipmentKind,
    },
    /// action name does not match any known action
    #[error("Unknown action: {0}")]
    UnknownAction(String),
    /// action needs a parameter that was not supplied
    #[error("{action} requires parameter {parameter}")]
    MissingParameter {
        /// action name
        action: &'static str,
        /// parameter name
        parameter: &'static str,
    },
    /// parameter value could not be parsed
    #[error("invalid value for {parameter}: {value}")]
    InvalidParameter {
        /// parameter name
        parameter: String,
        /// text supplied
        value: String,
    },
    /// reading fell outside the step's limits
    #[error("measurement out of limits: {}", .0)]
    OutOfLimits(TestMeasurement),
    /// equipment reported a failed self test
    #[error("self test of {0} failed")]
    SelfTestFailed(String),
    /// driver or transport failure
    #[error(transparent)]
    Hardware(#[from] HalError),
    /// sequence was cancelled before the step started
    #[error("sequence cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_never_regresses() {
        use StepStatus::*;
        assert!(Pending.can_become(Running));
        assert!(Pending.can_become(Skipped));
        assert!(Running.can_become(Failed));
        assert!(!Running.can_become(Pending));
        assert!(!Completed.can_become(Running));
        assert!(!Skipped.can_become(Running));
        assert!(!Pending.can_become(Completed));
    }

    #[test]
    fn final_states() {
        assert!(!StepStatus::Running.is_final());
        assert!(StepStatus::Skipped.is_final());
    }

    #[test]
    fn out_of_limits_shows_reading() {
        let m = TestMeasurement::new("DC_VOLTAGE", 4.2, "V").with_limits(Some(3.2), Some(3.4));
        assert_eq!(
            StepError::OutOfLimits(m).to_string(),
            "measurement out of limits: DC_VOLTAGE = 4.2 V [3.2, 3.4]"
        );
    }
}
