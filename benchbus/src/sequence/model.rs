use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::hal::TestMeasurement;
use crate::sequence::action::StepAction;
use crate::sequence::step::{StepError, StepOutcome, StepStatus, StepType};

/// Acceptance window applied to every reading a step takes
#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct Limits {
    /// lowest acceptable value, inclusive
    pub min: Option<f64>,
    /// highest acceptable value, inclusive
    pub max: Option<f64>,
}

impl Limits {
    /// no bounds
    pub const NONE: Limits = Limits {
        min: None,
        max: None,
    };

    /// both bounds
    pub fn new(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    /// `nominal` plus or minus `tolerance`
    pub fn around(nominal: f64, tolerance: f64) -> Self {
        Self::new(nominal - tolerance, nominal + tolerance)
    }

    /// true if neither bound is set
    pub fn is_unbounded(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    /// read `min_limit`/`max_limit` from textual step parameters
    pub fn from_params(params: &BTreeMap<String, String>) -> Result<Self, StepError> {
        let parse = |key: &str| -> Result<Option<f64>, StepError> {
            params
                .get(key)
                .map(|value| {
                    value.trim().parse::<f64>().map_err(|_| StepError::InvalidParameter {
                        parameter: key.to_string(),
                        value: value.clone(),
                    })
                })
                .transpose()
        };
        Ok(Self {
            min: parse("min_limit")?,
            max: parse("max_limit")?,
        })
    }

    fn apply(&self, measurement: TestMeasurement) -> TestMeasurement {
        if self.is_unbounded() {
            measurement
        } else {
            measurement.with_limits(self.min, self.max)
        }
    }
}

/// One stage of a [`TestSequence`]
///
/// The definition fields are public. Execution state is only advanced by the
/// [`TestExecutionEngine`](crate::sequence::TestExecutionEngine) and is read
/// through the accessors.
#[derive(Clone, Debug, PartialEq)]
pub struct TestStep {
    /// display name
    pub name: String,
    /// role within the sequence
    pub step_type: StepType,
    /// registry name of the equipment the action runs on
    pub equipment_name: String,
    /// command to issue
    pub action: StepAction,
    /// window applied to readings taken by the action
    pub limits: Limits,
    status: StepStatus,
    result: Option<StepOutcome>,
    error_message: Option<String>,
    execution_time: Duration,
    measurements: Vec<TestMeasurement>,
}

impl TestStep {
    /// pending step without limits
    pub fn new(name: &str, step_type: StepType, equipment_name: &str, action: StepAction) -> Self {
        Self {
            name: name.to_string(),
            step_type,
            equipment_name: equipment_name.to_string(),
            action,
            limits: Limits::NONE,
            status: StepStatus::Pending,
            result: None,
            error_message: None,
            execution_time: Duration::ZERO,
            measurements: Vec::new(),
        }
    }

    /// Build a step from a free-form action name and textual parameters,
    /// picking up `min_limit`/`max_limit` as well
    pub fn from_params(
        name: &str,
        step_type: StepType,
        equipment_name: &str,
        action: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<Self, StepError> {
        let action = StepAction::parse(action, params)?;
        let limits = Limits::from_params(params)?;
        Ok(Self::new(name, step_type, equipment_name, action).with_limits(limits))
    }

    /// replace the limits
    pub fn with_limits(self, limits: Limits) -> Self {
        Self { limits, ..self }
    }

    /// execution state
    pub fn status(&self) -> StepStatus {
        self.status
    }

    /// verdict, once finished
    pub fn result(&self) -> Option<StepOutcome> {
        self.result
    }

    /// why the step failed
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// time spent running the action
    pub fn execution_time(&self) -> Duration {
        self.execution_time
    }

    /// readings taken, with the step limits attached
    pub fn measurements(&self) -> &[TestMeasurement] {
        &self.measurements
    }

    fn transition(&mut self, next: StepStatus) -> bool {
        if !self.status.can_become(next) {
            tracing::warn!(
                "step {} cannot move from {} to {}",
                self.name,
                self.status,
                next
            );
            return false;
        }
        self.status = next;
        true
    }

    pub(crate) fn start(&mut self) -> bool {
        self.transition(StepStatus::Running)
    }

    pub(crate) fn skip(&mut self) -> bool {
        if self.transition(StepStatus::Skipped) {
            self.error_message = Some(StepError::Cancelled.to_string());
            true
        } else {
            false
        }
    }

    /// attach the step limits to `measurement` and record it
    pub(crate) fn record(&mut self, measurement: TestMeasurement) -> Result<(), StepError> {
        let measurement = self.limits.apply(measurement);
        let within = measurement.within_limits();
        self.measurements.push(measurement.clone());
        if within {
            Ok(())
        } else {
            Err(StepError::OutOfLimits(measurement))
        }
    }

    pub(crate) fn finish(&mut self, outcome: Result<(), StepError>, elapsed: Duration) {
        self.execution_time = elapsed;
        match outcome {
            Ok(()) => {
                if self.transition(StepStatus::Completed) {
                    self.result = Some(StepOutcome::Pass);
                }
            }
            Err(err) => {
                if self.transition(StepStatus::Failed) {
                    self.result = Some(StepOutcome::Fail);
                    self.error_message = Some(err.to_string());
                }
            }
        }
    }
}

/// Ordered test plan and its progress counters
#[derive(Clone, Debug, PartialEq)]
pub struct TestSequence {
    /// display name
    pub name: String,
    /// free text
    pub description: String,
    steps: Vec<TestStep>,
    completed_steps: usize,
    failed_steps: usize,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
}

impl TestSequence {
    /// empty sequence
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            steps: Vec::new(),
            completed_steps: 0,
            failed_steps: 0,
            start_time: None,
            end_time: None,
        }
    }

    /// append a step
    pub fn add_step(&mut self, step: TestStep) {
        self.steps.push(step);
    }

    /// steps in execution order
    pub fn steps(&self) -> &[TestStep] {
        &self.steps
    }

    pub(crate) fn steps_mut(&mut self) -> &mut [TestStep] {
        &mut self.steps
    }

    /// number of steps
    pub fn total_steps(&self) -> usize {
        self.steps.len()
    }

    /// steps that completed
    pub fn completed_steps(&self) -> usize {
        self.completed_steps
    }

    /// steps that failed
    pub fn failed_steps(&self) -> usize {
        self.failed_steps
    }

    /// when execution started
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    /// when execution stopped, by exhaustion or cancellation
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    /// completed steps as a percentage of all steps, 0 for an empty sequence
    pub fn progress(&self) -> f64 {
        if self.steps.is_empty() {
            0.0
        } else {
            self.completed_steps as f64 * 100.0 / self.steps.len() as f64
        }
    }

    /// true if every step completed
    pub fn passed(&self) -> bool {
        self.completed_steps == self.steps.len()
    }

    pub(crate) fn mark_started(&mut self) {
        self.start_time = Some(Utc::now());
    }

    pub(crate) fn mark_finished(&mut self) {
        self.end_time = Some(Utc::now());
    }

    pub(crate) fn count(&mut self, index: usize) {
        match self.steps.get(index).map(TestStep::status) {
            Some(StepStatus::Completed) => self.completed_steps += 1,
            Some(StepStatus::Failed) => self.failed_steps += 1,
            _ => {}
        }
    }

    /// plain data view for reporting and persistence layers
    pub fn to_summary(&self) -> SequenceSummary {
        SequenceSummary {
            name: self.name.clone(),
            description: self.description.clone(),
            total_steps: self.total_steps(),
            completed_steps: self.completed_steps,
            failed_steps: self.failed_steps,
            progress_percent: self.progress(),
            start_time: self.start_time,
            end_time: self.end_time,
            steps: self
                .steps
                .iter()
                .map(|step| StepSummary {
                    name: step.name.clone(),
                    step_type: step.step_type,
                    equipment_name: step.equipment_name.clone(),
                    action: step.action.name(),
                    status: step.status,
                    result: step.result,
                    measurements: step.measurements.clone(),
                    error: step.error_message.clone(),
                    execution_time: step.execution_time,
                })
                .collect(),
        }
    }
}

/// Summary of one step
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize))]
pub struct StepSummary {
    /// display name
    pub name: String,
    /// role within the sequence
    pub step_type: StepType,
    /// equipment the action ran on
    pub equipment_name: String,
    /// action name
    pub action: &'static str,
    /// execution state
    pub status: StepStatus,
    /// verdict
    pub result: Option<StepOutcome>,
    /// readings taken
    pub measurements: Vec<TestMeasurement>,
    /// failure text
    pub error: Option<String>,
    /// time spent running the action
    pub execution_time: Duration,
}

/// Summary of a sequence consumed by reporting and persistence layers
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize))]
pub struct SequenceSummary {
    /// display name
    pub name: String,
    /// free text
    pub description: String,
    /// number of steps
    pub total_steps: usize,
    /// steps that completed
    pub completed_steps: usize,
    /// steps that failed
    pub failed_steps: usize,
    /// completed steps as a percentage
    pub progress_percent: f64,
    /// when execution started
    pub start_time: Option<DateTime<Utc>>,
    /// when execution stopped
    pub end_time: Option<DateTime<Utc>>,
    /// per-step detail
    pub steps: Vec<StepSummary>,
}
