use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::time::Instant;
use tracing::Instrument;

use crate::hal::HardwareManager;
use crate::sequence::model::{TestSequence, TestStep};
use crate::sequence::step::{StepError, StepStatus};

/// Invoked after every step with the sequence progress and the step name
pub type ProgressCallback = Arc<dyn Fn(f64, &str) + Send + Sync>;
/// Invoked after every step with the finished step
pub type StepCallback = Arc<dyn Fn(&TestStep) + Send + Sync>;

/// Errors returned to the caller of the engine
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// The engine is already executing a sequence
    #[error("test execution already in progress")]
    AlreadyRunning,
    /// The worker task panicked or was aborted
    #[error("sequence worker failed: {0}")]
    WorkerFailed(String),
}

/// Flag that stops a running sequence at the next step boundary
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// request cancellation
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// true once cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// clears the running flag when the worker exits, even by panic
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Executes one [`TestSequence`] at a time against a [`HardwareManager`]
///
/// Each sequence runs on its own task. Steps run strictly in order; a failed
/// step is recorded and execution moves on to the next one. Cancellation is
/// checked between steps only, so an action already in flight runs to
/// completion or timeout first. Steps that never started are marked
/// [`StepStatus::Skipped`].
///
/// Every execution gets its own [`CancelToken`]: cancelling a finished run
/// never reaches the next one.
pub struct TestExecutionEngine {
    manager: Arc<HardwareManager>,
    running: Arc<AtomicBool>,
    // token of the most recent execution
    current: parking_lot::Mutex<CancelToken>,
    progress_callback: Option<ProgressCallback>,
    step_callback: Option<StepCallback>,
}

impl std::fmt::Debug for TestExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestExecutionEngine")
            .field("running", &self.is_running())
            .field("cancelled", &self.current.lock().is_cancelled())
            .finish()
    }
}

impl TestExecutionEngine {
    /// engine dispatching to the equipment in `manager`
    pub fn new(manager: Arc<HardwareManager>) -> Self {
        Self {
            manager,
            running: Arc::new(AtomicBool::new(false)),
            current: parking_lot::Mutex::new(CancelToken::default()),
            progress_callback: None,
            step_callback: None,
        }
    }

    /// register the progress callback used by subsequent executions
    pub fn set_progress_callback(&mut self, callback: impl Fn(f64, &str) + Send + Sync + 'static) {
        self.progress_callback = Some(Arc::new(callback));
    }

    /// register the step callback used by subsequent executions
    pub fn set_step_callback(&mut self, callback: impl Fn(&TestStep) + Send + Sync + 'static) {
        self.step_callback = Some(Arc::new(callback));
    }

    /// true while a sequence is executing
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// token of the current or most recent execution
    pub fn cancel_token(&self) -> CancelToken {
        self.current.lock().clone()
    }

    /// stop the current execution at the next step boundary, a no-op while idle
    pub fn stop_execution(&self) {
        if !self.is_running() {
            tracing::debug!("no test execution in progress");
            return;
        }
        tracing::info!("test execution stop requested");
        self.current.lock().cancel();
    }

    /// Start executing `sequence` on a new task.
    /// This method can only be called from within the runtime context.
    pub fn execute(&self, sequence: TestSequence) -> Result<ExecutionHandle, EngineError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!("test execution already in progress");
            return Err(EngineError::AlreadyRunning);
        }
        let cancel = CancelToken::default();
        *self.current.lock() = cancel.clone();

        let worker = Worker {
            manager: self.manager.clone(),
            cancel: cancel.clone(),
            progress_callback: self.progress_callback.clone(),
            step_callback: self.step_callback.clone(),
        };
        let guard = RunningGuard(self.running.clone());
        let span = tracing::info_span!("Test-Engine", "sequence" = %sequence.name);
        let task = tokio::spawn(
            async move {
                let _guard = guard;
                worker.run(sequence).await
            }
            .instrument(span),
        );

        Ok(ExecutionHandle { task, cancel })
    }
}

/// A handle to one sequence execution
#[derive(Debug)]
pub struct ExecutionHandle {
    task: tokio::task::JoinHandle<TestSequence>,
    cancel: CancelToken,
}

impl ExecutionHandle {
    /// stop this execution at the next step boundary
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// token bound to this execution only
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// true once the worker has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// wait for the worker and take back the executed sequence
    pub async fn wait(self) -> Result<TestSequence, EngineError> {
        self.task
            .await
            .map_err(|err| EngineError::WorkerFailed(err.to_string()))
    }
}

struct Worker {
    manager: Arc<HardwareManager>,
    cancel: CancelToken,
    progress_callback: Option<ProgressCallback>,
    step_callback: Option<StepCallback>,
}

impl Worker {
    async fn run(&self, mut sequence: TestSequence) -> TestSequence {
        sequence.mark_started();
        tracing::info!("starting test sequence: {}", sequence.name);

        for index in 0..sequence.total_steps() {
            if self.cancel.is_cancelled() {
                tracing::info!("test execution stopped by user request");
                for step in &mut sequence.steps_mut()[index..] {
                    step.skip();
                }
                break;
            }

            let step = &mut sequence.steps_mut()[index];
            self.run_step(step).await;
            if step.status() == StepStatus::Failed {
                tracing::error!(
                    "test step failed: {} - {}",
                    step.name,
                    step.error_message().unwrap_or_default()
                );
            }
            sequence.count(index);

            let step = &sequence.steps()[index];
            if let Some(callback) = &self.progress_callback {
                callback(sequence.progress(), &step.name);
            }
            if let Some(callback) = &self.step_callback {
                callback(step);
            }
        }

        sequence.mark_finished();
        tracing::info!(
            "test sequence finished: {} ({}/{} completed, {} failed)",
            sequence.name,
            sequence.completed_steps(),
            sequence.total_steps(),
            sequence.failed_steps()
        );
        sequence
    }

    async fn run_step(&self, step: &mut TestStep) {
        if !step.start() {
            return;
        }
        tracing::info!("executing step: {}", step.name);
        let start = Instant::now();
        let outcome = self.dispatch(step).await;
        step.finish(outcome, start.elapsed());
    }

    async fn dispatch(&self, step: &mut TestStep) -> Result<(), StepError> {
        let equipment = self
            .manager
            .get(&step.equipment_name)
            .ok_or_else(|| StepError::EquipmentMissing(step.equipment_name.clone()))?;
        let mut equipment = equipment.lock().await;
        if !equipment.is_connected() {
            return Err(StepError::NotConnected(step.equipment_name.clone()));
        }
        match step.action.execute(&mut equipment).await? {
            Some(measurement) => step.record(measurement),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{ConnectionConfig, Multimeter, PowerSupply, Transport};
    use crate::sequence::{Limits, StepAction, StepOutcome, TestSequenceBuilder};
    use std::sync::{Mutex, OnceLock};
    use tokio_test::io::Builder;

    fn engine(manager: HardwareManager) -> TestExecutionEngine {
        TestExecutionEngine::new(Arc::new(manager))
    }

    #[tokio::test]
    async fn failed_step_does_not_abort_the_sequence() {
        let mock = Builder::new()
            .write(b"CONF:VOLT:DC\r\n")
            .write(b"READ?\r\n")
            .read(b"3.30\r\n")
            .write(b"CONF:VOLT:DC\r\n")
            .write(b"READ?\r\n")
            .read(b"4.90\r\n")
            .write(b"*RST\r\n")
            .build();
        let mut manager = HardwareManager::new();
        manager.add(Multimeter::new("dmm", Transport::mock(mock))).unwrap();

        let measure = StepAction::MeasureVoltageDc { range: None };
        let sequence = TestSequenceBuilder::new("rails", "")
            .add_measurement_step("3V3", "dmm", measure, Limits::new(3.2, 3.4))
            .add_measurement_step("5V", "dmm", measure, Limits::new(5.0, 5.2))
            .add_cleanup_step("reset", "dmm", StepAction::Reset)
            .build();

        let mut engine = engine(manager);
        let progress = Arc::new(Mutex::new(Vec::new()));
        let seen = progress.clone();
        engine.set_progress_callback(move |percent, name| {
            seen.lock().unwrap().push((percent, name.to_string()));
        });

        let sequence = engine.execute(sequence).unwrap().wait().await.unwrap();
        let steps = sequence.steps();
        assert_eq!(steps[0].status(), StepStatus::Completed);
        assert_eq!(steps[1].status(), StepStatus::Failed);
        assert_eq!(steps[1].result(), Some(StepOutcome::Fail));
        assert!(steps[1]
            .error_message()
            .unwrap()
            .starts_with("measurement out of limits"));
        assert_eq!(steps[2].status(), StepStatus::Completed);
        assert_eq!(sequence.completed_steps(), 2);
        assert_eq!(sequence.failed_steps(), 1);
        assert!((sequence.progress() - 66.67).abs() < 0.01);
        assert!(sequence.start_time().is_some());
        assert!(sequence.end_time() >= sequence.start_time());

        let progress = progress.lock().unwrap();
        assert_eq!(progress.len(), 3);
        assert_eq!(progress[1].1, "5V");
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn cancel_between_steps_skips_the_rest() {
        // the mock panics on any command beyond the first step
        let mock = Builder::new()
            .write(b"OUTP ON\r\n")
            .write(b"*OPC?\r\n")
            .read(b"1\r\n")
            .build();
        let mut manager = HardwareManager::new();
        manager.add(PowerSupply::new("psu", Transport::mock(mock))).unwrap();

        let sequence = TestSequenceBuilder::new("cancel", "")
            .add_setup_step("on", "psu", StepAction::EnableOutput { on: true })
            .add_setup_step("5V", "psu", StepAction::SetVoltage { volts: 5.0 })
            .add_cleanup_step("off", "psu", StepAction::EnableOutput { on: false })
            .build();

        let mut engine = engine(manager);
        let slot = Arc::new(OnceLock::<CancelToken>::new());
        let token = slot.clone();
        engine.set_step_callback(move |step| {
            if step.name == "on" {
                token.get().unwrap().cancel();
            }
        });

        // the worker cannot start before the first await on this runtime
        let handle = engine.execute(sequence).unwrap();
        slot.set(handle.cancel_token()).unwrap();
        let sequence = handle.wait().await.unwrap();
        let status: Vec<_> = sequence.steps().iter().map(|x| x.status()).collect();
        assert_eq!(
            status,
            [StepStatus::Completed, StepStatus::Skipped, StepStatus::Skipped]
        );
        assert_eq!(sequence.completed_steps(), 1);
        assert!(sequence.end_time().is_some());
    }

    #[tokio::test]
    async fn rejects_second_sequence_while_busy() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });

        // an instrument that never answers keeps the first sequence busy
        let config = ConnectionConfig::tcp("127.0.0.1", port)
            .with_timeout(std::time::Duration::from_millis(200));
        let mut dmm = Multimeter::new("dmm", Transport::new(config));
        dmm.connect().await.unwrap();
        let _peer = accept.await.unwrap();

        let mut manager = HardwareManager::new();
        manager.add(dmm).unwrap();
        let engine = engine(manager);

        let busy = TestSequenceBuilder::new("busy", "")
            .add_verification_step("tst", "dmm", StepAction::SelfTest, Limits::NONE)
            .build();
        let handle = engine.execute(busy).unwrap();
        assert!(engine.is_running());
        assert_eq!(
            engine.execute(TestSequence::new("second", "")).unwrap_err(),
            EngineError::AlreadyRunning
        );

        let busy = handle.wait().await.unwrap();
        assert_eq!(busy.steps()[0].status(), StepStatus::Failed);
        assert!(!engine.is_running());
        assert!(engine.execute(TestSequence::new("third", "")).is_ok());
    }

    #[tokio::test]
    async fn cancelling_a_finished_run_leaves_the_next_alone() {
        // only the first run reaches the instrument
        let mock = Builder::new()
            .write(b"*RST\r\n")
            .write(b"*RST\r\n")
            .build();
        let mut manager = HardwareManager::new();
        manager.add(PowerSupply::new("psu", Transport::mock(mock))).unwrap();
        let engine = engine(manager);

        let resets = |name: &str| {
            TestSequenceBuilder::new(name, "")
                .add_setup_step("a", "psu", StepAction::Reset)
                .add_setup_step("b", "psu", StepAction::Reset)
                .build()
        };

        let first = engine.execute(resets("first")).unwrap();
        let first_token = first.cancel_token();
        let first = first.wait().await.unwrap();
        assert_eq!(first.completed_steps(), 2);

        let second = engine.execute(resets("second")).unwrap();
        first_token.cancel();
        assert!(!second.cancel_token().is_cancelled());
        assert!(!engine.cancel_token().is_cancelled());

        // stop_execution reaches the run in progress
        engine.stop_execution();
        assert!(second.cancel_token().is_cancelled());
        let second = second.wait().await.unwrap();
        let status: Vec<_> = second.steps().iter().map(|x| x.status()).collect();
        assert_eq!(status, [StepStatus::Skipped, StepStatus::Skipped]);
    }

    #[tokio::test]
    async fn stop_while_idle_does_not_reach_the_next_run() {
        let mock = Builder::new().write(b"*RST\r\n").build();
        let mut manager = HardwareManager::new();
        manager.add(PowerSupply::new("psu", Transport::mock(mock))).unwrap();
        let engine = engine(manager);

        engine.stop_execution();
        let sequence = TestSequenceBuilder::new("after-stop", "")
            .add_setup_step("reset", "psu", StepAction::Reset)
            .build();
        let sequence = engine.execute(sequence).unwrap().wait().await.unwrap();
        assert_eq!(sequence.steps()[0].status(), StepStatus::Completed);
    }

    #[tokio::test]
    async fn missing_or_disconnected_equipment_fails_the_step() {
        let mut manager = HardwareManager::new();
        manager
            .add(PowerSupply::new(
                "psu",
                Transport::new(ConnectionConfig::tcp("127.0.0.1", 1)),
            ))
            .unwrap();

        let sequence = TestSequenceBuilder::new("offline", "")
            .add_setup_step("missing", "dmm", StepAction::Reset)
            .add_setup_step("offline", "psu", StepAction::Reset)
            .build();
        let sequence = engine(manager).execute(sequence).unwrap().wait().await.unwrap();

        assert_eq!(
            sequence.steps()[0].error_message(),
            Some("equipment not found: dmm")
        );
        assert_eq!(
            sequence.steps()[1].error_message(),
            Some("equipment not connected: psu")
        );
        assert_eq!(sequence.failed_steps(), 2);
        assert_eq!(sequence.progress(), 0.0);
    }

    #[tokio::test]
    async fn unsupported_action_fails_the_step() {
        let mock = Builder::new().build();
        let mut manager = HardwareManager::new();
        manager.add(Multimeter::new("dmm", Transport::mock(mock))).unwrap();

        let sequence = TestSequenceBuilder::new("wrong", "")
            .add_setup_step("volts", "dmm", StepAction::SetVoltage { volts: 1.0 })
            .build();
        let sequence = engine(manager).execute(sequence).unwrap().wait().await.unwrap();
        assert_eq!(
            sequence.steps()[0].error_message(),
            Some("action set_voltage is not supported by a multimeter")
        );
    }
}
