use std::time::Duration;

use tracing::Instrument;

use crate::common::phys::PhysLayer;
use crate::decode::DecodeLevel;

pub(crate) mod drift;
pub(crate) mod handler;
pub(crate) mod registers;
pub(crate) mod task;

// re-export to the public API
pub use registers::*;

/// Configuration of a [`spawn_simulator`] instance
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SimulatorConfig {
    /// unit id the simulator answers to, frames for other units are ignored
    pub device_id: u8,
    /// quiet period that ends a frame on channels without a baud rate (loopback)
    pub inter_frame_gap: Duration,
    /// cadence of the drift loop, `None` freezes the register values
    pub drift_period: Option<Duration>,
    /// decode level for logging
    pub decode: DecodeLevel,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            device_id: 1,
            inter_frame_gap: Duration::from_millis(5),
            drift_period: Some(Duration::from_secs(1)),
            decode: DecodeLevel::default(),
        }
    }
}

impl SimulatorConfig {
    /// default configuration answering to `device_id`
    pub fn new(device_id: u8) -> Self {
        Self {
            device_id,
            ..Self::default()
        }
    }

    /// disable the drift loop so the registers only change on protocol writes
    pub fn without_drift(self) -> Self {
        Self {
            drift_period: None,
            ..self
        }
    }
}

/// Communication counters of a running simulator
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize))]
pub struct SimulatorStats {
    /// valid frames addressed to this unit
    pub messages_received: u64,
    /// responses written back, exceptions included
    pub messages_sent: u64,
    /// frames discarded for a bad CRC or truncation
    pub errors: u64,
}

/// Point-in-time status of a simulator
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize))]
pub struct SimulatorStatus {
    /// true while the I/O loop is alive
    pub running: bool,
    /// unit id the simulator answers to
    pub device_id: u8,
    /// communication counters
    pub stats: SimulatorStats,
    /// current values of the named fixture points
    pub fixture: FixtureSnapshot,
}

/// A handle to a running simulator. Both tasks stop when the handle is dropped.
#[derive(Debug)]
pub struct SimulatorHandle {
    device_id: u8,
    registers: SharedRegisters,
    stats: task::SharedStats,
    io: tokio::task::JoinHandle<()>,
    _io_tx: tokio::sync::mpsc::Sender<()>,
    _drift_tx: Option<tokio::sync::mpsc::Sender<()>>,
}

impl SimulatorHandle {
    /// copy of the communication counters
    pub fn stats(&self) -> SimulatorStats {
        *self.stats.lock()
    }

    /// running flag, counters and named fixture points
    pub fn snapshot(&self) -> SimulatorStatus {
        SimulatorStatus {
            running: !self.io.is_finished(),
            device_id: self.device_id,
            stats: self.stats(),
            fixture: self.registers.lock().snapshot(),
        }
    }

    /// the register space the simulator serves
    pub fn registers(&self) -> SharedRegisters {
        self.registers.clone()
    }

    /// stop both tasks and wait for the I/O loop to exit
    pub async fn shutdown(self) {
        let Self { io, _io_tx, _drift_tx, .. } = self;
        drop(_io_tx);
        drop(_drift_tx);
        if let Err(err) = io.await {
            tracing::warn!("simulator task failed: {}", err);
        }
    }
}

/// Spawns the simulator I/O loop, and the drift loop when enabled, onto the runtime.
/// This method can only be called from within the runtime context.
///
/// * `phys` - channel the requests arrive on
/// * `config` - unit id, framing and drift settings
/// * `registers` - register space served, shared with the caller
pub fn spawn_simulator(
    phys: PhysLayer,
    config: SimulatorConfig,
    registers: SharedRegisters,
) -> SimulatorHandle {
    let stats = task::SharedStats::default();
    let gap = phys.inter_frame_gap().unwrap_or(config.inter_frame_gap);

    let (io_tx, io_rx) = tokio::sync::mpsc::channel(1);
    let mut io_task = task::SimulatorTask::new(
        phys,
        registers.clone(),
        stats.clone(),
        config.device_id,
        gap,
        config.decode,
    );
    tracing::info!(
        "simulator started for unit {:#04X}, inter-frame gap {} us",
        config.device_id,
        gap.as_micros()
    );
    let io = tokio::spawn(
        async move { io_task.run(io_rx).await }
            .instrument(tracing::info_span!("PLC-Simulator", "unit" = config.device_id)),
    );

    let drift_tx = config.drift_period.map(|period| {
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        tokio::spawn(
            drift::run(registers.clone(), period, rx)
                .instrument(tracing::info_span!("PLC-Drift", "unit" = config.device_id)),
        );
        tx
    });

    SimulatorHandle {
        device_id: config.device_id,
        registers,
        stats,
        io,
        _io_tx: io_tx,
        _drift_tx: drift_tx,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn snapshot_reports_running_state() {
        let (_client, server) = PhysLayer::loopback_pair();
        let handle = spawn_simulator(
            server,
            SimulatorConfig::new(7).without_drift(),
            RegisterSpace::pcba_fixture().into_shared(),
        );
        let status = handle.snapshot();
        assert!(status.running);
        assert_eq!(status.device_id, 7);
        assert_eq!(status.fixture.rail_3v3, 3300);
        assert_eq!(status.stats, SimulatorStats::default());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn stops_when_peer_closes() {
        let (client, server) = PhysLayer::loopback_pair();
        let handle = spawn_simulator(
            server,
            SimulatorConfig::default().without_drift(),
            RegisterSpace::default().into_shared(),
        );
        drop(client);
        tokio::time::timeout(Duration::from_secs(1), async {
            while handle.snapshot().running {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }
}
