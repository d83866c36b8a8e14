use std::sync::Arc;
use std::time::Duration;

use crate::common::frame::{constants, Frame, RtuDisplay};
use crate::common::phys::PhysLayer;
use crate::decode::DecodeLevel;
use crate::error::{ConnectionError, ProtocolError};
use crate::server::registers::SharedRegisters;
use crate::server::SimulatorStats;

pub(crate) type SharedStats = Arc<parking_lot::Mutex<SimulatorStats>>;

/// Protocol I/O loop of the simulator
///
/// Accumulates bytes until the line goes quiet for one inter-frame gap, then
/// decodes exactly one frame from what was collected.
pub(crate) struct SimulatorTask {
    phys: PhysLayer,
    registers: SharedRegisters,
    stats: SharedStats,
    device_id: u8,
    gap: Duration,
    decode: DecodeLevel,
}

impl SimulatorTask {
    pub(crate) fn new(
        phys: PhysLayer,
        registers: SharedRegisters,
        stats: SharedStats,
        device_id: u8,
        gap: Duration,
        decode: DecodeLevel,
    ) -> Self {
        Self {
            phys,
            registers,
            stats,
            device_id,
            gap,
            decode,
        }
    }

    pub(crate) async fn run(&mut self, mut shutdown: tokio::sync::mpsc::Receiver<()>) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("simulator shutdown");
                    return;
                }
                result = self.read_frame() => {
                    match result {
                        Ok(bytes) => {
                            if let Err(err) = self.process(&bytes).await {
                                tracing::warn!("unable to send response: {}", err);
                                return;
                            }
                        }
                        Err(err) => {
                            tracing::info!("simulator stopped: {}", err);
                            return;
                        }
                    }
                }
            }
        }
    }

    /// wait for the first bytes of a frame, then collect until the line is quiet
    async fn read_frame(&mut self) -> Result<Vec<u8>, ConnectionError> {
        let mut chunk = [0u8; constants::MAX_FRAME_LENGTH];
        let mut buffer = Vec::new();

        let count = self.phys.read(&mut chunk, self.decode.physical).await?;
        if count == 0 {
            return Err(ConnectionError::Closed);
        }
        buffer.extend_from_slice(&chunk[..count]);

        loop {
            match tokio::time::timeout(self.gap, self.phys.read(&mut chunk, self.decode.physical))
                .await
            {
                // quiet period observed
                Err(_) => return Ok(buffer),
                // peer closed, hand over what arrived, the next read reports the close
                Ok(Ok(0)) => return Ok(buffer),
                Ok(Ok(count)) => buffer.extend_from_slice(&chunk[..count]),
                Ok(Err(err)) => return Err(err.into()),
            }
        }
    }

    async fn process(&mut self, bytes: &[u8]) -> Result<(), ConnectionError> {
        if bytes.len() > constants::MAX_FRAME_LENGTH {
            tracing::warn!("discarding {} bytes, longer than any RTU frame", bytes.len());
            self.stats.lock().errors += 1;
            return Ok(());
        }

        let request = match Frame::decode(bytes) {
            Ok(frame) => frame,
            Err(err) => {
                self.discard(err);
                return Ok(());
            }
        };

        if request.slave_id != self.device_id {
            tracing::debug!(
                "ignoring frame for unit {:#04X}, this is unit {:#04X}",
                request.slave_id,
                self.device_id
            );
            return Ok(());
        }

        if self.decode.frame.enabled() {
            tracing::info!("RTU RX - {}", RtuDisplay::new(self.decode.frame, &request));
        }
        self.stats.lock().messages_received += 1;

        // lock is held only for the duration of the dispatch
        let reply = {
            let mut registers = self.registers.lock();
            crate::server::handler::handle(self.device_id, &request, &mut registers)
        };

        if self.decode.frame.enabled() {
            if let Ok(frame) = Frame::decode(&reply) {
                tracing::info!("RTU TX - {}", RtuDisplay::new(self.decode.frame, &frame));
            }
        }

        self.phys.write(&reply, self.decode.physical).await?;
        self.stats.lock().messages_sent += 1;
        Ok(())
    }

    fn discard(&mut self, err: ProtocolError) {
        tracing::warn!("discarding frame: {}", err);
        self.stats.lock().errors += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::frame::{address_pair, encode_request};
    use crate::decode::PhysDecodeLevel;
    use crate::server::registers::RegisterSpace;

    struct Fixture {
        client: PhysLayer,
        stats: SharedStats,
        registers: SharedRegisters,
        _shutdown: tokio::sync::mpsc::Sender<()>,
    }

    fn spawn() -> Fixture {
        let (client, server) = PhysLayer::loopback_pair();
        let registers = RegisterSpace::pcba_fixture().into_shared();
        let stats = SharedStats::default();
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let mut task = SimulatorTask::new(
            server,
            registers.clone(),
            stats.clone(),
            0x01,
            Duration::from_millis(5),
            DecodeLevel::default(),
        );
        tokio::spawn(async move { task.run(rx).await });
        Fixture {
            client,
            stats,
            registers,
            _shutdown: tx,
        }
    }

    async fn exchange(phys: &mut PhysLayer, request: &[u8]) -> Option<Vec<u8>> {
        phys.write(request, PhysDecodeLevel::Nothing).await.unwrap();
        let mut buffer = [0u8; 256];
        match tokio::time::timeout(
            Duration::from_millis(100),
            phys.read(&mut buffer, PhysDecodeLevel::Nothing),
        )
        .await
        {
            Ok(Ok(count)) => Some(buffer[..count].to_vec()),
            _ => None,
        }
    }

    #[tokio::test]
    async fn answers_read_request() {
        let mut fixture = spawn();
        let reply = exchange(&mut fixture.client, &encode_request(0x01, 0x03, &address_pair(0, 3)))
            .await
            .unwrap();
        let frame = Frame::decode(&reply).unwrap();
        assert_eq!(frame.payload, vec![6, 0x00, 0x01, 0x00, 0x00, 0x00, 0x64]);

        let stats = *fixture.stats.lock();
        assert_eq!(stats.messages_received, 1);
        assert_eq!(stats.messages_sent, 1);
        assert_eq!(stats.errors, 0);
    }

    #[tokio::test]
    async fn stays_silent_on_bad_crc() {
        let mut fixture = spawn();
        let mut request = encode_request(0x01, 0x03, &address_pair(0, 10));
        request[7] ^= 0xFF;
        assert!(exchange(&mut fixture.client, &request).await.is_none());
        assert_eq!(fixture.stats.lock().errors, 1);
        assert_eq!(fixture.stats.lock().messages_sent, 0);

        // still serving afterwards
        let reply = exchange(&mut fixture.client, &encode_request(0x01, 0x03, &address_pair(0, 1))).await;
        assert!(reply.is_some());
    }

    #[tokio::test]
    async fn ignores_other_units() {
        let mut fixture = spawn();
        let request = encode_request(0x02, 0x06, &address_pair(0, 7));
        assert!(exchange(&mut fixture.client, &request).await.is_none());
        assert_eq!(fixture.registers.lock().holding_register(0), Some(1));
        assert_eq!(fixture.stats.lock().errors, 0);
    }

    #[tokio::test]
    async fn write_is_visible_in_shared_registers() {
        let mut fixture = spawn();
        let request = encode_request(0x01, 0x06, &address_pair(1, 0xBEEF));
        let reply = exchange(&mut fixture.client, &request).await.unwrap();
        assert_eq!(reply, request);
        assert_eq!(fixture.registers.lock().holding_register(1), Some(0xBEEF));
    }
}
