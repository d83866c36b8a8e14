use std::fmt::Write;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::decode::PhysDecodeLevel;
use crate::error::ConnectionError;
use crate::serial::SerialSettings;

const LOOPBACK_BUFFER_SIZE: usize = 4096;

/// Byte channel carrying Modbus RTU frames
///
/// Either a real serial port or one end of an in-process loopback created
/// with [`loopback_pair`](crate::loopback_pair).
pub struct PhysLayer {
    layer: PhysLayerImpl,
}

// encapsulates all possible physical layers as an enum
enum PhysLayerImpl {
    #[cfg(feature = "serial")]
    Serial(tokio_serial::SerialStream, Duration),
    Loopback(tokio::io::DuplexStream),
}

impl std::fmt::Debug for PhysLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match &self.layer {
            #[cfg(feature = "serial")]
            PhysLayerImpl::Serial(_, _) => f.write_str("Serial"),
            PhysLayerImpl::Loopback(_) => f.write_str("Loopback"),
        }
    }
}

impl PhysLayer {
    /// open a serial port with the given settings
    #[cfg(feature = "serial")]
    pub fn open_serial(path: &str, settings: SerialSettings) -> Result<Self, ConnectionError> {
        let stream = crate::serial::open(path, settings).map_err(|err| {
            ConnectionError::OpenFailed {
                target: path.to_string(),
                reason: err.to_string(),
            }
        })?;
        let gap = crate::serial::inter_frame_gap(settings.baud_rate);
        Ok(Self {
            layer: PhysLayerImpl::Serial(stream, gap),
        })
    }

    /// open a serial port with the given settings
    #[cfg(not(feature = "serial"))]
    pub fn open_serial(path: &str, _settings: SerialSettings) -> Result<Self, ConnectionError> {
        Err(ConnectionError::OpenFailed {
            target: path.to_string(),
            reason: "serial support is not enabled".to_string(),
        })
    }

    pub(crate) fn loopback_pair() -> (Self, Self) {
        let (a, b) = tokio::io::duplex(LOOPBACK_BUFFER_SIZE);
        (
            Self {
                layer: PhysLayerImpl::Loopback(a),
            },
            Self {
                layer: PhysLayerImpl::Loopback(b),
            },
        )
    }

    /// quiet period that terminates a frame on this channel, if the line dictates one
    pub(crate) fn inter_frame_gap(&self) -> Option<Duration> {
        match &self.layer {
            #[cfg(feature = "serial")]
            PhysLayerImpl::Serial(_, gap) => Some(*gap),
            PhysLayerImpl::Loopback(_) => None,
        }
    }

    pub(crate) async fn read(
        &mut self,
        buffer: &mut [u8],
        decode_level: PhysDecodeLevel,
    ) -> Result<usize, std::io::Error> {
        let length = match &mut self.layer {
            #[cfg(feature = "serial")]
            PhysLayerImpl::Serial(x, _) => x.read(buffer).await?,
            PhysLayerImpl::Loopback(x) => x.read(buffer).await?,
        };

        if decode_level.enabled() {
            if let Some(x) = buffer.get(0..length) {
                tracing::info!("PHYS RX - {}", PhysDisplay::new(decode_level, x))
            }
        }

        Ok(length)
    }

    pub(crate) async fn write(
        &mut self,
        data: &[u8],
        decode_level: PhysDecodeLevel,
    ) -> Result<(), std::io::Error> {
        if decode_level.enabled() {
            tracing::info!("PHYS TX - {}", PhysDisplay::new(decode_level, data));
        }

        match &mut self.layer {
            #[cfg(feature = "serial")]
            PhysLayerImpl::Serial(x, _) => {
                x.write_all(data).await?;
                x.flush().await
            }
            PhysLayerImpl::Loopback(x) => {
                x.write_all(data).await?;
                x.flush().await
            }
        }
    }

    /// discard whatever is already buffered on the inbound side, returning the number of bytes dropped
    pub(crate) async fn drain(&mut self) -> Result<usize, std::io::Error> {
        let mut scratch = [0u8; 256];
        let mut dropped = 0;
        loop {
            // a zero timeout still polls the read once, so only ready bytes are consumed
            match tokio::time::timeout(Duration::ZERO, self.read(&mut scratch, PhysDecodeLevel::Nothing)).await {
                Ok(Ok(0)) | Err(_) => return Ok(dropped),
                Ok(Ok(count)) => dropped += count,
                Ok(Err(err)) => return Err(err),
            }
        }
    }
}

pub(crate) struct PhysDisplay<'a> {
    level: PhysDecodeLevel,
    data: &'a [u8],
}

impl<'a> PhysDisplay<'a> {
    pub(crate) fn new(level: PhysDecodeLevel, data: &'a [u8]) -> Self {
        PhysDisplay { level, data }
    }
}

impl std::fmt::Display for PhysDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} bytes", self.data.len())?;
        if self.level.data_enabled() {
            format_bytes(f, self.data)?;
        }
        Ok(())
    }
}

const BYTES_PER_DECODE_LINE: usize = 18;

pub(crate) fn format_bytes(f: &mut std::fmt::Formatter, bytes: &[u8]) -> std::fmt::Result {
    for chunk in bytes.chunks(BYTES_PER_DECODE_LINE) {
        writeln!(f)?;
        let mut first = true;
        for byte in chunk {
            if !first {
                f.write_char(' ')?;
            }
            first = false;
            write!(f, "{byte:02X?}")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loopback_carries_bytes_both_ways() {
        let (mut a, mut b) = PhysLayer::loopback_pair();
        a.write(&[0x01, 0x02, 0x03], PhysDecodeLevel::Data)
            .await
            .unwrap();
        let mut buffer = [0u8; 8];
        let count = b.read(&mut buffer, PhysDecodeLevel::Nothing).await.unwrap();
        assert_eq!(&buffer[..count], &[0x01, 0x02, 0x03]);

        b.write(&[0xAA], PhysDecodeLevel::Nothing).await.unwrap();
        let count = a.read(&mut buffer, PhysDecodeLevel::Nothing).await.unwrap();
        assert_eq!(&buffer[..count], &[0xAA]);
        assert!(a.inter_frame_gap().is_none());
    }

    #[tokio::test]
    async fn drain_discards_only_pending_bytes() {
        let (mut a, mut b) = PhysLayer::loopback_pair();
        a.write(&[0xDE, 0xAD, 0xBE, 0xEF], PhysDecodeLevel::Nothing)
            .await
            .unwrap();
        assert_eq!(b.drain().await.unwrap(), 4);
        assert_eq!(b.drain().await.unwrap(), 0);
    }

    #[test]
    fn formats_bytes_in_fixed_width_lines() {
        struct Dump<'a>(&'a [u8]);
        impl std::fmt::Display for Dump<'_> {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                format_bytes(f, self.0)
            }
        }

        let data: Vec<u8> = (0..20).collect();
        let text = Dump(&data).to_string();
        let lines: Vec<&str> = text.lines().skip(1).collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("00 01 02"));
        assert_eq!(lines[1], "12 13");
    }
}
