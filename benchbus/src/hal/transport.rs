use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::error::ConnectionError;
use crate::hal::config::{ConnectionConfig, TransportKind};

const LINE_TERMINATOR: &str = "\r\n";

// open byte channel, buffered for line reads
enum Channel {
    #[cfg(feature = "serial")]
    Serial(BufReader<tokio_serial::SerialStream>),
    Tcp(BufReader<tokio::net::TcpStream>),
    #[cfg(test)]
    Mock(BufReader<tokio_test::io::Mock>),
}

impl Channel {
    async fn write_line(&mut self, line: &[u8]) -> std::io::Result<()> {
        match self {
            #[cfg(feature = "serial")]
            Channel::Serial(x) => {
                x.write_all(line).await?;
                x.flush().await
            }
            Channel::Tcp(x) => {
                x.write_all(line).await?;
                x.flush().await
            }
            #[cfg(test)]
            Channel::Mock(x) => {
                x.write_all(line).await?;
                x.flush().await
            }
        }
    }

    async fn read_line(&mut self, line: &mut String) -> std::io::Result<usize> {
        match self {
            #[cfg(feature = "serial")]
            Channel::Serial(x) => x.read_line(line).await,
            Channel::Tcp(x) => x.read_line(line).await,
            #[cfg(test)]
            Channel::Mock(x) => x.read_line(line).await,
        }
    }

    async fn shutdown(&mut self) -> std::io::Result<()> {
        match self {
            #[cfg(feature = "serial")]
            Channel::Serial(x) => x.shutdown().await,
            Channel::Tcp(x) => x.shutdown().await,
            #[cfg(test)]
            Channel::Mock(_) => Ok(()),
        }
    }
}

/// Line-oriented command/response channel to an instrument
///
/// Commands are sent terminated with `\r\n`. Queries (commands ending in `?`)
/// wait for exactly one reply line, bounded by the configured timeout, and the
/// reply is returned with trailing whitespace stripped. Other commands do not
/// wait for a reply and yield an empty string.
///
/// Any failure on an open channel closes it. A late or partial reply would
/// otherwise be read as the answer to the next query; call
/// [`Transport::connect`] to start a fresh session.
pub struct Transport {
    config: ConnectionConfig,
    channel: Option<Channel>,
    last_error: Option<String>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("target", &self.config.target())
            .field("kind", &self.config.transport_kind)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Transport {
    /// transport for `config`, not yet connected
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            channel: None,
            last_error: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn mock(mock: tokio_test::io::Mock) -> Self {
        Self {
            config: ConnectionConfig::tcp("mock", 0),
            channel: Some(Channel::Mock(BufReader::new(mock))),
            last_error: None,
        }
    }

    /// connection parameters
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// true while the channel is open
    pub fn is_connected(&self) -> bool {
        self.channel.is_some()
    }

    /// text of the most recent failure
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// open the serial port or socket, a no-op if already open
    pub async fn connect(&mut self) -> Result<(), ConnectionError> {
        if self.channel.is_some() {
            return Ok(());
        }
        match self.open().await {
            Ok(channel) => {
                tracing::info!("connected to {}", self.config.target());
                self.channel = Some(channel);
                self.last_error = None;
                Ok(())
            }
            Err(err) => {
                tracing::warn!("{}", err);
                self.last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    async fn open(&self) -> Result<Channel, ConnectionError> {
        let target = self.config.target();
        let open_failed = |reason: String| ConnectionError::OpenFailed {
            target: target.clone(),
            reason,
        };

        match self.config.transport_kind {
            TransportKind::Tcp => {
                let port = self
                    .config
                    .port
                    .ok_or_else(|| open_failed("no TCP port configured".to_string()))?;
                let connect = tokio::net::TcpStream::connect((self.config.address.as_str(), port));
                match tokio::time::timeout(self.config.timeout, connect).await {
                    Err(_) => Err(ConnectionError::Timeout(self.config.timeout)),
                    Ok(Err(err)) => Err(open_failed(err.to_string())),
                    Ok(Ok(socket)) => Ok(Channel::Tcp(BufReader::new(socket))),
                }
            }
            #[cfg(feature = "serial")]
            TransportKind::Serial => {
                let stream = crate::serial::open(&self.config.address, self.config.serial_settings())
                    .map_err(|err| open_failed(err.to_string()))?;
                Ok(Channel::Serial(BufReader::new(stream)))
            }
            #[cfg(not(feature = "serial"))]
            TransportKind::Serial => Err(open_failed("serial support is not enabled".to_string())),
        }
    }

    /// close the channel
    pub async fn disconnect(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            if let Err(err) = channel.shutdown().await {
                tracing::debug!("error closing {}: {}", self.config.target(), err);
            }
            tracing::info!("disconnected from {}", self.config.target());
        }
    }

    /// send one command, and for queries wait for the reply line
    pub async fn send_command(&mut self, command: &str) -> Result<String, ConnectionError> {
        let result = self.exchange(command).await;
        if let Err(err) = &result {
            self.last_error = Some(err.to_string());
            if self.channel.is_some() {
                tracing::warn!("{} failed on {}: {}", command, self.config.target(), err);
                self.disconnect().await;
            }
        }
        result
    }

    async fn exchange(&mut self, command: &str) -> Result<String, ConnectionError> {
        let timeout = self.config.timeout;
        let channel = self.channel.as_mut().ok_or(ConnectionError::NotConnected)?;

        tracing::debug!("TX: {}", command);
        let line = format!("{command}{LINE_TERMINATOR}");
        tokio::time::timeout(timeout, channel.write_line(line.as_bytes()))
            .await
            .map_err(|_| ConnectionError::Timeout(timeout))??;

        if !command.trim_end().ends_with('?') {
            return Ok(String::new());
        }

        let mut reply = String::new();
        let count = tokio::time::timeout(timeout, channel.read_line(&mut reply))
            .await
            .map_err(|_| ConnectionError::Timeout(timeout))??;
        if count == 0 {
            // peer closed the channel
            self.channel = None;
            return Err(ConnectionError::Closed);
        }

        let reply = reply.trim_end().to_string();
        tracing::debug!("RX: {}", reply);
        Ok(reply)
    }
}
