use std::time::Duration;

/// Errors that occur while decoding an RTU frame or the PDU it carries
///
/// The simulator never answers a frame that fails here: garbage on the line is
/// silently discarded. The test client folds these into a failed
/// [`ModbusTestResult`](crate::client::ModbusTestResult).
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Frame is shorter than address + function code + CRC
    #[error("frame length of {0} bytes is below the minimum of 4")]
    TooShort(usize),
    /// Trailing CRC does not match the CRC calculated over the frame
    #[error("received CRC {received:#06X} does not match calculated CRC {expected:#06X}")]
    CrcMismatch {
        /// CRC carried in the frame
        received: u16,
        /// CRC computed over the frame contents
        expected: u16,
    },
    /// Function code not supported by the codec
    #[error("unsupported function code: {0:#04X}")]
    UnknownFunction(u8),
    /// PDU body has the wrong size for its function code
    #[error("PDU body of {actual} bytes, expected {expected}")]
    BadPayloadLength {
        /// length implied by the function code
        expected: usize,
        /// length actually received
        actual: usize,
    },
    /// Byte count prefix of a read response disagrees with what was requested or received
    #[error("byte count of {count} does not match the {expected} bytes expected")]
    ByteCountMismatch {
        /// byte count in the response
        count: usize,
        /// byte count implied by the request or frame length
        expected: usize,
    },
    /// Response came from a different unit than the one addressed
    #[error("response from unit {actual:#04X}, expected {expected:#04X}")]
    UnexpectedUnit {
        /// addressed unit
        expected: u8,
        /// unit found in the response
        actual: u8,
    },
    /// Response carries a different function code than the request
    #[error("response function code {actual:#04X}, expected {expected:#04X}")]
    UnexpectedFunction {
        /// function code of the request
        expected: u8,
        /// function code of the response
        actual: u8,
    },
    /// A write response did not echo the request
    #[error("write response does not echo the request")]
    ReplyEchoMismatch,
}

/// Errors raised by a byte or line transport
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// Operation requires an open connection
    #[error("not connected")]
    NotConnected,
    /// Port or socket could not be opened
    #[error("unable to open {target}: {reason}")]
    OpenFailed {
        /// serial path or socket address
        target: String,
        /// underlying failure
        reason: String,
    },
    /// I/O failure on an open channel
    #[error("I/O error: {0}")]
    Io(std::io::ErrorKind),
    /// No data arrived before the deadline
    #[error("no response within {0:?}")]
    Timeout(Duration),
    /// Peer closed the channel
    #[error("connection closed by peer")]
    Closed,
}

impl From<std::io::Error> for ConnectionError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => ConnectionError::Closed,
            kind => ConnectionError::Io(kind),
        }
    }
}
