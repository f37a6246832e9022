//! Modbus engine error types

use thiserror::Error;

/// Result type for scada-modbus operations
pub type Result<T> = std::result::Result<T, ModbusError>;

/// Framing violations detected while reading an ADU
#[derive(Debug, Error)]
pub enum FrameError {
    /// Peer closed the stream before a new header started
    #[error("peer disconnected")]
    Disconnected,

    /// Stream ended inside the MBAP header
    #[error("MBAP header is too short ({got} < {expected})")]
    HeaderTruncated { got: usize, expected: usize },

    /// Length field outside the range a Modbus/TCP frame can carry
    #[error("invalid MBAP length field: {0}")]
    InvalidLength(u16),

    /// Stream ended inside the PDU
    #[error("PDU has been truncated ({got} < {expected})")]
    PduTruncated { got: usize, expected: usize },

    /// PDU body shorter than its function code requires
    #[error("malformed PDU: {0}")]
    MalformedPdu(String),

    /// Underlying socket failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Modbus engine errors
#[derive(Debug, Error)]
pub enum ModbusError {
    /// Framing errors
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Connection errors
    #[error("Connection error: {0}")]
    Connection(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// IO errors
    #[error("IO error: {0}")]
    Io(String),

    /// Request arguments rejected before reaching the wire
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Write past the fixed PDU capacity
    #[error("PDU overflow: {needed} bytes needed, {available} available")]
    PduOverflow { needed: usize, available: usize },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The generator kept yielding ids that are still waiting for a confirmation
    #[error("Transaction id {0} is still in flight")]
    TransactionIdInUse(u16),
}

impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        ModbusError::Io(err.to_string())
    }
}

impl From<figment::Error> for ModbusError {
    fn from(err: figment::Error) -> Self {
        ModbusError::Config(err.to_string())
    }
}

// Helper methods for creating errors
impl ModbusError {
    pub fn connection(msg: impl Into<String>) -> Self {
        ModbusError::Connection(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        ModbusError::InvalidArgument(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        ModbusError::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_error_display() {
        let err = FrameError::HeaderTruncated {
            got: 3,
            expected: 7,
        };
        assert_eq!(err.to_string(), "MBAP header is too short (3 < 7)");

        let err = ModbusError::from(FrameError::Disconnected);
        assert!(err.to_string().contains("peer disconnected"));

        let err = ModbusError::TransactionIdInUse(5);
        assert_eq!(err.to_string(), "Transaction id 5 is still in flight");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err: ModbusError = io.into();
        assert!(matches!(err, ModbusError::Io(ref msg) if msg.contains("reset by peer")));
    }
}
