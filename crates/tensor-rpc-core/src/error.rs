//! Error types for the tensor RPC protocol.
//!
//! Errors fall into four groups that decide how far they propagate:
//!
//! - **Transport** and **protocol** errors end the owning connection.
//! - **Application** and **backend** errors are reported to the peer as a
//!   failed response and the connection stays open.

use thiserror::Error;

/// Main error type for the tensor RPC library.
#[derive(Debug, Error)]
pub enum RpcError {
    // Transport errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Connection closed")]
    ConnectionClosed,

    // Protocol errors
    #[error("Invalid command byte: {0}")]
    InvalidCommand(u8),

    #[error("Message size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("Message size {size} exceeds maximum {max}")]
    MessageTooLarge { size: u64, max: u64 },

    #[error("Malformed message: {message}")]
    Malformed { message: String },

    // Application errors
    #[error("Unknown buffer handle: {0:#x}")]
    UnknownBuffer(u64),

    #[error("Out of bounds: {message}")]
    OutOfBounds { message: String },

    #[error("Invalid tensor {id}: {message}")]
    InvalidTensor { id: u64, message: String },

    #[error("Tensor {0} is referenced but not present in the graph")]
    UnknownTensor(u64),

    #[error("Tensor {0} appears more than once in the graph")]
    DuplicateTensor(u64),

    #[error("Cycle detected at tensor {0}")]
    GraphCycle(u64),

    #[error("Tensor {id} views tensor {view_src}, which is not declared before it")]
    ForwardViewReference { id: u64, view_src: u64 },

    // Backend errors
    #[error("Backend error: {message}")]
    Backend { message: String },

    #[error("Backend allocation of {size} bytes failed")]
    AllocationFailed { size: u64 },

    // Server errors
    #[error("Invalid connection state transition: {from} -> {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias for RPC operations.
pub type Result<T> = std::result::Result<T, RpcError>;

impl From<std::io::Error> for RpcError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            return RpcError::ConnectionClosed;
        }
        RpcError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::Config {
            message: err.to_string(),
        }
    }
}

impl RpcError {
    /// Create a malformed-message error.
    pub fn malformed(message: impl Into<String>) -> Self {
        RpcError::Malformed {
            message: message.into(),
        }
    }

    /// Create an invalid-tensor error for the descriptor with the given id.
    pub fn invalid_tensor(id: u64, message: impl Into<String>) -> Self {
        RpcError::InvalidTensor {
            id,
            message: message.into(),
        }
    }

    /// Create an out-of-bounds error.
    pub fn out_of_bounds(message: impl Into<String>) -> Self {
        RpcError::OutOfBounds {
            message: message.into(),
        }
    }

    /// Check whether this error must terminate the connection.
    ///
    /// Transport failures and protocol violations leave the byte stream in an
    /// unknown position, so the connection cannot be reused.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RpcError::Io { .. }
                | RpcError::ConnectionClosed
                | RpcError::InvalidCommand(_)
                | RpcError::SizeMismatch { .. }
                | RpcError::MessageTooLarge { .. }
                | RpcError::Malformed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RpcError::UnknownBuffer(0x1f);
        assert_eq!(err.to_string(), "Unknown buffer handle: 0x1f");

        let err = RpcError::SizeMismatch {
            expected: 9,
            actual: 17,
        };
        assert_eq!(
            err.to_string(),
            "Message size mismatch: expected 9 bytes, got 17"
        );
    }

    #[test]
    fn test_fatal_errors() {
        assert!(RpcError::ConnectionClosed.is_fatal());
        assert!(RpcError::InvalidCommand(255).is_fatal());
        assert!(RpcError::SizeMismatch {
            expected: 1,
            actual: 2
        }
        .is_fatal());

        assert!(!RpcError::UnknownBuffer(1).is_fatal());
        assert!(!RpcError::GraphCycle(7).is_fatal());
        assert!(!RpcError::AllocationFailed { size: 64 }.is_fatal());
    }

    #[test]
    fn test_unexpected_eof_maps_to_connection_closed() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(RpcError::from(io), RpcError::ConnectionClosed));

        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        assert!(matches!(RpcError::from(io), RpcError::Io { .. }));
    }
}
