use std::{io, time::Duration};

use thiserror::Error;

/// Faults scoped to a single connection. None of them take the process down.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("malformed payload: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("stream error: {0}")]
    Stream(#[from] io::Error),

    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("username '{0}' is already in use")]
    DuplicateUsername(String),

    #[error("relay is shutting down")]
    ShuttingDown,
}

impl RelayError {
    /// Whether the session can keep reading after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RelayError::Decode(_))
    }
}

pub type Result<T, E = RelayError> = std::result::Result<T, E>;
