//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors that can occur during framing or payload parsing.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame too short: {len} bytes (header is 3)")]
    TooShort { len: usize },

    #[error("length mismatch: header declares {declared} payload bytes, got {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("payload truncated: need {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns whether this error came from a malformed frame header.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            ProtocolError::TooShort { .. } | ProtocolError::LengthMismatch { .. }
        )
    }
}
