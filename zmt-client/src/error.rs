//! Client error types.

use thiserror::Error;
use zmt_protocol::RpcStatus;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] zmt_protocol::ProtocolError),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("request timeout")]
    Timeout,

    /// The bridge rejected the request with an error SRSP.
    #[error("request rejected: {status:?}")]
    Rpc { status: RpcStatus },

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl ClientError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_) | ClientError::Timeout | ClientError::ConnectionClosed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(ClientError::Timeout.is_retryable());
        assert!(ClientError::ConnectionClosed.is_retryable());
        assert!(!ClientError::NotConnected.is_retryable());
        assert!(!ClientError::Rpc {
            status: RpcStatus::ErrCommandId
        }
        .is_retryable());
    }

    #[test]
    fn test_display() {
        let err = ClientError::Rpc {
            status: RpcStatus::ErrSubsystem,
        };
        assert_eq!(err.to_string(), "request rejected: ErrSubsystem");
    }
}
