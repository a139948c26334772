//! Server error types.

use crate::config::ConfigError;
use thiserror::Error;
use zmt_protocol::Subsystem;

/// Server errors.
///
/// Nothing a host sends over the wire ends up here; malformed frames and
/// failed commands are answered with status bytes. These are the failures of
/// the server itself.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] zmt_protocol::ProtocolError),

    #[error("core error: {0}")]
    Core(#[from] zmt_core::CoreError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("subsystem {0} registered twice")]
    DuplicateHandler(Subsystem),

    #[error("server shutting down")]
    ShuttingDown,
}

impl ServerError {
    /// Short machine-readable label used in logs and metrics.
    pub fn error_code(&self) -> &'static str {
        match self {
            ServerError::Io(_) => "IO_ERROR",
            ServerError::Protocol(_) => "PROTOCOL_ERROR",
            ServerError::Core(_) => "CORE_ERROR",
            ServerError::Config(_) => "CONFIG_ERROR",
            ServerError::Metrics(_) => "METRICS_ERROR",
            ServerError::DuplicateHandler(_) => "DUPLICATE_HANDLER",
            ServerError::ShuttingDown => "SHUTTING_DOWN",
        }
    }

    /// Returns whether the connection or operation may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServerError::Io(_) | ServerError::ShuttingDown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = ServerError::DuplicateHandler(Subsystem::Sys);
        assert_eq!(err.error_code(), "DUPLICATE_HANDLER");
        assert!(err.to_string().contains("SYS"));
        assert!(!err.is_retryable());

        let err: ServerError = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone").into();
        assert_eq!(err.error_code(), "IO_ERROR");
        assert!(err.is_retryable());
    }
}
