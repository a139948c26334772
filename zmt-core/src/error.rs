//! Core error types.

use crate::event::EventId;
use crate::inbox::TaskId;
use thiserror::Error;
use zmt_protocol::Status;

/// Errors from the internal RPC engine.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("task not registered: {0}")]
    TaskNotFound(TaskId),

    #[error("task already registered: {0}")]
    TaskExists(TaskId),

    #[error("inbox full for task {task} (capacity {capacity})")]
    InboxFull { task: TaskId, capacity: usize },

    #[error("engine queue full")]
    QueueFull,

    #[error("engine stopped")]
    EngineStopped,

    #[error("envelope allocation failed: {requested} bytes requested, {available} available")]
    AllocationFailed { requested: usize, available: usize },

    #[error("response type mismatch for {event_id}")]
    ResponseMismatch { event_id: EventId },
}

impl CoreError {
    /// Returns whether a later attempt could succeed without intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::InboxFull { .. } | CoreError::QueueFull | CoreError::AllocationFailed { .. }
        )
    }

    /// Returns the status byte reported to an RPC caller for this error.
    pub fn status(&self) -> Status {
        match self {
            CoreError::AllocationFailed { .. } => Status::MEM_ERROR,
            CoreError::QueueFull | CoreError::InboxFull { .. } => Status::BUFFER_FULL,
            CoreError::TaskNotFound(_) | CoreError::TaskExists(_) => Status::INVALID_PARAMETER,
            CoreError::EngineStopped | CoreError::ResponseMismatch { .. } => Status::FAILURE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let err = CoreError::AllocationFailed {
            requested: 64,
            available: 8,
        };
        assert_eq!(err.status(), Status::MEM_ERROR);
        assert!(err.is_retryable());

        assert_eq!(CoreError::QueueFull.status(), Status::BUFFER_FULL);
        assert_eq!(CoreError::EngineStopped.status(), Status::FAILURE);
        assert!(!CoreError::EngineStopped.is_retryable());
    }

    #[test]
    fn test_display() {
        let err = CoreError::InboxFull {
            task: TaskId(3),
            capacity: 16,
        };
        assert_eq!(err.to_string(), "inbox full for task 3 (capacity 16)");
    }
}
