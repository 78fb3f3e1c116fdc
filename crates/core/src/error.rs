// crates/core/src/error.rs
use std::time::Duration;
use thiserror::Error;

use benchstream_types::{JobId, JobStatus};

/// Errors raised by the ephemeral and durable store capabilities.
///
/// All variants are treated as transient by the sync loops: the unit of
/// work that hit them is skipped and retried on the next tick.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store call `{op}` timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    #[error("Wrong value type at key {key}: expected {expected}")]
    WrongType { key: String, expected: &'static str },

    #[error("Backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }

    /// The store could not be reached in time; the same call may succeed later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout { .. })
    }
}

/// Errors returned by the job queue contract.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job {job_id}: illegal status transition {from} -> {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::Timeout {
            op: "list_range",
            after: Duration::from_secs(5),
        };
        assert_eq!(err.to_string(), "Store call `list_range` timed out after 5s");

        let err = StoreError::WrongType {
            key: "bench_job:1".into(),
            expected: "hash",
        };
        assert!(err.to_string().contains("bench_job:1"));
        assert!(!err.is_transient());
        assert!(StoreError::Unavailable("down".into()).is_transient());
    }

    #[test]
    fn test_queue_error_display() {
        let err = QueueError::InvalidTransition {
            job_id: "j1".into(),
            from: JobStatus::Completed,
            to: JobStatus::Running,
        };
        assert_eq!(
            err.to_string(),
            "Job j1: illegal status transition completed -> running"
        );

        let err: QueueError = StoreError::Unavailable("down".into()).into();
        assert_eq!(err.to_string(), "Store unavailable: down");
    }
}
