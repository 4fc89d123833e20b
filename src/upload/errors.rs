use thiserror::Error;
use crate::transport::TransportError;
use super::types::{TaskId, UploadStatus};

/// Pre-flight rejection of a candidate file. Never produces a task.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("File size exceeds maximum allowed size of {max_mib}MB")]
    TooLarge {
        max_mib: u64,
    },

    #[error("File type is not allowed. Allowed types: {}", allowed.join(", "))]
    TypeNotAllowed {
        allowed: Vec<String>,
    },
}

/// A transport reported fewer bytes than it already had for the same task.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Transport reported regressing progress: {reported} bytes after {previous}")]
pub struct ProgressRegression {
    pub previous: u64,
    pub reported: u64,
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Invalid upload target: {0}")]
    InvalidTarget(String),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Task {task_id} is {status:?}, cannot {action}")]
    InvalidState {
        task_id: TaskId,
        status: UploadStatus,
        action: &'static str,
    },

    #[error("Retry limit exceeded: {attempts} attempts")]
    RetryLimitExceeded {
        attempts: u32,
    },

    #[error("Manager shut down")]
    ManagerShutdown,

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    pub fn invalid_target(message: impl Into<String>) -> Self {
        Self::InvalidTarget(message.into())
    }

    pub fn invalid_state(task_id: TaskId, status: UploadStatus, action: &'static str) -> Self {
        Self::InvalidState { task_id, status, action }
    }
}

/// Error alias
pub type Result<T, E = UploadError> = std::result::Result<T, E>;
