//! Task errors reported to callers of the task system

use serde::{Deserialize, Serialize};
use termtask_foundation::Error;
use thiserror::Error;

pub type TaskResult<T> = std::result::Result<T, TaskError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Ignore,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskErrorCode {
    NotConfigured,
    RunningTask,
    NoBuildTask,
    NoTestTask,
    ConfigValidationError,
    TaskNotFound,
    NoValidTaskRunner,
    UnknownError,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct TaskError {
    pub severity: Severity,
    pub message: String,
    pub code: TaskErrorCode,
}

impl TaskError {
    pub fn new(severity: Severity, message: impl Into<String>, code: TaskErrorCode) -> Self {
        Self {
            severity,
            message: message.into(),
            code,
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message, TaskErrorCode::UnknownError)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message, TaskErrorCode::TaskNotFound)
    }
}

/// Infrastructure failures surface as `UnknownError`
impl From<Error> for TaskError {
    fn from(err: Error) -> Self {
        TaskError::unknown(err.to_string())
    }
}
