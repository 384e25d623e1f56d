//! Engine error types

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while executing a workflow
#[derive(Debug, Error)]
pub enum CovenantError {
    /// A task references a backend with no registered client
    #[error("backend not found: {0}")]
    BackendNotFound(String),

    /// A workflow step or branch references an undeclared task
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// A key was never published within the wait budget
    #[error("timeout waiting for key '{key}' after {waited:?}")]
    KeyTimeout { key: String, waited: Duration },

    /// A task's required key could not be resolved
    #[error("task {task}: required key '{key}' unavailable after {waited:?}")]
    RequiredKeyUnavailable {
        task: String,
        key: String,
        waited: Duration,
    },

    /// The backend kept failing until the retry budget ran out
    #[error("task {task} failed after {attempts} attempts: {cause}")]
    GenerationFailed {
        task: String,
        attempts: u32,
        cause: anyhow::Error,
    },

    /// Workflow kind is neither sequential nor parallel
    #[error("unknown workflow type: {0}")]
    UnknownWorkflowType(String),

    /// Fallback mode found no task to run
    #[error("no root task found")]
    NoRootTask,

    /// Workflow description failed structural validation
    #[error("configuration error: {0}")]
    Config(String),

    /// Workflow file could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Workflow file could not be parsed
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CovenantError {
    /// Whether the underlying provider reported an exhausted quota.
    ///
    /// Providers tag quota failures with a `QUOTA_EXCEEDED` marker in the
    /// error text; callers can match on it to suggest switching models.
    /// The engine itself never branches on this.
    pub fn is_quota_exceeded(&self) -> bool {
        match self {
            CovenantError::GenerationFailed { cause, .. } => {
                format!("{cause:#}").contains("QUOTA_EXCEEDED")
            }
            _ => false,
        }
    }
}
