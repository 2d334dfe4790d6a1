// Error types for saga execution

use serde_json::Value;
use thiserror::Error;

use crate::task::TaskId;

/// Errors delivered to a saga (the `isError` resumption path) or settled on a task.
///
/// Cloneable so that one task outcome can be handed to every joiner.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SagaError {
    #[error("call rejected: {0}")]
    Rejected(Value),

    #[error("dispatch failed: {0}")]
    Dispatch(String),

    #[error("could not schedule deferred completion: {0}")]
    Spawn(String),

    #[error("task {task} exceeded {limit} steps without suspending")]
    StepLimit { task: TaskId, limit: usize },

    #[error("task {0} was dropped before it settled")]
    Abandoned(TaskId),

    #[error("{0}")]
    Failed(String),
}

impl SagaError {
    /// Rejection carrying an arbitrary payload as its reason.
    pub fn rejected(reason: impl Into<Value>) -> Self {
        SagaError::Rejected(reason.into())
    }

    pub fn failed(msg: impl Into<String>) -> Self {
        SagaError::Failed(msg.into())
    }

    /// The rejection payload, if this error came from a failed call.
    pub fn reason(&self) -> Option<&Value> {
        match self {
            SagaError::Rejected(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Result type for saga operations
pub type Result<T> = std::result::Result<T, SagaError>;
