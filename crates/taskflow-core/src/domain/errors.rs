//! Errors - エラー型と分類
//!
//! # 分類
//! - **DispatchError**: dispatch 時点で判明するエラー（handler 未登録など）。handler は一切実行されない
//! - **TaskError**: 実行中のエラー。`TaskHandle` を await した呼び出し側に届く
//! - **EvaluationError**: `${token}` の解決失敗。`TaskError::ExecutionFailed` の cause として伝播する
//! - **Interrupted**: `shutdown_now` による中断。これも `ExecutionFailed` の cause になる

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use super::ids::TaskId;
use super::state::Status;
use crate::app::pool::PoolError;

/// Error type handlers may raise. Anything that implements `Error` converts via `?`.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Shared cause kept by both the task and the caller's handle.
pub type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

/// Errors surfaced before any handler runs.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no suitable handler found for payload type {payload_type}")]
    NoSuitableHandlerFound { payload_type: &'static str },

    #[error("handler for payload type {payload_type} does not produce {result_type}")]
    ResultTypeMismatch {
        payload_type: &'static str,
        result_type: &'static str,
    },

    #[error("task {task_id} was already dispatched (status: {status})")]
    AlreadyDispatched { task_id: TaskId, status: Status },

    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Errors observed through a `TaskHandle` (and stored as the task's failure cause).
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    #[error("execution failed with [{message}]")]
    ExecutionFailed {
        message: String,
        #[source]
        cause: SharedError,
    },

    #[error("task {task_id} was stopped before it started")]
    Stopped { task_id: TaskId },

    #[error("illegal status transition {from} -> {to}")]
    IllegalTransition { from: Status, to: Status },

    #[error("worker for task {task_id} terminated abnormally: {reason}")]
    Aborted { task_id: TaskId, reason: String },
}

impl TaskError {
    /// Wrap any handler failure, keeping it as `source()`.
    pub fn execution_failed(cause: BoxError) -> Self {
        Self::ExecutionFailed {
            message: cause.to_string(),
            cause: Arc::from(cause),
        }
    }

    /// The wrapped handler failure, if this is `ExecutionFailed`.
    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        match self {
            TaskError::ExecutionFailed { cause, .. } => Some(cause.as_ref()),
            _ => None,
        }
    }
}

/// `${token}` 解決のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvaluationError {
    #[error("no value found for token '{0}'")]
    Unresolved(String),

    #[error("token expansion refers to itself or nests deeper than {limit} levels: [{text}]")]
    RecursionLimit { limit: usize, text: String },

    #[error("resolved text exceeds {limit} bytes")]
    TooLong { limit: usize },

    #[error("failed to evaluate [{expression}]: {reason}")]
    Invalid { expression: String, reason: String },

    #[error("invalid token pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Raised when work is interrupted by `shutdown_now`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("interrupted after waiting {waited:?}")]
pub struct Interrupted {
    pub waited: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_failed_keeps_original_cause() {
        let err = TaskError::execution_failed(Box::new(EvaluationError::Unresolved(
            "name".to_string(),
        )));

        assert_eq!(
            err.to_string(),
            "execution failed with [no value found for token 'name']"
        );
        let cause = err.cause().unwrap();
        assert_eq!(
            cause.downcast_ref::<EvaluationError>(),
            Some(&EvaluationError::Unresolved("name".to_string()))
        );
        assert!(err.source().is_some());
    }

    #[test]
    fn task_error_is_cloneable() {
        let err = TaskError::execution_failed("boom".into());
        let copy = err.clone();
        assert_eq!(err.to_string(), copy.to_string());
    }

    #[test]
    fn dispatch_error_names_the_payload_type() {
        let err = DispatchError::NoSuitableHandlerFound {
            payload_type: std::any::type_name::<i32>(),
        };
        assert_eq!(
            err.to_string(),
            "no suitable handler found for payload type i32"
        );
    }
}
