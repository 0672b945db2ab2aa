//! Error types for the deferred-task execution engine

use thiserror::Error;

/// Result type alias for engine operations
pub type TaskResult<T> = Result<T, TaskError>;

/// Comprehensive error types for the task engine
#[derive(Error, Debug)]
pub enum TaskError {
    /// Invalid queue or engine configuration
    #[error("configuration error: {message}")]
    Config { message: String },

    /// A handler could not be built for a persisted task row
    #[error("malformed task on queue '{queue}': {reason}")]
    MalformedTask { queue: String, reason: String },

    /// The task is past its expiry deadline (epoch seconds)
    #[error("task is over its expiry time of {expire_at}")]
    Expired { expire_at: i64 },

    /// A bounded queue has no attempts left for this task
    #[error("task has exhausted all {max_attempts} of its attempts")]
    AttemptsExhausted { max_attempts: u32 },

    /// Handler execution exceeded the queue timeout
    #[error("task run exceeded the queue timeout of {seconds}s")]
    Timeout { seconds: f64 },

    /// A time-typed input could not be normalized to a timestamp
    #[error("cannot interpret {kind} value as a time: {value}")]
    InvalidTime { kind: &'static str, value: String },

    /// A user reschedule placed run_at beyond the expiry window (epoch seconds)
    #[error("new run_at ({new_run_at}) is later than existing expire_at ({expire_at})")]
    RunAtAfterExpiry { new_run_at: i64, expire_at: i64 },

    /// Success was queried before the task ever ran
    #[error("cannot check for success before running")]
    NeverRun,

    /// Store operation errors
    #[error("store operation failed: {operation}: {reason}")]
    Store { operation: String, reason: String },

    /// Task row not found in the store
    #[error("task not found: {task_id}")]
    TaskNotFound { task_id: String },

    /// Redis backend errors
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Row or payload serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors surfaced from user handler code
    #[error("{0}")]
    Handler(#[from] anyhow::Error),
}

impl TaskError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a malformed-task error for a queue
    pub fn malformed_task<Q: Into<String>, S: Into<String>>(queue: Q, reason: S) -> Self {
        Self::MalformedTask {
            queue: queue.into(),
            reason: reason.into(),
        }
    }

    /// Create a store operation error
    pub fn store<O: Into<String>, R: Into<String>>(operation: O, reason: R) -> Self {
        Self::Store {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid-time error
    pub fn invalid_time<S: Into<String>>(kind: &'static str, value: S) -> Self {
        Self::InvalidTime {
            kind,
            value: value.into(),
        }
    }

    /// Whether this error is the expiry signal
    pub fn is_expiry(&self) -> bool {
        matches!(self, TaskError::Expired { .. })
    }

    /// Render the error with its full cause chain, one cause per line.
    ///
    /// This is the form recorded into a task row's `last_error`.
    pub fn detail(&self) -> String {
        if let TaskError::Handler(err) = self {
            let lines: Vec<String> = err.chain().map(|cause| cause.to_string()).collect();
            return lines.join("\n");
        }

        let mut lines = vec![self.to_string()];
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            lines.push(cause.to_string());
            source = cause.source();
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn expired_message_renders_epoch_seconds() {
        let err = TaskError::Expired { expire_at: 0 };
        assert_eq!(err.to_string(), "task is over its expiry time of 0");
    }

    #[test]
    fn reschedule_window_message_names_both_times() {
        let err = TaskError::RunAtAfterExpiry {
            new_run_at: 101,
            expire_at: 100,
        };
        assert_eq!(
            err.to_string(),
            "new run_at (101) is later than existing expire_at (100)"
        );
    }

    #[test]
    fn detail_joins_cause_chain_with_newlines() {
        let inner = anyhow::anyhow!("connection refused")
            .context("fetching invoice")
            .context("blorp");
        let err = TaskError::from(inner);

        let detail = err.detail();
        let lines: Vec<&str> = detail.lines().collect();
        assert_eq!(lines[0], "blorp");
        assert_eq!(lines[1], "fetching invoice");
        assert_eq!(lines[2], "connection refused");
    }
}
