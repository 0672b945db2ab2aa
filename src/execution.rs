//! One execution attempt: the handler under its timeout, the lifecycle
//! hooks and the structured event log around them

use std::sync::Arc;

use tracing::{error, info};

use crate::error::{TaskError, TaskResult};
use crate::handler::TaskHandler;
use crate::task::{FailureOutcome, TaskMeta};

/// Append sink for task lifecycle events.
///
/// The engine treats the sink as fallible infrastructure: an error from it
/// is reported to stderr and suppressed, never altering a task's outcome.
pub trait TaskLogger: Send + Sync {
    fn info(&self, message: &str) -> anyhow::Result<()>;
    fn error(&self, message: &str) -> anyhow::Result<()>;
}

/// Default lifecycle sink forwarding to `tracing`
pub struct TracingLogger;

impl TaskLogger for TracingLogger {
    fn info(&self, message: &str) -> anyhow::Result<()> {
        info!("{}", message);
        Ok(())
    }

    fn error(&self, message: &str) -> anyhow::Result<()> {
        error!("{}", message);
        Ok(())
    }
}

/// Transient pairing of task metadata with a freshly-built handler, alive
/// for the duration of one attempt.
pub struct TaskExecution {
    meta: TaskMeta,
    handler: Box<dyn TaskHandler>,
}

impl TaskExecution {
    pub fn new(meta: TaskMeta, handler: Box<dyn TaskHandler>) -> Self {
        Self { meta, handler }
    }

    pub fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    /// Run the handler under the queue's wall-clock budget.
    ///
    /// Refuses (as a no-op) when the task is expired; the worker drives
    /// expiry through [`TaskExecution::fail`] instead. A timeout surfaces
    /// as `TaskError::Timeout`. On success the optional `on_success` hook
    /// receives the handler's return value; a hook error is reported to
    /// stderr and suppressed.
    pub async fn run(&mut self) -> TaskResult<Option<String>> {
        if self.meta.expired() {
            return Ok(None);
        }

        let budget = self.meta.queue().timeout();
        match tokio::time::timeout(budget, self.handler.run()).await {
            Ok(Ok(result)) => {
                if let Err(hook_err) = self.handler.on_success(&result).await {
                    eprintln!("Success hook error: {}", hook_err);
                }
                Ok(Some(result))
            }
            Ok(Err(run_err)) => Err(TaskError::Handler(run_err)),
            Err(_elapsed) => Err(TaskError::Timeout {
                seconds: budget.as_secs_f64(),
            }),
        }
    }

    /// Record the failure on the metadata and fire the matching hook.
    ///
    /// Returns the state machine's tag; `on_fail`/`on_final_fail` errors
    /// are reported to stderr and suppressed.
    pub async fn fail(&mut self, error: &TaskError) -> FailureOutcome {
        let outcome = self.meta.record_failure(error);

        match outcome {
            FailureOutcome::Fail => {
                if let Err(hook_err) = self.handler.on_fail(error).await {
                    eprintln!("Fail hook error: {}", hook_err);
                }
            }
            FailureOutcome::FinalFail => {
                if let Err(hook_err) = self.handler.on_final_fail(error).await {
                    eprintln!("Final_fail hook error: {}", hook_err);
                }
            }
        }

        outcome
    }
}

/// Decorator over [`TaskExecution`] emitting the lifecycle event lines.
///
/// Sink errors are caught and reported to stderr as
/// `Task logging error: {msg}`; errors from the wrapped execution itself
/// propagate untouched.
pub struct LoggedExecution {
    inner: TaskExecution,
    logger: Arc<dyn TaskLogger>,
}

impl LoggedExecution {
    pub fn new(inner: TaskExecution, logger: Arc<dyn TaskLogger>) -> Self {
        Self { inner, logger }
    }

    pub fn meta(&self) -> &TaskMeta {
        self.inner.meta()
    }

    /// `{queue}#{id} [{data}]`
    fn ident(&self) -> String {
        let meta = self.inner.meta();
        format!(
            "{}#{} [{}]",
            meta.queue().name(),
            meta.id().map(|id| id.to_string()).unwrap_or_default(),
            meta.data().unwrap_or_default()
        )
    }

    fn emit(&self, result: anyhow::Result<()>) {
        if let Err(log_err) = result {
            eprintln!("Task logging error: {}", log_err);
        }
    }

    /// Delegate to the wrapped run; log `Task completed:` at info on a
    /// successful attempt.
    pub async fn run(&mut self) -> TaskResult<Option<String>> {
        let result = self.inner.run().await;

        if let Ok(Some(_)) = result {
            self.emit(self.logger.info(&format!("Task completed: {}", self.ident())));
        }

        result
    }

    /// Log `Task failed:` or `Task final_failed:` at error, then delegate.
    pub async fn fail(&mut self, error: &TaskError) -> FailureOutcome {
        let will_retry = self.inner.meta().retryable() && !error.is_expiry();
        let line = if will_retry {
            format!("Task failed: {}", self.ident())
        } else {
            format!("Task final_failed: {}", self.ident())
        };
        self.emit(self.logger.error(&line));

        self.inner.fail(error).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::test_support::NoopFactory;
    use crate::queue::Queue;
    use crate::task::{TaskId, TaskMeta, TimeInput};
    use chrono::Utc;
    use std::sync::Mutex;
    use uuid::Uuid;

    /// Sink collecting every event for exact-string assertions
    #[derive(Default)]
    struct CollectingLogger {
        events: Mutex<Vec<(&'static str, String)>>,
    }

    impl CollectingLogger {
        fn lines(&self) -> Vec<(&'static str, String)> {
            self.events.lock().unwrap().clone()
        }
    }

    impl TaskLogger for CollectingLogger {
        fn info(&self, message: &str) -> anyhow::Result<()> {
            self.events.lock().unwrap().push(("info", message.to_string()));
            Ok(())
        }

        fn error(&self, message: &str) -> anyhow::Result<()> {
            self.events.lock().unwrap().push(("error", message.to_string()));
            Ok(())
        }
    }

    /// Sink that always raises
    struct FailingLogger;

    impl TaskLogger for FailingLogger {
        fn info(&self, _message: &str) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("blorp"))
        }

        fn error(&self, _message: &str) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("blorp"))
        }
    }

    struct ScriptedHandler {
        run_result: Option<anyhow::Result<String>>,
        sleep_ms: u64,
        success_seen: Arc<Mutex<Option<String>>>,
        fail_seen: Arc<Mutex<Option<String>>>,
        final_fail_seen: Arc<Mutex<Option<String>>>,
        hooks_raise: bool,
    }

    impl ScriptedHandler {
        fn succeeding(result: &str) -> Self {
            Self {
                run_result: Some(Ok(result.to_string())),
                sleep_ms: 0,
                success_seen: Arc::default(),
                fail_seen: Arc::default(),
                final_fail_seen: Arc::default(),
                hooks_raise: false,
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                run_result: Some(Err(anyhow::anyhow!(message.to_string()))),
                ..Self::succeeding("")
            }
        }

        fn sleeping(ms: u64) -> Self {
            Self {
                run_result: Some(Ok(String::new())),
                sleep_ms: ms,
                ..Self::succeeding("")
            }
        }
    }

    #[async_trait::async_trait]
    impl TaskHandler for ScriptedHandler {
        async fn run(&mut self) -> anyhow::Result<String> {
            if self.sleep_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(self.sleep_ms)).await;
            }
            self.run_result.take().unwrap()
        }

        async fn on_success(&mut self, result: &str) -> anyhow::Result<()> {
            *self.success_seen.lock().unwrap() = Some(result.to_string());
            if self.hooks_raise {
                anyhow::bail!("hook exploded");
            }
            Ok(())
        }

        async fn on_fail(&mut self, error: &TaskError) -> anyhow::Result<()> {
            *self.fail_seen.lock().unwrap() = Some(error.to_string());
            if self.hooks_raise {
                anyhow::bail!("hook exploded");
            }
            Ok(())
        }

        async fn on_final_fail(&mut self, error: &TaskError) -> anyhow::Result<()> {
            *self.final_fail_seen.lock().unwrap() = Some(error.to_string());
            if self.hooks_raise {
                anyhow::bail!("hook exploded");
            }
            Ok(())
        }
    }

    fn queue() -> Arc<Queue> {
        Arc::new(
            Queue::builder("reminders", Arc::new(NoopFactory))
                .build()
                .unwrap(),
        )
    }

    fn timed_queue(seconds: f64) -> Arc<Queue> {
        Arc::new(
            Queue::builder("reminders", Arc::new(NoopFactory))
                .timeout_seconds(seconds)
                .build()
                .unwrap(),
        )
    }

    fn meta_with_id(queue: Arc<Queue>, id: TaskId, data: Option<&str>) -> TaskMeta {
        let meta = TaskMeta::new(
            queue.clone(),
            data.map(str::to_string),
            TimeInput::At(Utc::now()),
            None,
        )
        .unwrap();
        let mut row = meta.to_row();
        row.id = Some(id);
        TaskMeta::from_row(row, queue).unwrap()
    }

    #[tokio::test]
    async fn successful_run_invokes_the_success_hook() {
        let handler = ScriptedHandler::succeeding("42");
        let success_seen = handler.success_seen.clone();
        let meta = meta_with_id(queue(), Uuid::new_v4(), None);
        let mut execution = TaskExecution::new(meta, Box::new(handler));

        let result = execution.run().await.unwrap();

        assert_eq!(result.as_deref(), Some("42"));
        assert_eq!(success_seen.lock().unwrap().as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn run_error_propagates_into_the_fail_path() {
        let handler = ScriptedHandler::failing("boom");
        let fail_seen = handler.fail_seen.clone();
        let meta = meta_with_id(queue(), Uuid::new_v4(), None);
        let mut execution = TaskExecution::new(meta, Box::new(handler));

        let error = execution.run().await.unwrap_err();
        let outcome = execution.fail(&error).await;

        assert_eq!(outcome, FailureOutcome::Fail);
        assert_eq!(fail_seen.lock().unwrap().as_deref(), Some("boom"));
        assert!(execution
            .meta()
            .last_error()
            .unwrap()
            .starts_with("Task failed: "));
    }

    #[tokio::test]
    async fn slow_handler_times_out_and_the_fail_hook_sees_it() {
        let handler = ScriptedHandler::sleeping(200);
        let fail_seen = handler.fail_seen.clone();
        let mut meta = meta_with_id(timed_queue(0.1), Uuid::new_v4(), None);
        meta.add_attempt().unwrap();
        let mut execution = TaskExecution::new(meta, Box::new(handler));

        let error = execution.run().await.unwrap_err();
        assert!(matches!(error, TaskError::Timeout { .. }));

        let outcome = execution.fail(&error).await;
        assert_eq!(outcome, FailureOutcome::Fail);
        assert_eq!(execution.meta().attempts(), 1);
        assert!(fail_seen
            .lock()
            .unwrap()
            .as_deref()
            .unwrap()
            .contains("timeout"));
    }

    #[tokio::test]
    async fn expired_task_refuses_to_run() {
        let queue = queue();
        let meta = TaskMeta::new(
            queue.clone(),
            None,
            TimeInput::Epoch(0),
            Some(TimeInput::Epoch(0)),
        )
        .unwrap();
        let mut execution =
            TaskExecution::new(meta, Box::new(ScriptedHandler::succeeding("never")));

        let result = execution.run().await.unwrap();

        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn hook_errors_are_swallowed() {
        let mut handler = ScriptedHandler::succeeding("42");
        handler.hooks_raise = true;
        let meta = meta_with_id(queue(), Uuid::new_v4(), None);
        let mut execution = TaskExecution::new(meta, Box::new(handler));

        // The success hook raises; run's own result is unaffected.
        let result = execution.run().await.unwrap();
        assert_eq!(result.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn final_fail_hook_fires_on_expiry() {
        let handler = ScriptedHandler::succeeding("never");
        let final_seen = handler.final_fail_seen.clone();
        let queue = queue();
        let meta = TaskMeta::new(
            queue,
            None,
            TimeInput::Epoch(0),
            Some(TimeInput::Epoch(0)),
        )
        .unwrap();
        let mut execution = TaskExecution::new(meta, Box::new(handler));

        let error = TaskError::Expired { expire_at: 0 };
        let outcome = execution.fail(&error).await;

        assert_eq!(outcome, FailureOutcome::FinalFail);
        assert_eq!(
            final_seen.lock().unwrap().as_deref(),
            Some("task is over its expiry time of 0")
        );
    }

    #[tokio::test]
    async fn completed_run_logs_the_exact_line() {
        let id = Uuid::new_v4();
        let meta = meta_with_id(queue(), id, Some("payload"));
        let logger = Arc::new(CollectingLogger::default());
        let mut logged = LoggedExecution::new(
            TaskExecution::new(meta, Box::new(ScriptedHandler::succeeding("ok"))),
            logger.clone(),
        );

        logged.run().await.unwrap();

        assert_eq!(
            logger.lines(),
            vec![(
                "info",
                format!("Task completed: reminders#{} [payload]", id)
            )]
        );
    }

    #[tokio::test]
    async fn retryable_failure_logs_task_failed() {
        let id = Uuid::new_v4();
        let meta = meta_with_id(queue(), id, Some("payload"));
        let logger = Arc::new(CollectingLogger::default());
        let mut logged = LoggedExecution::new(
            TaskExecution::new(meta, Box::new(ScriptedHandler::failing("boom"))),
            logger.clone(),
        );

        let error = logged.run().await.unwrap_err();
        let outcome = logged.fail(&error).await;

        assert_eq!(outcome, FailureOutcome::Fail);
        assert_eq!(
            logger.lines(),
            vec![("error", format!("Task failed: reminders#{} [payload]", id))]
        );
    }

    #[tokio::test]
    async fn terminal_failure_logs_task_final_failed() {
        let id = Uuid::new_v4();
        let queue = Arc::new(
            Queue::builder("reminders", Arc::new(NoopFactory))
                .max_attempts(1)
                .build()
                .unwrap(),
        );
        let mut meta = meta_with_id(queue, id, None);
        meta.add_attempt().unwrap();
        let logger = Arc::new(CollectingLogger::default());
        let mut logged = LoggedExecution::new(
            TaskExecution::new(meta, Box::new(ScriptedHandler::failing("boom"))),
            logger.clone(),
        );

        let error = logged.run().await.unwrap_err();
        logged.fail(&error).await;

        assert_eq!(
            logger.lines(),
            vec![("error", format!("Task final_failed: reminders#{} []", id))]
        );
    }

    #[tokio::test]
    async fn broken_logger_does_not_affect_the_run() {
        let meta = meta_with_id(queue(), Uuid::new_v4(), None);
        let mut logged = LoggedExecution::new(
            TaskExecution::new(meta, Box::new(ScriptedHandler::succeeding("ok"))),
            Arc::new(FailingLogger),
        );

        let result = logged.run().await.unwrap();

        assert_eq!(result.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn broken_logger_does_not_affect_the_fail_outcome() {
        let meta = meta_with_id(queue(), Uuid::new_v4(), None);
        let mut logged = LoggedExecution::new(
            TaskExecution::new(meta, Box::new(ScriptedHandler::failing("boom"))),
            Arc::new(FailingLogger),
        );

        let error = logged.run().await.unwrap_err();
        let outcome = logged.fail(&error).await;

        assert_eq!(outcome, FailureOutcome::Fail);
        assert!(logged
            .meta()
            .last_error()
            .unwrap()
            .starts_with("Task failed: "));
    }
}
