//! User-supplied task handlers and the capability surface they build from

use std::any::Any;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::client::Scheduler;
use crate::error::{TaskError, TaskResult};
use crate::execution::TaskLogger;
use crate::queue::QueueName;
use crate::task::TaskId;

/// Opaque dependency object applications thread into their handlers
pub type Container = Arc<dyn Any + Send + Sync>;

/// Lifecycle hooks a handler may implement.
///
/// `run` is mandatory; the other hooks default to no-ops. A fresh handler
/// instance is built for every attempt, so no state leaks between attempts.
///
/// Hook error semantics: an error from `run` is the attempt's failure and
/// drives the retry state machine. Errors from `on_success`, `on_fail` and
/// `on_final_fail` are caught by the engine, reported to stderr and
/// suppressed; they never change the recorded outcome.
#[async_trait::async_trait]
pub trait TaskHandler: Send {
    /// Perform the task. The returned string is the task's result value,
    /// passed to `on_success`.
    async fn run(&mut self) -> anyhow::Result<String>;

    /// Called after a successful run with the run's return value
    async fn on_success(&mut self, _result: &str) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called after a failure that will be retried
    async fn on_fail(&mut self, _error: &TaskError) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called after a terminal failure (attempts exhausted or expired)
    async fn on_final_fail(&mut self, _error: &TaskError) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Builds a fresh handler instance for one execution attempt.
///
/// The factory receives a [`HandlerContext`] and takes only the
/// capabilities it wants from it; nothing is injected unrequested. A build
/// failure is a malformed task and permanently fails the row.
pub trait HandlerFactory: Send + Sync {
    fn build(&self, ctx: HandlerContext<'_>) -> TaskResult<Box<dyn TaskHandler>>;
}

impl<F> HandlerFactory for F
where
    F: Fn(HandlerContext<'_>) -> TaskResult<Box<dyn TaskHandler>> + Send + Sync,
{
    fn build(&self, ctx: HandlerContext<'_>) -> TaskResult<Box<dyn TaskHandler>> {
        self(ctx)
    }
}

/// Capability set offered to a handler factory for one attempt: the task's
/// payload, the application container, the lifecycle logger and the
/// scheduler handle for enqueueing follow-up work.
pub struct HandlerContext<'a> {
    queue: &'a QueueName,
    task_id: Option<TaskId>,
    data: Option<&'a str>,
    container: Option<&'a Container>,
    logger: &'a Arc<dyn TaskLogger>,
    scheduler: &'a Scheduler,
}

impl<'a> HandlerContext<'a> {
    pub(crate) fn new(
        queue: &'a QueueName,
        task_id: Option<TaskId>,
        data: Option<&'a str>,
        container: Option<&'a Container>,
        logger: &'a Arc<dyn TaskLogger>,
        scheduler: &'a Scheduler,
    ) -> Self {
        Self {
            queue,
            task_id,
            data,
            container,
            logger,
            scheduler,
        }
    }

    pub fn queue(&self) -> &QueueName {
        self.queue
    }

    pub fn task_id(&self) -> Option<TaskId> {
        self.task_id
    }

    /// The raw serialized payload, if the submission carried one
    pub fn raw_data(&self) -> Option<&str> {
        self.data
    }

    /// Deserialize the payload into the handler's own type.
    ///
    /// Fails as a malformed task when the row carries no payload or the
    /// payload does not deserialize.
    pub fn data<T: DeserializeOwned>(&self) -> TaskResult<T> {
        let raw = self.data.ok_or_else(|| {
            TaskError::malformed_task(
                self.queue.as_str(),
                "handler requested data but the task row carries none",
            )
        })?;

        serde_json::from_str(raw).map_err(|e| {
            TaskError::malformed_task(
                self.queue.as_str(),
                format!("payload does not deserialize: {}", e),
            )
        })
    }

    /// Downcast the application container, if one was configured
    pub fn container<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.container.and_then(|c| c.downcast_ref::<T>())
    }

    /// The lifecycle logger for this queue's worker
    pub fn logger(&self) -> Arc<dyn TaskLogger> {
        Arc::clone(self.logger)
    }

    /// Submission handle for enqueueing follow-up tasks
    pub fn scheduler(&self) -> Scheduler {
        self.scheduler.clone()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Handlers shared across the crate's unit tests

    use super::*;

    /// Factory producing a handler that succeeds immediately
    pub struct NoopFactory;

    impl HandlerFactory for NoopFactory {
        fn build(&self, _ctx: HandlerContext<'_>) -> TaskResult<Box<dyn TaskHandler>> {
            Ok(Box::new(NoopHandler))
        }
    }

    pub struct NoopHandler;

    #[async_trait::async_trait]
    impl TaskHandler for NoopHandler {
        async fn run(&mut self) -> anyhow::Result<String> {
            Ok(String::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::TracingLogger;
    use crate::store::InMemoryTaskStore;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Invoice {
        number: u32,
    }

    fn scheduler() -> Scheduler {
        Scheduler::new(Arc::new(InMemoryTaskStore::new()))
    }

    #[test]
    fn data_deserializes_the_payload() {
        let queue = QueueName::new("billing").unwrap();
        let logger: Arc<dyn TaskLogger> = Arc::new(TracingLogger);
        let scheduler = scheduler();
        let ctx = HandlerContext::new(
            &queue,
            None,
            Some(r#"{"number": 42}"#),
            None,
            &logger,
            &scheduler,
        );

        let invoice: Invoice = ctx.data().unwrap();
        assert_eq!(invoice.number, 42);
    }

    #[test]
    fn data_on_a_payloadless_row_is_malformed() {
        let queue = QueueName::new("billing").unwrap();
        let logger: Arc<dyn TaskLogger> = Arc::new(TracingLogger);
        let scheduler = scheduler();
        let ctx = HandlerContext::new(&queue, None, None, None, &logger, &scheduler);

        let result: TaskResult<Invoice> = ctx.data();
        assert!(matches!(result, Err(TaskError::MalformedTask { .. })));
    }

    #[test]
    fn container_downcasts_to_the_concrete_type() {
        struct Deps {
            api_key: &'static str,
        }

        let queue = QueueName::new("billing").unwrap();
        let logger: Arc<dyn TaskLogger> = Arc::new(TracingLogger);
        let scheduler = scheduler();
        let container: Container = Arc::new(Deps { api_key: "sekrit" });
        let ctx = HandlerContext::new(&queue, None, None, Some(&container), &logger, &scheduler);

        assert_eq!(ctx.container::<Deps>().unwrap().api_key, "sekrit");
        assert!(ctx.container::<String>().is_none());
    }
}
