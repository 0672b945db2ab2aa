//! Submission handle: deferring, rescheduling and cancelling tasks

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::debug;

use crate::error::{TaskError, TaskResult};
use crate::queue::{Queue, QueueName};
use crate::store::TaskStore;
use crate::task::{TaskId, TaskMeta, TimeInput};

/// One deferred submission: the payload and its scheduling window
#[derive(Default)]
pub struct Submission {
    data: Option<String>,
    run_at: Option<TimeInput>,
    expire_at: Option<TimeInput>,
}

impl Submission {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize a payload for the handler to deserialize on each attempt
    pub fn data<T: Serialize>(mut self, payload: &T) -> TaskResult<Self> {
        self.data = Some(serde_json::to_string(payload)?);
        Ok(self)
    }

    /// Attach an already-serialized payload
    pub fn raw_data<S: Into<String>>(mut self, payload: S) -> Self {
        self.data = Some(payload.into());
        self
    }

    /// When the task becomes runnable; defaults to now
    pub fn run_at<T: Into<TimeInput>>(mut self, run_at: T) -> Self {
        self.run_at = Some(run_at.into());
        self
    }

    /// Deadline after which the task must not run
    pub fn expire_at<T: Into<TimeInput>>(mut self, expire_at: T) -> Self {
        self.expire_at = Some(expire_at.into());
        self
    }
}

/// Handle for putting work off until later.
///
/// Thin layer over the store: `delay` persists a fresh row, `reschedule`
/// applies the user reschedule path to an existing row, `cancel` removes
/// one. Cloneable; workers hand a clone to every handler that asks for
/// the scheduler capability.
#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn TaskStore>,
    queues: Arc<HashMap<QueueName, Arc<Queue>>>,
}

impl Scheduler {
    /// A scheduler with no registered queues; submissions fail until
    /// queues are wired in (normally by the engine configuration).
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self {
            store,
            queues: Arc::new(HashMap::new()),
        }
    }

    pub(crate) fn with_queues(
        store: Arc<dyn TaskStore>,
        queues: Arc<HashMap<QueueName, Arc<Queue>>>,
    ) -> Self {
        Self { store, queues }
    }

    fn queue(&self, name: &str) -> TaskResult<Arc<Queue>> {
        let name = QueueName::new(name)?;
        self.queues
            .get(&name)
            .cloned()
            .ok_or_else(|| TaskError::config(format!("no queue named '{}' is defined", name)))
    }

    /// Persist a task to run later on the named queue; returns the
    /// store-assigned id.
    pub async fn delay(&self, queue_name: &str, submission: Submission) -> TaskResult<TaskId> {
        let queue = self.queue(queue_name)?;

        let run_at = submission
            .run_at
            .unwrap_or_else(|| TimeInput::At(Utc::now()));
        let meta = TaskMeta::new(queue, submission.data, run_at, submission.expire_at)?;

        let created = self.store.create(meta.to_row()).await?;
        let id = created
            .id
            .ok_or_else(|| TaskError::store("create", "store did not assign an id"))?;

        debug!("Delayed task {} on queue {}", id, created.queue);
        Ok(id)
    }

    /// Move an existing task: a new `run_at` resets its attempt and
    /// failure history, a lone `expire_at` adjusts the window only.
    pub async fn reschedule(
        &self,
        queue_name: &str,
        id: TaskId,
        run_at: Option<TimeInput>,
        expire_at: Option<TimeInput>,
    ) -> TaskResult<()> {
        let queue = self.queue(queue_name)?;
        let row = self.find(&queue, id).await?;

        let mut meta = TaskMeta::from_row(row, queue)?;
        meta.reschedule(run_at, expire_at)?;
        self.store.update(meta.to_row()).await?;

        debug!("Rescheduled task {} on queue {}", id, queue_name);
        Ok(())
    }

    /// Remove a pending task from its queue
    pub async fn cancel(&self, queue_name: &str, id: TaskId) -> TaskResult<()> {
        let queue = self.queue(queue_name)?;
        self.find(&queue, id).await?;
        self.store.delete(id).await?;

        debug!("Cancelled task {} on queue {}", id, queue_name);
        Ok(())
    }

    async fn find(&self, queue: &Arc<Queue>, id: TaskId) -> TaskResult<crate::store::TaskRow> {
        self.store
            .read(queue.name())
            .await?
            .into_iter()
            .find(|row| row.id == Some(id))
            .ok_or_else(|| TaskError::TaskNotFound {
                task_id: id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::test_support::NoopFactory;
    use crate::store::InMemoryTaskStore;
    use chrono::Duration;

    fn scheduler_with(store: Arc<InMemoryTaskStore>) -> Scheduler {
        let queue = Arc::new(
            Queue::builder("emails", Arc::new(NoopFactory))
                .build()
                .unwrap(),
        );
        let mut queues = HashMap::new();
        queues.insert(queue.name().clone(), queue);
        Scheduler::with_queues(store, Arc::new(queues))
    }

    #[tokio::test]
    async fn delay_persists_a_row_with_defaults() {
        let store = Arc::new(InMemoryTaskStore::new());
        let scheduler = scheduler_with(store.clone());
        let before = Utc::now();

        let id = scheduler
            .delay("emails", Submission::new().raw_data("payload"))
            .await
            .unwrap();

        let rows = store.all().await;
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.id, Some(id));
        assert_eq!(row.queue, "emails");
        assert_eq!(row.data.as_deref(), Some("payload"));
        assert_eq!(row.attempts, 0);
        assert!(row.run_at.unwrap() >= before);
        assert_eq!(row.initial_run_at, row.run_at);
        assert_eq!(row.expire_at, None);
    }

    #[tokio::test]
    async fn delay_accepts_epoch_and_text_times() {
        let store = Arc::new(InMemoryTaskStore::new());
        let scheduler = scheduler_with(store.clone());

        scheduler
            .delay(
                "emails",
                Submission::new()
                    .run_at(1_700_000_000_i64)
                    .expire_at("2024-11-14T22:13:20+00:00"),
            )
            .await
            .unwrap();

        let row = store.all().await.pop().unwrap();
        assert_eq!(row.run_at.unwrap().timestamp(), 1_700_000_000);
        assert!(row.expire_at.is_some());
    }

    #[tokio::test]
    async fn delay_to_an_unknown_queue_is_a_config_error() {
        let store = Arc::new(InMemoryTaskStore::new());
        let scheduler = scheduler_with(store);

        let result = scheduler.delay("missing", Submission::new()).await;

        assert!(matches!(result, Err(TaskError::Config { .. })));
    }

    #[tokio::test]
    async fn reschedule_moves_and_resets_the_row() {
        let store = Arc::new(InMemoryTaskStore::new());
        let scheduler = scheduler_with(store.clone());
        let id = scheduler
            .delay("emails", Submission::new())
            .await
            .unwrap();

        let target = Utc::now() + Duration::hours(2);
        scheduler
            .reschedule("emails", id, Some(TimeInput::At(target)), None)
            .await
            .unwrap();

        let row = store.all().await.pop().unwrap();
        assert_eq!(row.run_at.unwrap(), target);
        assert_eq!(row.initial_run_at.unwrap(), target);
        assert_eq!(row.attempts, 0);
        assert_eq!(row.last_error, None);
    }

    #[tokio::test]
    async fn cancel_deletes_the_row() {
        let store = Arc::new(InMemoryTaskStore::new());
        let scheduler = scheduler_with(store.clone());
        let id = scheduler
            .delay("emails", Submission::new())
            .await
            .unwrap();

        scheduler.cancel("emails", id).await.unwrap();

        assert!(store.all().await.is_empty());
    }

    #[tokio::test]
    async fn cancel_of_an_unknown_task_reports_not_found() {
        let store = Arc::new(InMemoryTaskStore::new());
        let scheduler = scheduler_with(store);

        let result = scheduler.cancel("emails", uuid::Uuid::new_v4()).await;

        assert!(matches!(result, Err(TaskError::TaskNotFound { .. })));
    }
}
