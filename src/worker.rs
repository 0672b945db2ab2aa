//! Per-queue worker: polls the store for due tasks and drives each one
//! through its lifecycle

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::client::Scheduler;
use crate::error::{TaskError, TaskResult};
use crate::execution::{LoggedExecution, TaskExecution, TaskLogger};
use crate::handler::{Container, HandlerContext, TaskHandler};
use crate::queue::Queue;
use crate::store::{TaskRow, TaskStore};
use crate::task::TaskMeta;

/// Worker bound to a single queue.
///
/// `work` is the long-running poll loop; `act` is one tick, exposed so
/// test harnesses and wrappers can drive the queue without the loop. The
/// worker is internally sequential; parallelism lives across queues.
pub struct QueueWorker {
    queue: Arc<Queue>,
    store: Arc<dyn TaskStore>,
    logger: Arc<dyn TaskLogger>,
    container: Option<Container>,
    scheduler: Scheduler,
    shutdown_signal: Arc<RwLock<bool>>,
}

impl QueueWorker {
    pub fn new(
        queue: Arc<Queue>,
        store: Arc<dyn TaskStore>,
        logger: Arc<dyn TaskLogger>,
        container: Option<Container>,
        scheduler: Scheduler,
    ) -> Self {
        Self {
            queue,
            store,
            logger,
            container,
            scheduler,
            shutdown_signal: Arc::new(RwLock::new(false)),
        }
    }

    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }

    /// Request cooperative stop; takes effect between ticks
    pub async fn stop(&self) {
        *self.shutdown_signal.write().await = true;
    }

    /// Blocking poll loop: sleep `update_period`, then tick.
    ///
    /// Exits on the stop signal, or propagates the first store error out
    /// of a tick (a broken store is fatal to the worker; the manager logs
    /// the crash and peers keep running).
    pub async fn work(&self) -> TaskResult<()> {
        info!("Starting worker for queue '{}'", self.queue.name());

        loop {
            sleep(self.queue.update_period()).await;

            if *self.shutdown_signal.read().await {
                break;
            }

            self.act().await?;
        }

        info!("Worker for queue '{}' stopped", self.queue.name());
        Ok(())
    }

    /// One tick: fetch due rows and process them sequentially.
    ///
    /// The store may hand back anything belonging to the queue; the tick
    /// keeps rows that are due (which includes every expired row), orders
    /// them by (`run_at`, `id`) and handles at most `max_tasks` of them,
    /// leaving the rest for the next tick.
    pub async fn act(&self) -> TaskResult<()> {
        let mut rows = self.store.read(self.queue.name()).await?;

        let now = Utc::now();
        rows.retain(|row| matches!(row.run_at, Some(run_at) if run_at <= now));
        rows.sort_by_key(|row| (row.run_at, row.id));
        rows.truncate(self.queue.max_tasks());

        debug!(
            "Tick on queue '{}': {} due task(s)",
            self.queue.name(),
            rows.len()
        );

        for row in rows {
            self.process(row).await?;
        }

        Ok(())
    }

    async fn process(&self, row: TaskRow) -> TaskResult<()> {
        let mut meta = match TaskMeta::from_row(row, self.queue.clone()) {
            Ok(meta) => meta,
            Err(err) => {
                warn!(
                    "Skipping unreadable row on queue '{}': {}",
                    self.queue.name(),
                    err
                );
                return Ok(());
            }
        };

        if meta.expired() {
            let expire_at = meta
                .expire_at()
                .map(|time| time.timestamp())
                .unwrap_or_default();
            return self
                .fail_without_running(meta, TaskError::Expired { expire_at })
                .await;
        }

        if !meta.runnable() {
            return Ok(());
        }

        if let Err(exhausted) = meta.add_attempt() {
            // A row past its cap yet still scheduled: a crash beat the
            // final update. Finish the job now.
            return self.fail_without_running(meta, exhausted).await;
        }

        // Persist the incremented counter before running, so the attempt
        // counts even if the process dies mid-run.
        self.store.update(meta.to_row()).await?;

        let handler = match self.build_handler(&meta) {
            Ok(handler) => handler,
            Err(err) => return self.fail_malformed(meta, err).await,
        };

        let mut execution =
            LoggedExecution::new(TaskExecution::new(meta, handler), Arc::clone(&self.logger));

        match execution.run().await {
            Ok(_) => {
                let id = execution
                    .meta()
                    .id()
                    .ok_or_else(|| TaskError::store("delete", "row has no id"))?;
                self.store.delete(id).await?;
            }
            Err(run_err) => {
                execution.fail(&run_err).await;
                self.store.update(execution.meta().to_row()).await?;
            }
        }

        Ok(())
    }

    /// Drive the failure hooks for a task that never gets to run
    /// (expired, or out of attempts at pickup time).
    async fn fail_without_running(&self, meta: TaskMeta, error: TaskError) -> TaskResult<()> {
        let handler = match self.build_handler(&meta) {
            Ok(handler) => handler,
            Err(err) => return self.fail_malformed(meta, err).await,
        };

        let mut execution =
            LoggedExecution::new(TaskExecution::new(meta, handler), Arc::clone(&self.logger));
        execution.fail(&error).await;
        self.store.update(execution.meta().to_row()).await?;
        Ok(())
    }

    /// A handler that cannot be built can never run: tombstone the row so
    /// it stops being picked up every tick.
    async fn fail_malformed(&self, mut meta: TaskMeta, error: TaskError) -> TaskResult<()> {
        warn!(
            "Malformed task {} on queue '{}': {}",
            meta.id().map(|id| id.to_string()).unwrap_or_default(),
            self.queue.name(),
            error
        );
        meta.tombstone(&error);
        self.store.update(meta.to_row()).await?;
        Ok(())
    }

    fn build_handler(&self, meta: &TaskMeta) -> TaskResult<Box<dyn TaskHandler>> {
        let ctx = HandlerContext::new(
            self.queue.name(),
            meta.id(),
            meta.data(),
            self.container.as_ref(),
            &self.logger,
            &self.scheduler,
        );
        self.queue.factory().build(ctx)
    }
}
