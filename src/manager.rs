//! Multi-queue supervision: one worker per configured queue

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::client::Scheduler;
use crate::config::Config;
use crate::error::{TaskError, TaskResult};
use crate::queue::QueueName;
use crate::worker::QueueWorker;

/// Owns one [`QueueWorker`] per configured queue.
///
/// Workers run on independent tokio tasks; a crashing worker is logged
/// and does not take down its peers. Shutdown is cooperative between
/// ticks, with an abort after the grace period for stragglers.
pub struct QueueManager {
    workers: HashMap<QueueName, Arc<QueueWorker>>,
    scheduler: Scheduler,
    handles: Mutex<Vec<(QueueName, JoinHandle<()>)>>,
}

impl QueueManager {
    pub fn new(config: Config) -> Self {
        let store = Arc::clone(config.store());
        let queues = Arc::new(config.queues().clone());
        let scheduler = Scheduler::with_queues(store.clone(), queues.clone());

        let workers = queues
            .iter()
            .map(|(name, queue)| {
                let worker = QueueWorker::new(
                    Arc::clone(queue),
                    store.clone(),
                    Arc::clone(config.logger()),
                    config.container().cloned(),
                    scheduler.clone(),
                );
                (name.clone(), Arc::new(worker))
            })
            .collect();

        Self {
            workers,
            scheduler,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Submission handle sharing the engine's store and queue registry
    pub fn scheduler(&self) -> Scheduler {
        self.scheduler.clone()
    }

    /// Spawn every worker's poll loop
    pub async fn spawn_workers(&self) {
        let mut handles = self.handles.lock().await;

        for (name, worker) in &self.workers {
            let worker = Arc::clone(worker);
            let queue_name = name.clone();
            let handle = tokio::spawn(async move {
                if let Err(err) = worker.work().await {
                    error!("Worker for queue '{}' crashed: {}", queue_name, err);
                }
            });
            handles.push((name.clone(), handle));
        }

        info!("Spawned {} queue worker(s)", self.workers.len());
    }

    /// Forward a single tick to the named workers; an empty filter ticks
    /// every queue. Names normalize the same way queue definitions do.
    pub async fn act(&self, queue_names: &[&str]) -> TaskResult<()> {
        if queue_names.is_empty() {
            for worker in self.workers.values() {
                worker.act().await?;
            }
            return Ok(());
        }

        for raw in queue_names {
            let name = QueueName::new(raw)?;
            let worker = self.workers.get(&name).ok_or_else(|| {
                TaskError::config(format!("no queue named '{}' is defined", name))
            })?;
            worker.act().await?;
        }
        Ok(())
    }

    /// Signal every worker to stop, wait up to `grace` for each loop to
    /// wind down, then abort whatever is still running. A task mid-run
    /// persists its final state before its worker exits.
    pub async fn shutdown(&self, grace: Duration) {
        info!("Shutting down {} queue worker(s)", self.workers.len());

        for worker in self.workers.values() {
            worker.stop().await;
        }

        let mut handles = self.handles.lock().await;
        for (name, mut handle) in handles.drain(..) {
            match tokio::time::timeout(grace, &mut handle).await {
                Ok(_) => {}
                Err(_) => {
                    warn!("Worker for queue '{}' did not stop in time; aborting", name);
                    handle.abort();
                }
            }
        }

        info!("Queue manager shut down");
    }
}
