//! Delayed and retrying tasks example
//!
//! This example demonstrates how to:
//! 1. Defer a task to a future run time
//! 2. Set an expiry deadline
//! 3. Watch a flaky task retry with backoff
//!
//! Run: cargo run --example delayed_tasks

use chrono::{Duration as Delta, Utc};
use procrastinator::{
    Config, HandlerContext, HandlerFactory, InMemoryTaskStore, Queue, QueueManager, Submission,
    TaskHandler, TaskResult,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};

/// A task that fails its first two runs, then succeeds
struct FlakyFactory {
    attempts_seen: Arc<AtomicU32>,
}

impl HandlerFactory for FlakyFactory {
    fn build(&self, _ctx: HandlerContext<'_>) -> TaskResult<Box<dyn TaskHandler>> {
        Ok(Box::new(FlakyHandler {
            attempts_seen: Arc::clone(&self.attempts_seen),
        }))
    }
}

struct FlakyHandler {
    attempts_seen: Arc<AtomicU32>,
}

#[async_trait::async_trait]
impl TaskHandler for FlakyHandler {
    async fn run(&mut self) -> anyhow::Result<String> {
        let seen = self.attempts_seen.fetch_add(1, Ordering::SeqCst);
        if seen < 2 {
            anyhow::bail!("transient outage (attempt {})", seen + 1);
        }
        Ok("finally worked".to_string())
    }

    async fn on_fail(&mut self, error: &procrastinator::TaskError) -> anyhow::Result<()> {
        info!("will retry after backoff: {}", error);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    let store = Arc::new(InMemoryTaskStore::new());
    let config = Config::builder()
        .store(store.clone())
        .define_queue(
            Queue::builder(
                "flaky",
                Arc::new(FlakyFactory {
                    attempts_seen: Arc::new(AtomicU32::new(0)),
                }),
            )
            .max_attempts(5)
            .build()?,
        )
        .build()?;

    let manager = QueueManager::new(config);
    let scheduler = manager.scheduler();

    // Deferred five seconds out, with a one-hour expiry window
    let id = scheduler
        .delay(
            "flaky",
            Submission::new()
                .run_at(Utc::now() + Delta::seconds(5))
                .expire_at(Utc::now() + Delta::hours(1)),
        )
        .await?;
    info!("Deferred flaky task {}", id);

    // Drive ticks by hand instead of spawning the poll loops, so the
    // retry schedule is visible without waiting out the real backoff.
    for tick in 0..4 {
        manager.act(&[]).await?;

        for row in store.all().await {
            info!(
                "tick {}: attempts={} run_at={:?} last_error={:?}",
                tick, row.attempts, row.run_at, row.last_error
            );

            // Pull the retry forward so the demo does not sleep 30s+
            if let Some(run_at) = row.run_at {
                let mut hurried = row.clone();
                hurried.run_at = Some(run_at - Delta::hours(1));
                procrastinator::TaskStore::update(store.as_ref(), hurried).await?;
            }
        }

        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    info!("Store drained: {}", store.all().await.is_empty());
    Ok(())
}
