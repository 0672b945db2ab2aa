//! # Procrastinator
//!
//! A deferred-task execution engine: tasks are submitted with a desired
//! future run time, persisted through a pluggable store, and later driven
//! by per-queue background workers that retry with backoff until an
//! attempt or expiry limit is reached.
//!
//! ## Features
//!
//! - Durable deferred execution over a pluggable store (in-memory and
//!   Redis backends included)
//! - One worker per queue, each with its own poll cadence, timeout,
//!   attempt cap and per-tick task limit
//! - Exponential retry backoff and expiry deadlines
//! - Lifecycle hooks on handlers: `run`, `on_success`, `on_fail`,
//!   `on_final_fail`
//! - Structured lifecycle logging with a swappable sink
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use procrastinator::{
//!     Config, HandlerContext, HandlerFactory, Queue, QueueManager, InMemoryTaskStore,
//!     Submission, TaskHandler, TaskResult,
//! };
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! #[derive(Serialize, Deserialize)]
//! struct WelcomeEmail {
//!     address: String,
//! }
//!
//! #[async_trait::async_trait]
//! impl TaskHandler for WelcomeEmail {
//!     async fn run(&mut self) -> anyhow::Result<String> {
//!         // ... send the email ...
//!         Ok(format!("welcomed {}", self.address))
//!     }
//! }
//!
//! struct WelcomeEmailFactory;
//!
//! impl HandlerFactory for WelcomeEmailFactory {
//!     fn build(&self, ctx: HandlerContext<'_>) -> TaskResult<Box<dyn TaskHandler>> {
//!         Ok(Box::new(ctx.data::<WelcomeEmail>()?))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> TaskResult<()> {
//!     let config = Config::builder()
//!         .store(Arc::new(InMemoryTaskStore::new()))
//!         .define_queue(Queue::builder("emails", Arc::new(WelcomeEmailFactory)).build()?)
//!         .build()?;
//!
//!     let manager = QueueManager::new(config);
//!     let scheduler = manager.scheduler();
//!
//!     scheduler
//!         .delay(
//!             "emails",
//!             Submission::new()
//!                 .data(&WelcomeEmail { address: "someone@example.com".into() })?
//!                 .run_at(chrono::Utc::now() + chrono::Duration::hours(1)),
//!         )
//!         .await?;
//!
//!     manager.spawn_workers().await;
//!     // ... later ...
//!     manager.shutdown(std::time::Duration::from_secs(30)).await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod execution;
pub mod handler;
pub mod manager;
pub mod queue;
pub mod store;
pub mod task;
pub mod worker;

// Re-export commonly used types
pub use client::{Scheduler, Submission};
pub use config::{Config, ConfigBuilder};
pub use error::{TaskError, TaskResult};
pub use execution::{LoggedExecution, TaskExecution, TaskLogger, TracingLogger};
pub use handler::{Container, HandlerContext, HandlerFactory, TaskHandler};
pub use manager::QueueManager;
pub use queue::{Queue, QueueBuilder, QueueName};
pub use store::{InMemoryTaskStore, RedisTaskStore, TaskRow, TaskStore};
pub use task::{FailureOutcome, TaskId, TaskMeta, TimeInput};
pub use worker::QueueWorker;

/// Version of the procrastinator library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
