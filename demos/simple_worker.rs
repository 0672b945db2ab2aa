//! Simple worker example
//!
//! This example demonstrates how to:
//! 1. Define a task handler and its factory
//! 2. Configure queues, a store and a container
//! 3. Submit deferred tasks and run the workers
//!
//! Run: cargo run --example simple_worker

use procrastinator::{
    Config, HandlerContext, HandlerFactory, InMemoryTaskStore, Queue, QueueManager, Submission,
    TaskHandler, TaskResult,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};

/// Application dependencies shared with handlers via the container
struct AppDeps {
    greeting: &'static str,
}

/// A task that greets an address
#[derive(Debug, Serialize, Deserialize)]
struct GreetTask {
    address: String,
}

struct Greeter {
    task: GreetTask,
    greeting: &'static str,
}

#[async_trait::async_trait]
impl TaskHandler for Greeter {
    async fn run(&mut self) -> anyhow::Result<String> {
        // Simulate some work
        tokio::time::sleep(Duration::from_millis(100)).await;

        let message = format!("{}, {}!", self.greeting, self.task.address);
        info!("{}", message);
        Ok(message)
    }

    async fn on_success(&mut self, result: &str) -> anyhow::Result<()> {
        info!("greeted: {}", result);
        Ok(())
    }
}

struct GreeterFactory;

impl HandlerFactory for GreeterFactory {
    fn build(&self, ctx: HandlerContext<'_>) -> TaskResult<Box<dyn TaskHandler>> {
        let greeting = ctx
            .container::<AppDeps>()
            .map(|deps| deps.greeting)
            .unwrap_or("Hello");
        Ok(Box::new(Greeter {
            task: ctx.data()?,
            greeting,
        }))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    info!("Starting simple worker example");

    let config = Config::builder()
        .store(Arc::new(InMemoryTaskStore::new()))
        .provide_container(Arc::new(AppDeps { greeting: "Welcome" }))
        .define_queue(
            Queue::builder("greetings", Arc::new(GreeterFactory))
                .update_period_seconds(1)
                .build()?,
        )
        .build()?;

    let manager = QueueManager::new(config);
    let scheduler = manager.scheduler();

    info!("Submitting tasks...");
    for name in ["alice", "bob", "carol"] {
        let id = scheduler
            .delay(
                "greetings",
                Submission::new().data(&GreetTask {
                    address: format!("{}@example.com", name),
                })?,
            )
            .await?;
        info!("Submitted greeting for {}: {}", name, id);
    }

    manager.spawn_workers().await;

    // Let the workers drain the queue, then shut down
    tokio::time::sleep(Duration::from_secs(5)).await;
    manager.shutdown(Duration::from_secs(10)).await;

    Ok(())
}
