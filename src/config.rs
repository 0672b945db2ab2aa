//! Engine configuration: queue registry, store, container and logger

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{TaskError, TaskResult};
use crate::execution::{TaskLogger, TracingLogger};
use crate::handler::Container;
use crate::queue::{Queue, QueueName};
use crate::store::TaskStore;

/// Validated engine assembly, consumed by
/// [`QueueManager::new`](crate::manager::QueueManager::new).
pub struct Config {
    queues: HashMap<QueueName, Arc<Queue>>,
    store: Arc<dyn TaskStore>,
    container: Option<Container>,
    logger: Arc<dyn TaskLogger>,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            queues: Vec::new(),
            store: None,
            container: None,
            logger: None,
        }
    }

    pub fn queues(&self) -> &HashMap<QueueName, Arc<Queue>> {
        &self.queues
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn container(&self) -> Option<&Container> {
        self.container.as_ref()
    }

    pub fn logger(&self) -> &Arc<dyn TaskLogger> {
        &self.logger
    }
}

/// Builder for [`Config`]; validation happens in [`ConfigBuilder::build`]
pub struct ConfigBuilder {
    queues: Vec<Queue>,
    store: Option<Arc<dyn TaskStore>>,
    container: Option<Container>,
    logger: Option<Arc<dyn TaskLogger>>,
}

impl ConfigBuilder {
    /// Register a queue; one worker is spawned per registered queue
    pub fn define_queue(mut self, queue: Queue) -> Self {
        self.queues.push(queue);
        self
    }

    /// The persistence backend every worker and scheduler call goes
    /// through. Required: the engine's durability is the store's.
    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Opaque dependency object handed to handlers that request it
    pub fn provide_container(mut self, container: Container) -> Self {
        self.container = Some(container);
        self
    }

    /// Lifecycle event sink; defaults to the tracing-backed sink
    pub fn logger(mut self, logger: Arc<dyn TaskLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn build(self) -> TaskResult<Config> {
        let store = self
            .store
            .ok_or_else(|| TaskError::config("no task store configured"))?;

        if self.queues.is_empty() {
            return Err(TaskError::config("no queues defined"));
        }

        let mut queues = HashMap::new();
        for queue in self.queues {
            let name = queue.name().clone();
            if queues.insert(name.clone(), Arc::new(queue)).is_some() {
                return Err(TaskError::config(format!(
                    "queue '{}' is defined twice (names normalize whitespace to underscores)",
                    name
                )));
            }
        }

        Ok(Config {
            queues,
            store,
            container: self.container,
            logger: self.logger.unwrap_or_else(|| Arc::new(TracingLogger)),
        })
    }
}
