//! Queue configuration: named pipelines with their own handler factory,
//! poll cadence, timeout and retry policy

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{TaskError, TaskResult};
use crate::handler::HandlerFactory;

/// Default wall-clock budget for a single handler run
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3600);

/// Default attempt cap for a queue
pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;

/// Default seconds a worker sleeps between polls
pub const DEFAULT_UPDATE_PERIOD: Duration = Duration::from_secs(10);

/// Default number of due tasks a worker handles per tick
pub const DEFAULT_MAX_TASKS: usize = 10;

/// Normalized queue identifier.
///
/// Normalization is one-way: every run of whitespace collapses to a single
/// underscore, so `"queue name"` and `"queue  name"` identify the same
/// queue. Callers that need distinct queues must supply distinct
/// normalized names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueName(String);

impl QueueName {
    /// Normalize a raw name. Fails on an empty or all-whitespace name.
    pub fn new(raw: &str) -> TaskResult<Self> {
        let mut normalized = String::with_capacity(raw.len());
        let mut in_gap = false;
        for ch in raw.trim().chars() {
            if ch.is_whitespace() {
                in_gap = true;
                continue;
            }
            if in_gap && !normalized.is_empty() {
                normalized.push('_');
            }
            in_gap = false;
            normalized.push(ch);
        }

        if normalized.is_empty() {
            return Err(TaskError::config("queue name must not be empty"));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Immutable per-queue configuration.
///
/// Created once at configuration time via [`Queue::builder`]; workers and
/// task metadata hold shared references to it for the process lifetime.
pub struct Queue {
    name: QueueName,
    factory: Arc<dyn HandlerFactory>,
    timeout: Duration,
    max_attempts: Option<u32>,
    update_period: Duration,
    max_tasks: usize,
}

impl Queue {
    /// Start building a queue around a handler factory
    pub fn builder<S: Into<String>>(name: S, factory: Arc<dyn HandlerFactory>) -> QueueBuilder {
        QueueBuilder {
            name: name.into(),
            factory,
            timeout_seconds: None,
            max_attempts: Some(DEFAULT_MAX_ATTEMPTS),
            update_period: DEFAULT_UPDATE_PERIOD,
            max_tasks: DEFAULT_MAX_TASKS,
        }
    }

    pub fn name(&self) -> &QueueName {
        &self.name
    }

    pub fn factory(&self) -> &Arc<dyn HandlerFactory> {
        &self.factory
    }

    /// Wall-clock budget for one handler run
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Attempt cap; `None` means unbounded
    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    /// Sleep between worker polls
    pub fn update_period(&self) -> Duration {
        self.update_period
    }

    /// Due tasks handled per tick
    pub fn max_tasks(&self) -> usize {
        self.max_tasks
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("max_attempts", &self.max_attempts)
            .field("update_period", &self.update_period)
            .field("max_tasks", &self.max_tasks)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Queue`]; validation happens in [`QueueBuilder::build`]
pub struct QueueBuilder {
    name: String,
    factory: Arc<dyn HandlerFactory>,
    timeout_seconds: Option<f64>,
    max_attempts: Option<u32>,
    update_period: Duration,
    max_tasks: usize,
}

impl QueueBuilder {
    /// Handler run budget in seconds; must be finite and non-negative
    pub fn timeout_seconds(mut self, seconds: f64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    /// Cap the number of run attempts per task
    pub fn max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = Some(max);
        self
    }

    /// Retry forever (until expiry)
    pub fn unlimited_attempts(mut self) -> Self {
        self.max_attempts = None;
        self
    }

    /// Seconds the worker sleeps between polls
    pub fn update_period_seconds(mut self, seconds: u64) -> Self {
        self.update_period = Duration::from_secs(seconds);
        self
    }

    /// Number of due tasks handled per tick
    pub fn max_tasks(mut self, max: usize) -> Self {
        self.max_tasks = max;
        self
    }

    /// Validate and assemble the queue
    pub fn build(self) -> TaskResult<Queue> {
        let name = QueueName::new(&self.name)?;

        let timeout = match self.timeout_seconds {
            None => DEFAULT_TIMEOUT,
            Some(seconds) if seconds.is_finite() && seconds >= 0.0 => {
                Duration::from_secs_f64(seconds)
            }
            Some(seconds) => {
                return Err(TaskError::config(format!(
                    "queue '{}' timeout must be a non-negative number of seconds, got {}",
                    name, seconds
                )));
            }
        };

        if self.max_attempts == Some(0) {
            return Err(TaskError::config(format!(
                "queue '{}' max_attempts must be positive; use unlimited_attempts() for no cap",
                name
            )));
        }

        if self.max_tasks == 0 {
            return Err(TaskError::config(format!(
                "queue '{}' max_tasks must be positive",
                name
            )));
        }

        Ok(Queue {
            name,
            factory: self.factory,
            timeout,
            max_attempts: self.max_attempts,
            update_period: self.update_period,
            max_tasks: self.max_tasks,
        })
    }
}
