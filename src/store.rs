//! Pluggable task persistence: the store interface and the shipped backends

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{TaskError, TaskResult};
use crate::queue::QueueName;
use crate::task::TaskId;

/// Redis key prefixes
const TASK_KEY: &str = "proc:task";
const QUEUE_KEY: &str = "proc:queue";

/// Persisted representation of one task.
///
/// `run_at = None` marks a terminal row (final-failed tombstone); times are
/// absolute UTC; `queue` is the textual queue name so the row survives
/// naive persistence layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRow {
    /// Assigned by the store on create
    pub id: Option<TaskId>,
    pub queue: String,
    pub data: Option<String>,
    pub run_at: Option<DateTime<Utc>>,
    pub initial_run_at: Option<DateTime<Utc>>,
    pub expire_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub last_fail_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// The four operations the engine needs from a persistence backend.
///
/// `read` returns the rows belonging to a queue; a backend may pre-filter
/// to due rows, and workers tolerate broader result sets. No transactional
/// guarantees are required beyond per-call atomicity; the engine's safety
/// model is at-least-once execution.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Rows belonging to `queue`
    async fn read(&self, queue: &QueueName) -> TaskResult<Vec<TaskRow>>;

    /// Persist a new row and assign its id
    async fn create(&self, row: TaskRow) -> TaskResult<TaskRow>;

    /// Overwrite an existing row (matched by id)
    async fn update(&self, row: TaskRow) -> TaskResult<()>;

    /// Remove a row permanently
    async fn delete(&self, id: TaskId) -> TaskResult<()>;
}

/// Non-durable store backed by a process-local map.
///
/// Suitable for tests and demos; a crash loses every pending task, so
/// production deployments want [`RedisTaskStore`] or their own backend.
#[derive(Default)]
pub struct InMemoryTaskStore {
    rows: Mutex<HashMap<TaskId, TaskRow>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every row, for inspection in tests and demos
    pub async fn all(&self) -> Vec<TaskRow> {
        self.rows.lock().await.values().cloned().collect()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn read(&self, queue: &QueueName) -> TaskResult<Vec<TaskRow>> {
        let rows = self.rows.lock().await;
        Ok(rows
            .values()
            .filter(|row| row.queue == queue.as_str())
            .cloned()
            .collect())
    }

    async fn create(&self, mut row: TaskRow) -> TaskResult<TaskRow> {
        let id = Uuid::new_v4();
        row.id = Some(id);
        self.rows.lock().await.insert(id, row.clone());
        Ok(row)
    }

    async fn update(&self, row: TaskRow) -> TaskResult<()> {
        let id = row
            .id
            .ok_or_else(|| TaskError::store("update", "row has no id"))?;

        let mut rows = self.rows.lock().await;
        if !rows.contains_key(&id) {
            return Err(TaskError::TaskNotFound {
                task_id: id.to_string(),
            });
        }
        rows.insert(id, row);
        Ok(())
    }

    async fn delete(&self, id: TaskId) -> TaskResult<()> {
        let mut rows = self.rows.lock().await;
        if rows.remove(&id).is_none() {
            return Err(TaskError::TaskNotFound {
                task_id: id.to_string(),
            });
        }
        Ok(())
    }
}

/// Durable store over a Redis backend.
///
/// Layout: one hash per task (`proc:task:{id}`, field `data` holding the
/// serialized row) plus one set per queue (`proc:queue:{name}`) indexing
/// the queue's task ids. Tombstoned rows stay in both until deleted, so
/// final-failed tasks remain inspectable and reschedulable.
pub struct RedisTaskStore {
    client: Client,
}

impl RedisTaskStore {
    /// Connect and verify the backend responds
    pub async fn new(redis_url: &str) -> TaskResult<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| TaskError::store("connect", e.to_string()))?;

        let mut conn = client
            .get_async_connection()
            .await
            .map_err(|e| TaskError::store("connect", e.to_string()))?;

        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(|e| TaskError::store("ping", e.to_string()))?;

        info!("Connected to Redis at {}", redis_url);

        Ok(Self { client })
    }

    async fn connection(&self) -> TaskResult<redis::aio::Connection> {
        self.client
            .get_async_connection()
            .await
            .map_err(|e| TaskError::store("get_connection", e.to_string()))
    }

    fn task_key(id: TaskId) -> String {
        format!("{}:{}", TASK_KEY, id)
    }

    fn queue_key(queue: &str) -> String {
        format!("{}:{}", QUEUE_KEY, queue)
    }
}

#[async_trait]
impl TaskStore for RedisTaskStore {
    async fn read(&self, queue: &QueueName) -> TaskResult<Vec<TaskRow>> {
        let mut conn = self.connection().await?;

        let ids: Vec<String> = redis::cmd("SMEMBERS")
            .arg(Self::queue_key(queue.as_str()))
            .query_async(&mut conn)
            .await
            .map_err(|e| TaskError::store("read", e.to_string()))?;

        let mut rows = Vec::with_capacity(ids.len());
        for id in ids {
            let json: Option<String> = redis::cmd("HGET")
                .arg(format!("{}:{}", TASK_KEY, id))
                .arg("data")
                .query_async(&mut conn)
                .await
                .map_err(|e| TaskError::store("read", e.to_string()))?;

            match json {
                Some(json) => rows.push(serde_json::from_str(&json)?),
                None => {
                    // stale index entry; drop it
                    redis::cmd("SREM")
                        .arg(Self::queue_key(queue.as_str()))
                        .arg(&id)
                        .query_async::<_, ()>(&mut conn)
                        .await
                        .map_err(|e| TaskError::store("read", e.to_string()))?;
                }
            }
        }

        debug!("Read {} rows for queue {}", rows.len(), queue);
        Ok(rows)
    }

    async fn create(&self, mut row: TaskRow) -> TaskResult<TaskRow> {
        let mut conn = self.connection().await?;

        let id = Uuid::new_v4();
        row.id = Some(id);
        let json = serde_json::to_string(&row)?;

        redis::pipe()
            .hset(Self::task_key(id), "data", &json)
            .ignore()
            .sadd(Self::queue_key(&row.queue), id.to_string())
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| TaskError::store("create", e.to_string()))?;

        debug!("Created task {} on queue {}", id, row.queue);
        Ok(row)
    }

    async fn update(&self, row: TaskRow) -> TaskResult<()> {
        let id = row
            .id
            .ok_or_else(|| TaskError::store("update", "row has no id"))?;
        let mut conn = self.connection().await?;

        let exists: bool = redis::cmd("EXISTS")
            .arg(Self::task_key(id))
            .query_async(&mut conn)
            .await
            .map_err(|e| TaskError::store("update", e.to_string()))?;
        if !exists {
            return Err(TaskError::TaskNotFound {
                task_id: id.to_string(),
            });
        }

        let json = serde_json::to_string(&row)?;
        redis::cmd("HSET")
            .arg(Self::task_key(id))
            .arg("data")
            .arg(&json)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| TaskError::store("update", e.to_string()))?;

        Ok(())
    }

    async fn delete(&self, id: TaskId) -> TaskResult<()> {
        let mut conn = self.connection().await?;

        let json: Option<String> = redis::cmd("HGET")
            .arg(Self::task_key(id))
            .arg("data")
            .query_async(&mut conn)
            .await
            .map_err(|e| TaskError::store("delete", e.to_string()))?;

        let row: TaskRow = match json {
            Some(json) => serde_json::from_str(&json)?,
            None => {
                return Err(TaskError::TaskNotFound {
                    task_id: id.to_string(),
                });
            }
        };

        redis::pipe()
            .srem(Self::queue_key(&row.queue), id.to_string())
            .ignore()
            .del(Self::task_key(id))
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| TaskError::store("delete", e.to_string()))?;

        debug!("Deleted task {} from queue {}", id, row.queue);
        Ok(())
    }
}
