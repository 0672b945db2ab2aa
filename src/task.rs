//! Task metadata and its state transitions

use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

use crate::error::{TaskError, TaskResult};
use crate::queue::Queue;
use crate::store::TaskRow;

/// Unique identifier for tasks, assigned by the store on create
pub type TaskId = Uuid;

/// Base seconds added to every retry delay
const RETRY_BASE_SECONDS: i64 = 30;

/// A time-typed input accepted wherever a task time is supplied.
///
/// Absolute timestamps, integer epoch seconds and RFC 3339 text are all
/// normalized to UTC at construction; anything unparseable fails with a
/// descriptive error naming the input kind and its printable form.
#[derive(Debug, Clone)]
pub enum TimeInput {
    At(DateTime<Utc>),
    Epoch(i64),
    Text(String),
}

impl TimeInput {
    /// Normalize to an absolute UTC timestamp
    pub fn resolve(self) -> TaskResult<DateTime<Utc>> {
        match self {
            TimeInput::At(time) => Ok(time),
            TimeInput::Epoch(seconds) => Utc
                .timestamp_opt(seconds, 0)
                .single()
                .ok_or_else(|| TaskError::invalid_time("integer", seconds.to_string())),
            TimeInput::Text(text) => DateTime::parse_from_rfc3339(&text)
                .map(|time| time.with_timezone(&Utc))
                .map_err(|_| TaskError::invalid_time("string", text)),
        }
    }
}

impl From<DateTime<Utc>> for TimeInput {
    fn from(time: DateTime<Utc>) -> Self {
        TimeInput::At(time)
    }
}

impl From<DateTime<chrono::FixedOffset>> for TimeInput {
    fn from(time: DateTime<chrono::FixedOffset>) -> Self {
        TimeInput::At(time.with_timezone(&Utc))
    }
}

impl From<SystemTime> for TimeInput {
    fn from(time: SystemTime) -> Self {
        TimeInput::At(time.into())
    }
}

impl From<i64> for TimeInput {
    fn from(seconds: i64) -> Self {
        TimeInput::Epoch(seconds)
    }
}

impl From<&str> for TimeInput {
    fn from(text: &str) -> Self {
        TimeInput::Text(text.to_string())
    }
}

impl From<String> for TimeInput {
    fn from(text: String) -> Self {
        TimeInput::Text(text)
    }
}

/// Tag returned by [`TaskMeta::record_failure`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// The task was rescheduled and will be retried
    Fail,
    /// The task is terminal; its row becomes a tombstone
    FinalFail,
}

impl FailureOutcome {
    pub fn is_final(self) -> bool {
        matches!(self, FailureOutcome::FinalFail)
    }
}

/// The persisted state of one deferred task.
///
/// Owns every state transition: whether the task is runnable, retryable or
/// expired, how failures reschedule it, and how it round-trips through the
/// store as a [`TaskRow`].
#[derive(Debug, Clone)]
pub struct TaskMeta {
    id: Option<TaskId>,
    queue: Arc<Queue>,
    data: Option<String>,
    run_at: Option<DateTime<Utc>>,
    initial_run_at: Option<DateTime<Utc>>,
    expire_at: Option<DateTime<Utc>>,
    attempts: u32,
    last_fail_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl TaskMeta {
    /// Create metadata for a fresh submission.
    ///
    /// `run_at` and `expire_at` accept any [`TimeInput`] shape. Fails when
    /// a time does not normalize or `run_at` lands past `expire_at`.
    pub fn new(
        queue: Arc<Queue>,
        data: Option<String>,
        run_at: TimeInput,
        expire_at: Option<TimeInput>,
    ) -> TaskResult<Self> {
        let run_at = run_at.resolve()?;
        let expire_at = expire_at.map(TimeInput::resolve).transpose()?;

        if let Some(expiry) = expire_at {
            if run_at > expiry {
                return Err(TaskError::RunAtAfterExpiry {
                    new_run_at: run_at.timestamp(),
                    expire_at: expiry.timestamp(),
                });
            }
        }

        Ok(Self {
            id: None,
            queue,
            data,
            run_at: Some(run_at),
            initial_run_at: Some(run_at),
            expire_at,
            attempts: 0,
            last_fail_at: None,
            last_error: None,
        })
    }

    /// Materialize metadata from a persisted row.
    ///
    /// The row must belong to `queue`; a mismatch is a configuration error
    /// so workers can skip rows a sloppy store handed back.
    pub fn from_row(row: TaskRow, queue: Arc<Queue>) -> TaskResult<Self> {
        if row.queue != queue.name().as_str() {
            return Err(TaskError::config(format!(
                "row belongs to queue '{}', not '{}'",
                row.queue,
                queue.name()
            )));
        }

        Ok(Self {
            id: row.id,
            queue,
            data: row.data,
            initial_run_at: row.initial_run_at.or(row.run_at),
            run_at: row.run_at,
            expire_at: row.expire_at,
            attempts: row.attempts,
            last_fail_at: row.last_fail_at,
            last_error: row.last_error,
        })
    }

    /// Serialize into the store row schema. Times stay absolute; the queue
    /// is rendered as its textual name.
    pub fn to_row(&self) -> TaskRow {
        TaskRow {
            id: self.id,
            queue: self.queue.name().as_str().to_string(),
            data: self.data.clone(),
            run_at: self.run_at,
            initial_run_at: self.initial_run_at,
            expire_at: self.expire_at,
            attempts: self.attempts,
            last_fail_at: self.last_fail_at,
            last_error: self.last_error.clone(),
        }
    }

    pub fn id(&self) -> Option<TaskId> {
        self.id
    }

    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }

    pub fn data(&self) -> Option<&str> {
        self.data.as_deref()
    }

    pub fn run_at(&self) -> Option<DateTime<Utc>> {
        self.run_at
    }

    pub fn initial_run_at(&self) -> Option<DateTime<Utc>> {
        self.initial_run_at
    }

    pub fn expire_at(&self) -> Option<DateTime<Utc>> {
        self.expire_at
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_fail_at(&self) -> Option<DateTime<Utc>> {
        self.last_fail_at
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Due now and not terminal
    pub fn runnable(&self) -> bool {
        match self.run_at {
            Some(run_at) => run_at <= Utc::now(),
            None => false,
        }
    }

    /// Past the expiry deadline, when one is set
    pub fn expired(&self) -> bool {
        match self.expire_at {
            Some(expire_at) => expire_at <= Utc::now(),
            None => false,
        }
    }

    /// Not expired and attempts remain
    pub fn retryable(&self) -> bool {
        !self.expired() && self.attempts_left()
    }

    /// Whether the queue's attempt cap still allows another run
    pub fn attempts_left(&self) -> bool {
        match self.queue.max_attempts() {
            Some(max) => self.attempts < max,
            None => true,
        }
    }

    /// Whether the last run succeeded.
    ///
    /// Expired tasks report `false` without complaint; asking before any
    /// attempt has run is an error.
    pub fn successful(&self) -> TaskResult<bool> {
        if self.expired() {
            return Ok(false);
        }
        if self.attempts < 1 {
            return Err(TaskError::NeverRun);
        }
        Ok(self.last_fail_at.is_none())
    }

    /// Count one run attempt. Fails when a bounded queue is out of attempts.
    pub fn add_attempt(&mut self) -> TaskResult<()> {
        if let Some(max) = self.queue.max_attempts() {
            if self.attempts >= max {
                return Err(TaskError::AttemptsExhausted { max_attempts: max });
            }
        }
        self.attempts += 1;
        Ok(())
    }

    /// Record a failed attempt and decide the task's fate.
    ///
    /// Retryable tasks get a backoff reschedule and a `Fail` tag; expired
    /// or out-of-attempts tasks become tombstones (`run_at = None`) with a
    /// `FinalFail` tag. `last_error` keeps the rendered cause chain under
    /// the matching prefix.
    pub fn record_failure(&mut self, error: &TaskError) -> FailureOutcome {
        self.last_fail_at = Some(Utc::now());

        if error.is_expiry() {
            self.last_error = Some(format!("Task expired: {}", error.detail()));
            self.run_at = None;
            FailureOutcome::FinalFail
        } else if self.retryable() {
            self.last_error = Some(format!("Task failed: {}", error.detail()));
            self.retry_backoff();
            FailureOutcome::Fail
        } else {
            self.last_error = Some(format!("Task failed too many times: {}", error.detail()));
            self.run_at = None;
            FailureOutcome::FinalFail
        }
    }

    /// Reschedule the task.
    ///
    /// - Neither time given: the retry path. `run_at` moves forward by
    ///   `30 + attempts^4` seconds; attempts and failure fields stay.
    /// - `run_at` given: the user path. Validates against the effective
    ///   expiry, rewrites `initial_run_at`, and resets attempts and
    ///   failure fields.
    /// - Only `expire_at` given: updates the expiry window alone.
    pub fn reschedule(
        &mut self,
        run_at: Option<TimeInput>,
        expire_at: Option<TimeInput>,
    ) -> TaskResult<()> {
        match (run_at, expire_at) {
            (None, None) => {
                self.retry_backoff();
                Ok(())
            }
            (Some(run_at), expire_at) => {
                let new_run_at = run_at.resolve()?;
                let new_expire_at = expire_at.map(TimeInput::resolve).transpose()?;

                let effective_expiry = new_expire_at.or(self.expire_at);
                if let Some(expiry) = effective_expiry {
                    if new_run_at > expiry {
                        return Err(TaskError::RunAtAfterExpiry {
                            new_run_at: new_run_at.timestamp(),
                            expire_at: expiry.timestamp(),
                        });
                    }
                }

                self.run_at = Some(new_run_at);
                self.initial_run_at = Some(new_run_at);
                if let Some(expiry) = new_expire_at {
                    self.expire_at = Some(expiry);
                }
                self.attempts = 0;
                self.last_fail_at = None;
                self.last_error = None;
                Ok(())
            }
            (None, Some(expire_at)) => {
                let new_expire_at = expire_at.resolve()?;
                if let Some(run_at) = self.run_at {
                    if run_at > new_expire_at {
                        return Err(TaskError::config(format!(
                            "new expire_at ({}) is earlier than existing run_at ({})",
                            new_expire_at.timestamp(),
                            run_at.timestamp()
                        )));
                    }
                }
                self.expire_at = Some(new_expire_at);
                Ok(())
            }
        }
    }

    /// Force the task terminal regardless of remaining attempts, for rows
    /// that can never run (e.g. a handler that cannot be built).
    pub(crate) fn tombstone(&mut self, error: &TaskError) {
        self.last_fail_at = Some(Utc::now());
        self.last_error = Some(format!("Task failed: {}", error.detail()));
        self.run_at = None;
    }

    /// Exponential retry delay: 30 seconds plus `attempts` to the fourth
    /// power, measured from the current `run_at`. The result is clamped to
    /// `expire_at` so the scheduling invariant holds; a clamped task then
    /// expires on its next pickup.
    fn retry_backoff(&mut self) {
        let base = self.run_at.unwrap_or_else(Utc::now);
        let delay = RETRY_BASE_SECONDS + i64::from(self.attempts).pow(4);
        let mut next = base + Duration::seconds(delay);

        if let Some(expiry) = self.expire_at {
            if next > expiry {
                next = expiry;
            }
        }
        self.run_at = Some(next);
    }
}
