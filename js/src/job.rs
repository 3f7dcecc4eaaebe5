//! Job domain types
//!
//! A [`TaskDefinition`] describes one unit of work (type + payload bytes);
//! a [`JobInstance`] is one concrete enqueued execution of it, carrying the
//! [`RetryPolicy`] it was registered with and its queue bookkeeping.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::generate_id;
use crate::schedule::ScheduleEntry;

/// Immutable description of one unit of work.
///
/// Identity is structural (type + payload); two definitions with the same
/// fields are the same work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Task type string, matched exactly against the dispatch table
    pub task_type: String,

    /// Opaque payload bytes; the handler owns the encoding
    pub payload: Vec<u8>,
}

impl TaskDefinition {
    /// Create a new task definition
    pub fn new(task_type: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            task_type: task_type.into(),
            payload: payload.into(),
        }
    }
}

/// Retry and timeout policy attached at registration time.
///
/// Applies to every job instance spawned from the same schedule entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt; a job runs at most `max_retries + 1` times
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// Per-attempt execution deadline in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// Total execution budget: the first attempt plus retries
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Per-attempt deadline as a Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Retry delay schedule: `min(cap, base * 2^attempt)` plus a small jitter.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base_ms: u64,
    pub cap_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: 1_000,
            cap_ms: 15 * 60 * 1_000,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the attempt after `attempt` may run again.
    ///
    /// Jitter is additive, so the delay never undershoots the exponential
    /// floor.
    pub fn delay(&self, attempt: u32) -> Duration {
        use rand::Rng;

        let exp = self
            .base_ms
            .saturating_mul(2u64.saturating_pow(attempt))
            .min(self.cap_ms);
        let jitter = if self.base_ms > 1 {
            rand::rng().random_range(0..self.base_ms / 2)
        } else {
            0
        };
        Duration::from_millis(exp + jitter)
    }
}

/// Lifecycle state of a persisted job.
///
/// Success removes the row, so only these three states are ever stored.
/// `Failed` is terminal and retained for inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Leased,
    Failed,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Leased => write!(f, "leased"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "leased" => Ok(Self::Leased),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown job state: {}", s)),
        }
    }
}

/// One concrete enqueued execution of a task definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInstance {
    pub id: String,

    /// Registration that spawned this job; `None` for one-shot enqueues
    pub schedule_entry_id: Option<String>,

    pub queue: String,

    pub task: TaskDefinition,

    pub policy: RetryPolicy,

    /// Number of the attempt currently (or last) executing; assigned at
    /// lease time, so a never-leased job reads 0
    pub attempt: u32,

    pub state: JobState,

    pub enqueued_at: DateTime<Utc>,

    /// Earliest instant the job may be leased; pushed forward by retry backoff
    pub available_at: DateTime<Utc>,

    pub lease_expires_at: Option<DateTime<Utc>>,

    /// Most recent failure reason, retained through terminal failure
    pub last_error: Option<String>,
}

impl JobInstance {
    /// Create a pending one-shot job
    pub fn new(queue: impl Into<String>, task: TaskDefinition, policy: RetryPolicy) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id("job", &task.task_type),
            schedule_entry_id: None,
            queue: queue.into(),
            task,
            policy,
            attempt: 0,
            state: JobState::Pending,
            enqueued_at: now,
            available_at: now,
            lease_expires_at: None,
            last_error: None,
        }
    }

    /// Create a pending job materialized from a schedule entry
    pub fn from_entry(entry: &ScheduleEntry) -> Self {
        let mut job = Self::new(entry.queue.clone(), entry.task.clone(), entry.policy);
        job.schedule_entry_id = Some(entry.id.clone());
        job
    }
}
