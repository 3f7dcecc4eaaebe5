//! Persistent schedule entries
//!
//! A schedule entry binds a cron expression to a task definition and retry
//! policy. The entry id is the only handle a caller keeps to cancel the
//! registration later.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::generate_id;
use crate::job::{RetryPolicy, TaskDefinition};

/// One recurring registration, owned by the registry until unregistered
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub id: String,

    /// 5-field cron expression (minute granularity); validated at registration
    pub cron_expr: String,

    /// Queue the materialized jobs are enqueued to
    pub queue: String,

    pub task: TaskDefinition,

    pub policy: RetryPolicy,

    pub created_at: DateTime<Utc>,
}

impl ScheduleEntry {
    /// Create a new entry with a generated id.
    ///
    /// Registration is intentionally not deduplicated: registering the same
    /// cron + task twice yields two independent entries.
    pub fn new(
        cron_expr: impl Into<String>,
        queue: impl Into<String>,
        task: TaskDefinition,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            id: generate_id("entry", &task.task_type),
            cron_expr: cron_expr.into(),
            queue: queue.into(),
            task,
            policy,
            created_at: Utc::now(),
        }
    }
}
