//! Cron entry registry
//!
//! Registration validates the recurrence expression and task definition,
//! then persists the entry so the scheduler loop rediscovers it after a
//! restart. The returned entry id is the caller's only handle for later
//! cancellation.

use std::sync::Arc;

use jobstore::{JobStore, RetryPolicy, ScheduleEntry, StoreError, TaskDefinition};
use thiserror::Error;
use tracing::info;

use crate::cron::Recurrence;

/// Default recurrence used when a producer does not specify one
pub const DEFAULT_CRON: &str = "*/1 * * * *";

/// Registration-time errors, surfaced synchronously to the caller
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid schedule '{expr}': {reason}")]
    InvalidSchedule { expr: String, reason: String },

    #[error("invalid task: {0}")]
    InvalidTask(String),

    #[error("schedule entry not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Owns schedule entry identity and persistence
#[derive(Clone)]
pub struct ScheduleRegistry {
    store: Arc<JobStore>,
}

impl ScheduleRegistry {
    pub fn new(store: Arc<JobStore>) -> Self {
        Self { store }
    }

    /// Register a recurring task.
    ///
    /// Not deduplicated by design: registering the same cron + task twice
    /// produces two independent entries.
    pub fn register(
        &self,
        cron_expr: &str,
        task: TaskDefinition,
        queue: &str,
        policy: RetryPolicy,
    ) -> Result<String, RegistryError> {
        if task.task_type.trim().is_empty() {
            return Err(RegistryError::InvalidTask("task type is empty".to_string()));
        }
        Recurrence::parse(cron_expr).map_err(|e| RegistryError::InvalidSchedule {
            expr: e.expr,
            reason: e.reason,
        })?;

        let entry = ScheduleEntry::new(cron_expr, queue, task, policy);
        self.store.put_entry(&entry)?;

        info!(
            entry_id = %entry.id,
            cron = %entry.cron_expr,
            queue = %entry.queue,
            task_type = %entry.task.task_type,
            "Registered schedule entry"
        );
        Ok(entry.id)
    }

    /// Cancel a registration
    pub fn unregister(&self, entry_id: &str) -> Result<(), RegistryError> {
        match self.store.delete_entry(entry_id) {
            Ok(()) => {
                info!(entry_id = %entry_id, "Unregistered schedule entry");
                Ok(())
            }
            Err(StoreError::EntryNotFound { id }) => Err(RegistryError::NotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    /// All registered entries
    pub fn entries(&self) -> Result<Vec<ScheduleEntry>, RegistryError> {
        Ok(self.store.list_entries()?)
    }
}
