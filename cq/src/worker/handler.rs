//! Task handler contract
//!
//! A handler is the executable capability a task type is bound to. The
//! core invokes it with the job's payload bytes and a bounded deadline;
//! everything else about the work is the handler's business.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Failure reported by a handler. Retryable up to the job's retry budget.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl HandlerError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// Execution context passed to a handler invocation
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: String,
    pub queue: String,
    /// 1-based number of this attempt
    pub attempt: u32,
    /// Deadline for this attempt; the pool stops waiting once it elapses
    pub timeout: Duration,
}

/// A handler bound to one task type.
///
/// Delivery is at-least-once: the same logical job may be executed more
/// than once (worker crash, lease expiry), so handlers must be idempotent.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Task type this handler serves; matched exactly against job task types
    fn task_type(&self) -> &'static str;

    /// Execute one job attempt
    async fn execute(&self, ctx: &JobContext, payload: &[u8]) -> Result<(), HandlerError>;
}
