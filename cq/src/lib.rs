//! CronQ - delayed and recurring task dispatch
//!
//! Producers register a task (typed payload + cron recurrence); the
//! scheduler loop materializes due entries into a durable queue; a
//! fixed-concurrency worker pool leases jobs, routes them through the
//! dispatch table to their handlers, and drives retry with exponential
//! backoff and per-task timeouts.
//!
//! # Core Guarantees
//!
//! - **At-least-once delivery**: a leased job whose worker crashes is
//!   reclaimed once its lease expires; handlers must be idempotent
//! - **Bounded retry**: a job runs at most `max_retries + 1` times, then
//!   lands in a retained, queryable failed state
//! - **No shared mutable state**: scheduler and workers coordinate only
//!   through the store's atomic lease/acknowledge/fail operations
//!
//! # Modules
//!
//! - [`registry`] - cron entry registration
//! - [`scheduler`] - the tick loop turning entries into jobs
//! - [`worker`] - worker pool, dispatch table, handler contract
//! - [`lifecycle`] - startup and graceful shutdown coordination
//! - [`cron`] - recurrence expression parsing and matching
//! - [`handlers`] - bundled example handlers
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod cli;
pub mod config;
pub mod cron;
pub mod handlers;
pub mod lifecycle;
pub mod registry;
pub mod scheduler;
pub mod worker;

// Re-export commonly used types
pub use config::{Config, LifecycleConfig, RetryConfig, StorageConfig};
pub use crate::cron::{Recurrence, ScheduleParseError};
pub use lifecycle::{Dispatcher, DispatcherConfig, LifecycleState};
pub use registry::{RegistryError, ScheduleRegistry};
pub use scheduler::SchedulerLoop;
pub use worker::{
    DispatchTable, HandlerError, JobContext, TaskHandler, WorkerConfig, WorkerPool,
};
