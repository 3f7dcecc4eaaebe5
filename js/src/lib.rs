//! JobStore - durable job queue persistence
//!
//! SQLite-backed storage for the task dispatch core: schedule entries
//! (recurring registrations) and job instances (concrete enqueued work).
//! Every queue transition - enqueue, lease, acknowledge, fail, reclaim -
//! is a single SQL statement or transaction, so concurrent worker slots
//! coordinate entirely through the store and never hold the same lease.
//!
//! # Modules
//!
//! - [`store`] - the [`JobStore`] itself
//! - [`job`] - task definitions, retry policy, and job instances
//! - [`schedule`] - persistent schedule entries
//! - [`error`] - store error taxonomy
//! - [`id`] - entry/job id generation

pub mod error;
pub mod id;
pub mod job;
pub mod schedule;
pub mod store;

pub use error::StoreError;
pub use id::generate_id;
pub use job::{BackoffPolicy, JobInstance, JobState, RetryPolicy, TaskDefinition};
pub use schedule::ScheduleEntry;
pub use store::{JobStore, QueueStat};
