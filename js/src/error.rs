//! Store error types

use thiserror::Error;

/// Errors surfaced by the job store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Transient storage failure. Callers retry; the scheduler loop
    /// retries on its next tick.
    #[error("store unavailable: {0}")]
    Unavailable(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("job not found: {id}")]
    JobNotFound { id: String },

    /// The job is gone or no longer leased. Stable and non-corrupting:
    /// queue state is untouched when this is returned.
    #[error("job already acknowledged or reclaimed: {id}")]
    AlreadyAcknowledged { id: String },

    #[error("schedule entry not found: {id}")]
    EntryNotFound { id: String },
}
