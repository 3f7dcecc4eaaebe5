//! Worker pool, dispatch table, and the handler contract

mod dispatch;
mod handler;
mod pool;

pub use dispatch::DispatchTable;
pub use handler::{HandlerError, JobContext, TaskHandler};
pub use pool::{WorkerConfig, WorkerPool};
