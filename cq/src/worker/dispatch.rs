//! Dispatch table - task type to handler routing
//!
//! Built once at worker startup and immutable thereafter; there is no
//! hot-reload. Lookup is exact string match, and a miss is handled by the
//! pool as a permanent failure (see `pool.rs`).

use std::collections::HashMap;
use std::sync::Arc;

use super::handler::TaskHandler;

/// Static mapping from task type to handler
#[derive(Default)]
pub struct DispatchTable {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a handler under its declared task type
    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(handler.task_type().to_string(), handler);
    }

    /// Look up the handler for a task type
    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(task_type).cloned()
    }

    pub fn has_handler(&self, task_type: &str) -> bool {
        self.handlers.contains_key(task_type)
    }

    /// Registered task types
    pub fn task_types(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
