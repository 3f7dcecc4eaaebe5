//! Bundled example handlers

mod welcome;

pub use welcome::{TASK_TYPE_WELCOME, WelcomeEmailHandler, WelcomePayload};
