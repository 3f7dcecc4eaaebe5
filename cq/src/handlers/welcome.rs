//! Welcome email handler
//!
//! The bundled example task: a JSON payload naming a user, "sent" by
//! logging. Stands in for a real mail integration and doubles as the
//! reference for writing handlers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::worker::{HandlerError, JobContext, TaskHandler};

/// Task type served by [`WelcomeEmailHandler`]
pub const TASK_TYPE_WELCOME: &str = "email:welcome";

/// Payload for a welcome email job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WelcomePayload {
    pub user_id: u64,
    pub email: String,
}

impl WelcomePayload {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Sends (well, logs) a welcome email
pub struct WelcomeEmailHandler;

#[async_trait]
impl TaskHandler for WelcomeEmailHandler {
    fn task_type(&self) -> &'static str {
        TASK_TYPE_WELCOME
    }

    async fn execute(&self, ctx: &JobContext, payload: &[u8]) -> Result<(), HandlerError> {
        let welcome = WelcomePayload::from_bytes(payload)
            .map_err(|e| HandlerError::InvalidPayload(e.to_string()))?;

        info!(
            job_id = %ctx.job_id,
            user_id = welcome.user_id,
            email = %welcome.email,
            attempt = ctx.attempt,
            "Sending welcome email"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ctx() -> JobContext {
        JobContext {
            job_id: "test-job-welcome".to_string(),
            queue: "default".to_string(),
            attempt: 1,
            timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn test_payload_round_trip() {
        let payload = WelcomePayload {
            user_id: 123,
            email: "user@example.com".to_string(),
        };
        let bytes = payload.to_bytes().unwrap();
        assert_eq!(WelcomePayload::from_bytes(&bytes).unwrap(), payload);
    }

    #[tokio::test]
    async fn test_execute_with_valid_payload() {
        let handler = WelcomeEmailHandler;
        let bytes = WelcomePayload {
            user_id: 123,
            email: "user@example.com".to_string(),
        }
        .to_bytes()
        .unwrap();

        assert!(handler.execute(&ctx(), &bytes).await.is_ok());
    }

    #[tokio::test]
    async fn test_execute_rejects_malformed_payload() {
        let handler = WelcomeEmailHandler;
        let err = handler.execute(&ctx(), b"not json").await.unwrap_err();
        assert!(matches!(err, HandlerError::InvalidPayload(_)));
    }
}
