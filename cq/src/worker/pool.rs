//! Worker pool - fixed-concurrency job execution slots
//!
//! Each slot is an independent tokio task looping lease -> dispatch ->
//! acknowledge/fail. Slots share nothing in-process; the store's atomic
//! lease is the only arbiter, so a slot never holds more than one job and
//! no job is ever held by two slots.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use jobstore::{JobInstance, JobStore};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::dispatch::DispatchTable;
use super::handler::JobContext;

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of concurrent execution slots
    pub concurrency: usize,

    /// Queues to lease from, in round-robin fairness
    pub queues: Vec<String>,

    /// How long a slot sleeps after an empty poll
    #[serde(rename = "poll-interval-ms")]
    pub poll_interval_ms: u64,

    /// Lease duration; size this above the largest task timeout
    #[serde(rename = "lease-for-ms")]
    pub lease_for_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            queues: vec!["default".to_string()],
            poll_interval_ms: 500,
            lease_for_ms: 60_000,
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lease_for(&self) -> Duration {
        Duration::from_millis(self.lease_for_ms)
    }
}

/// The pool of execution slots
pub struct WorkerPool {
    config: WorkerConfig,
    store: Arc<JobStore>,
    dispatch: Arc<DispatchTable>,
}

impl WorkerPool {
    pub fn new(config: WorkerConfig, store: Arc<JobStore>, dispatch: Arc<DispatchTable>) -> Self {
        Self {
            config,
            store,
            dispatch,
        }
    }

    /// Spawn every slot as its own tokio task and return their handles,
    /// so the lifecycle controller can wait on - or abort - each slot
    /// directly.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> Vec<tokio::task::JoinHandle<()>> {
        info!(
            concurrency = self.config.concurrency,
            queues = ?self.config.queues,
            "Worker pool started"
        );

        (0..self.config.concurrency)
            .map(|slot_id| {
                let store = self.store.clone();
                let dispatch = self.dispatch.clone();
                let config = self.config.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(run_slot(slot_id, store, dispatch, config, shutdown))
            })
            .collect()
    }

    /// Run every slot until the shutdown signal flips, then wait for all
    /// of them to finish their in-flight job and drain.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        join_all(self.spawn(shutdown)).await;
        info!("Worker pool stopped");
    }
}

/// One slot's lease/execute loop.
///
/// The shutdown signal is checked between jobs only: an in-flight handler
/// always reaches its acknowledge/fail before the slot exits.
async fn run_slot(
    slot_id: usize,
    store: Arc<JobStore>,
    dispatch: Arc<DispatchTable>,
    config: WorkerConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(slot_id, "Worker slot started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        match store.lease(&config.queues, config.lease_for()) {
            Ok(Some(job)) => {
                process_job(&store, &dispatch, job).await;
            }
            Ok(None) => {
                tokio::select! {
                    _ = tokio::time::sleep(config.poll_interval()) => {}
                    changed = shutdown.changed() => {
                        // A dropped sender means the controller is gone;
                        // treat it the same as a stop signal.
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(slot_id, error = %e, "Lease failed, backing off");
                tokio::time::sleep(config.poll_interval()).await;
            }
        }
    }

    debug!(slot_id, "Worker slot stopped");
}

/// Execute one leased job and report its outcome to the store.
///
/// Outcome errors are logged, not propagated: if an acknowledge or fail is
/// lost to a store hiccup, lease expiry reclaims the job.
pub(crate) async fn process_job(store: &JobStore, dispatch: &DispatchTable, job: JobInstance) {
    let task_type = job.task.task_type.as_str();

    let Some(handler) = dispatch.get(task_type) else {
        // Permanent misconfiguration, not a transient failure: fail the
        // job immediately and do not retry.
        warn!(job_id = %job.id, task_type, "No handler registered for task type");
        let reason = format!("no handler registered for task type \"{}\"", task_type);
        if let Err(e) = store.fail_permanent(&job.id, &reason) {
            warn!(job_id = %job.id, error = %e, "Failed to record unknown-type failure");
        }
        return;
    };

    let ctx = JobContext {
        job_id: job.id.clone(),
        queue: job.queue.clone(),
        attempt: job.attempt,
        timeout: job.policy.timeout(),
    };

    debug!(job_id = %job.id, task_type, attempt = job.attempt, "Dispatching job");

    let outcome = tokio::time::timeout(ctx.timeout, handler.execute(&ctx, &job.task.payload)).await;

    match outcome {
        Ok(Ok(())) => {
            if let Err(e) = store.acknowledge(&job.id) {
                warn!(job_id = %job.id, error = %e, "Acknowledge failed");
            } else {
                info!(job_id = %job.id, task_type, attempt = job.attempt, "Job succeeded");
            }
        }
        Ok(Err(handler_err)) => {
            warn!(job_id = %job.id, task_type, attempt = job.attempt, error = %handler_err, "Handler failed");
            if let Err(e) = store.fail(&job.id, &handler_err.to_string()) {
                warn!(job_id = %job.id, error = %e, "Failed to record handler failure");
            }
        }
        Err(_elapsed) => {
            // The underlying future is dropped here; the work may continue
            // out-of-band elsewhere, the core only stops waiting for it.
            let reason = format!("handler timed out after {}ms", job.policy.timeout_ms);
            warn!(job_id = %job.id, task_type, attempt = job.attempt, "Handler timed out");
            if let Err(e) = store.fail(&job.id, &reason) {
                warn!(job_id = %job.id, error = %e, "Failed to record timeout");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::handler::{HandlerError, TaskHandler};
    use async_trait::async_trait;
    use jobstore::{BackoffPolicy, JobState, RetryPolicy, TaskDefinition};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingHandler {
        calls: AtomicU32,
        fail_first: u32,
    }

    impl CountingHandler {
        fn new(fail_first: u32) -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_first,
            }
        }
    }

    #[async_trait]
    impl TaskHandler for CountingHandler {
        fn task_type(&self) -> &'static str {
            "test:counting"
        }

        async fn execute(&self, _ctx: &JobContext, _payload: &[u8]) -> Result<(), HandlerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.fail_first {
                Err(HandlerError::failed(format!("induced failure {}", call)))
            } else {
                Ok(())
            }
        }
    }

    struct SleepyHandler;

    #[async_trait]
    impl TaskHandler for SleepyHandler {
        fn task_type(&self) -> &'static str {
            "test:sleepy"
        }

        async fn execute(&self, _ctx: &JobContext, _payload: &[u8]) -> Result<(), HandlerError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }
    }

    fn store() -> Arc<JobStore> {
        Arc::new(
            JobStore::in_memory()
                .unwrap()
                .with_backoff(BackoffPolicy { base_ms: 1, cap_ms: 2 }),
        )
    }

    fn enqueue(store: &JobStore, task_type: &str, policy: RetryPolicy) -> String {
        let job = JobInstance::new("default", TaskDefinition::new(task_type, b"{}".to_vec()), policy);
        store.enqueue(&job).unwrap();
        job.id
    }

    fn lease_one(store: &JobStore) -> JobInstance {
        store
            .lease(&["default".to_string()], Duration::from_secs(60))
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_process_job_success_acknowledges() {
        let store = store();
        let mut table = DispatchTable::new();
        table.register(Arc::new(CountingHandler::new(0)));

        let job_id = enqueue(&store, "test:counting", RetryPolicy::default());
        process_job(&store, &table, lease_one(&store)).await;

        assert!(store.get_job(&job_id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_process_job_failure_requeues() {
        let store = store();
        let mut table = DispatchTable::new();
        table.register(Arc::new(CountingHandler::new(10)));

        let job_id = enqueue(&store, "test:counting", RetryPolicy { max_retries: 2, timeout_ms: 1_000 });
        process_job(&store, &table, lease_one(&store)).await;

        let stored = store.get_job(&job_id).unwrap().unwrap();
        assert_eq!(stored.state, JobState::Pending);
        assert_eq!(stored.attempt, 1);
        assert!(stored.last_error.unwrap().contains("induced failure"));
    }

    #[tokio::test]
    async fn test_process_job_unknown_type_fails_permanently() {
        let store = store();
        let table = DispatchTable::new();

        let job_id = enqueue(&store, "test:unregistered", RetryPolicy::default());
        process_job(&store, &table, lease_one(&store)).await;

        let stored = store.get_job(&job_id).unwrap().unwrap();
        assert_eq!(stored.state, JobState::Failed);
        // No handler ran, so no attempt was consumed.
        assert_eq!(stored.attempt, 0);
        assert!(stored.last_error.unwrap().contains("no handler registered"));
    }

    #[tokio::test]
    async fn test_process_job_timeout_counts_as_failure() {
        let store = store();
        let mut table = DispatchTable::new();
        table.register(Arc::new(SleepyHandler));

        let job_id = enqueue(&store, "test:sleepy", RetryPolicy { max_retries: 1, timeout_ms: 50 });
        process_job(&store, &table, lease_one(&store)).await;

        let stored = store.get_job(&job_id).unwrap().unwrap();
        assert_eq!(stored.state, JobState::Pending);
        assert_eq!(stored.attempt, 1);
        assert!(stored.last_error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_pool_drains_jobs_and_stops_on_shutdown() {
        let store = store();
        let handler = Arc::new(CountingHandler::new(0));
        let mut table = DispatchTable::new();
        table.register(handler.clone());

        for _ in 0..5 {
            enqueue(&store, "test:counting", RetryPolicy::default());
        }

        let config = WorkerConfig {
            concurrency: 2,
            poll_interval_ms: 10,
            ..Default::default()
        };
        let pool = WorkerPool::new(config, store.clone(), Arc::new(table));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pool_task = tokio::spawn(pool.run(shutdown_rx));

        // Wait for the queue to drain.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !store.list_jobs(None, None).unwrap().is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "queue did not drain");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(handler.calls.load(Ordering::SeqCst), 5);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), pool_task)
            .await
            .expect("pool should stop after shutdown signal")
            .unwrap();
    }

    #[test]
    fn test_worker_config_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.queues, vec!["default".to_string()]);
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.lease_for(), Duration::from_millis(60_000));
    }
}
