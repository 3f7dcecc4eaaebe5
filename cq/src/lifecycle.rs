//! Lifecycle controller
//!
//! The [`Dispatcher`] owns the scheduler loop, the worker pool, and the
//! lease sweeper as independent tokio tasks, constructed per process with
//! an injected store and dispatch table. It coordinates startup ordering
//! and deadline-bounded graceful shutdown; there is no global state.

use std::sync::Arc;
use std::time::Duration;

use eyre::Result;
use jobstore::JobStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::scheduler::SchedulerLoop;
use crate::worker::{DispatchTable, WorkerConfig, WorkerPool};

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub worker: WorkerConfig,

    /// Interval between lease-expiry reclamation sweeps
    pub sweep_interval_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker: WorkerConfig::default(),
            sweep_interval_ms: 5_000,
        }
    }
}

impl DispatcherConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
        }
    }
}

/// Drives startup and shutdown of the dispatch core
pub struct Dispatcher {
    config: DispatcherConfig,
    store: Arc<JobStore>,
    dispatch: Arc<DispatchTable>,
    state: LifecycleState,
    shutdown_tx: Option<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, store: Arc<JobStore>, dispatch: DispatchTable) -> Self {
        Self {
            config,
            store,
            dispatch: Arc::new(dispatch),
            state: LifecycleState::Stopped,
            shutdown_tx: None,
            tasks: Vec::new(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Launch the scheduler loop, worker pool, and lease sweeper.
    ///
    /// Idempotent: calls after the first are no-ops until the dispatcher
    /// is stopped again.
    pub fn start(&mut self) -> Result<()> {
        if self.state != LifecycleState::Stopped {
            debug!(state = %self.state, "Dispatcher already started");
            return Ok(());
        }
        self.state = LifecycleState::Starting;

        // Leases abandoned by a previous process may already be expired;
        // reclaim them before workers start polling.
        match self.store.release_expired() {
            Ok(0) => {}
            Ok(n) => info!(reclaimed = n, "Reclaimed stale leases from previous run"),
            Err(e) => warn!(error = %e, "Startup lease sweep failed"),
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let scheduler = SchedulerLoop::new(self.store.clone());
        self.tasks.push(tokio::spawn(scheduler.run(shutdown_rx.clone())));

        let pool = WorkerPool::new(
            self.config.worker.clone(),
            self.store.clone(),
            self.dispatch.clone(),
        );
        // Hold the slot handles directly so a missed deadline can abort
        // the slots themselves, not just a supervisor task.
        self.tasks.extend(pool.spawn(shutdown_rx.clone()));

        self.tasks.push(tokio::spawn(run_sweeper(
            self.store.clone(),
            self.config.sweep_interval(),
            shutdown_rx,
        )));

        self.shutdown_tx = Some(shutdown_tx);
        self.state = LifecycleState::Running;
        info!("Dispatcher running");
        Ok(())
    }

    /// Stop accepting new work and wait for in-flight jobs to settle.
    ///
    /// Returns `true` when everything drained within `deadline`. On a
    /// dirty stop the remaining tasks are aborted; any lease they held
    /// expires and is reclaimed by the next sweep. Idempotent.
    pub async fn shutdown(&mut self, deadline: Duration) -> Result<bool> {
        if self.state == LifecycleState::Stopped {
            return Ok(true);
        }
        self.state = LifecycleState::Stopping;
        info!(deadline_ms = deadline.as_millis() as u64, "Dispatcher shutting down");

        if let Some(tx) = self.shutdown_tx.take() {
            // Receivers may already be gone on a crashed task; that is
            // exactly the case the abort path below covers.
            let _ = tx.send(true);
            // Keep the sender alive until the wait finishes so slots see
            // a flag, not a closed channel.
            let clean = self.wait_for_tasks(deadline).await;
            drop(tx);
            self.state = LifecycleState::Stopped;
            info!(clean, "Dispatcher stopped");
            return Ok(clean);
        }

        self.state = LifecycleState::Stopped;
        Ok(true)
    }

    async fn wait_for_tasks(&mut self, deadline: Duration) -> bool {
        let deadline_at = tokio::time::Instant::now() + deadline;

        while !self.tasks.is_empty() && tokio::time::Instant::now() < deadline_at {
            self.tasks.retain(|t| !t.is_finished());
            if self.tasks.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        self.tasks.retain(|t| !t.is_finished());
        if self.tasks.is_empty() {
            return true;
        }

        warn!(remaining = self.tasks.len(), "Shutdown deadline elapsed, aborting tasks");
        for task in self.tasks.drain(..) {
            task.abort();
        }
        false
    }
}

/// Periodically reclaim expired leases.
///
/// This is the background process that makes worker crashes survivable: a
/// job whose lease expired becomes Pending again (or Failed when its
/// retry budget is gone) without manual intervention.
async fn run_sweeper(store: Arc<JobStore>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    debug!(interval_ms = interval.as_millis() as u64, "Lease sweeper started");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                match store.release_expired() {
                    Ok(0) => {}
                    Ok(n) => debug!(released = n, "Sweeper released expired leases"),
                    Err(e) => warn!(error = %e, "Lease sweep failed"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    debug!("Lease sweeper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher() -> Dispatcher {
        let store = Arc::new(JobStore::in_memory().unwrap());
        Dispatcher::new(DispatcherConfig::default(), store, DispatchTable::new())
    }

    #[tokio::test]
    async fn test_start_and_clean_shutdown() {
        let mut d = dispatcher();
        assert_eq!(d.state(), LifecycleState::Stopped);

        d.start().unwrap();
        assert_eq!(d.state(), LifecycleState::Running);

        let clean = d.shutdown(Duration::from_secs(5)).await.unwrap();
        assert!(clean);
        assert_eq!(d.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let mut d = dispatcher();
        d.start().unwrap();
        let tasks_after_first = d.tasks.len();
        d.start().unwrap();
        assert_eq!(d.tasks.len(), tasks_after_first);

        d.shutdown(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let mut d = dispatcher();
        d.start().unwrap();

        assert!(d.shutdown(Duration::from_secs(5)).await.unwrap());
        assert!(d.shutdown(Duration::from_secs(5)).await.unwrap());
        assert_eq!(d.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_restart_after_shutdown() {
        let mut d = dispatcher();
        d.start().unwrap();
        d.shutdown(Duration::from_secs(5)).await.unwrap();

        d.start().unwrap();
        assert_eq!(d.state(), LifecycleState::Running);
        d.shutdown(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_without_start() {
        let mut d = dispatcher();
        assert!(d.shutdown(Duration::from_millis(10)).await.unwrap());
    }
}
