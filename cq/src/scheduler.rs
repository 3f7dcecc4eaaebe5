//! Scheduler loop
//!
//! A single timer-driven task that wakes at each minute boundary and
//! materializes due schedule entries into pending jobs. Ticks never
//! overlap and a minute is evaluated at most once; missed minutes (e.g.
//! after downtime) are not backfilled - the next matching occurrence
//! fires normally.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jobstore::{JobInstance, JobStore};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cron::{Recurrence, truncate_to_minute};

/// The scheduler loop. Construct once, then [`run`](Self::run) it as its
/// own tokio task; [`tick`](Self::tick) is exposed for tests.
pub struct SchedulerLoop {
    store: Arc<JobStore>,
    last_tick: Option<DateTime<Utc>>,
}

impl SchedulerLoop {
    pub fn new(store: Arc<JobStore>) -> Self {
        Self {
            store,
            last_tick: None,
        }
    }

    /// Evaluate every registered entry against one tick timestamp and
    /// enqueue a job per match. Returns how many jobs were enqueued.
    ///
    /// Store failures are logged and swallowed: the entry fires again at
    /// its next matching minute, never twice within one tick.
    pub fn tick(&mut self, at: DateTime<Utc>) -> usize {
        let tick = truncate_to_minute(at);
        if self.last_tick == Some(tick) {
            debug!(%tick, "Tick already evaluated, skipping");
            return 0;
        }
        self.last_tick = Some(tick);

        let entries = match self.store.list_entries() {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Failed to list schedule entries, retrying next tick");
                return 0;
            }
        };

        let mut enqueued = 0;
        for entry in entries {
            // Expressions are validated at registration; a parse failure
            // here means the stored row predates a grammar change.
            let recurrence = match Recurrence::parse(&entry.cron_expr) {
                Ok(r) => r,
                Err(e) => {
                    warn!(entry_id = %entry.id, error = %e, "Skipping unparseable entry");
                    continue;
                }
            };
            if !recurrence.matches(tick) {
                continue;
            }

            let job = JobInstance::from_entry(&entry);
            match self.store.enqueue(&job) {
                Ok(()) => {
                    debug!(
                        entry_id = %entry.id,
                        job_id = %job.id,
                        queue = %job.queue,
                        "Materialized job from schedule entry"
                    );
                    enqueued += 1;
                }
                Err(e) => {
                    warn!(entry_id = %entry.id, error = %e, "Enqueue failed, will fire on next matching tick");
                }
            }
        }

        if enqueued > 0 {
            info!(%tick, enqueued, "Scheduler tick enqueued jobs");
        }
        enqueued
    }

    /// Run until the shutdown signal flips.
    ///
    /// The signal is only observed between ticks, so an in-progress tick
    /// always finishes its enqueues before the loop exits.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Scheduler loop started");

        loop {
            let now = Utc::now();
            let next = truncate_to_minute(now) + ChronoDuration::minutes(1);
            let sleep_for = (next - now).to_std().unwrap_or_default();

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {
                    self.tick(next);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Scheduler loop stopped");
    }
}
