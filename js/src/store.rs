//! Durable job queue store
//!
//! SQLite-backed persistence for schedule entries and job instances. All
//! queue transitions (lease, acknowledge, fail, reclaim) run as single
//! statements or transactions on one connection, which is what enforces
//! the "at most one unexpired lease per job" invariant - worker slots
//! coordinate through the store, never through in-process state.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::job::{BackoffPolicy, JobInstance, JobState, RetryPolicy, TaskDefinition};
use crate::schedule::ScheduleEntry;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS schedule_entries (
    id          TEXT PRIMARY KEY,
    cron_expr   TEXT NOT NULL,
    queue       TEXT NOT NULL,
    task_type   TEXT NOT NULL,
    payload     BLOB NOT NULL,
    max_retries INTEGER NOT NULL,
    timeout_ms  INTEGER NOT NULL,
    created_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS jobs (
    id                TEXT PRIMARY KEY,
    schedule_entry_id TEXT,
    queue             TEXT NOT NULL,
    task_type         TEXT NOT NULL,
    payload           BLOB NOT NULL,
    max_retries       INTEGER NOT NULL,
    timeout_ms        INTEGER NOT NULL,
    attempt           INTEGER NOT NULL,
    state             TEXT NOT NULL,
    enqueued_at       INTEGER NOT NULL,
    available_at      INTEGER NOT NULL,
    lease_expires_at  INTEGER,
    last_error        TEXT
);

CREATE INDEX IF NOT EXISTS idx_jobs_queue_state ON jobs (queue, state, available_at);
CREATE INDEX IF NOT EXISTS idx_jobs_lease ON jobs (state, lease_expires_at);
";

/// Per-queue job counts for status display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStat {
    pub queue: String,
    pub pending: u64,
    pub leased: u64,
    pub failed: u64,
}

/// The durable job queue.
///
/// One instance per process; share it behind an `Arc`. Methods are
/// synchronous and hold the connection lock only for the duration of a
/// single statement or transaction.
pub struct JobStore {
    conn: Mutex<Connection>,
    backoff: BackoffPolicy,
    /// Rotation cursor for round-robin queue selection in [`Self::lease`]
    cursor: AtomicUsize,
}

impl JobStore {
    /// Open (creating if needed) the store under the given directory
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join("jobs.db");
        debug!(?path, "JobStore::open");

        let conn = Connection::open(&path)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory store (tests and ephemeral use)
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            backoff: BackoffPolicy::default(),
            cursor: AtomicUsize::new(0),
        })
    }

    /// Override the retry backoff schedule
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A poisoned lock only means another thread panicked mid-statement;
        // the connection itself is still usable.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ------------------------------------------------------------------
    // Schedule entries
    // ------------------------------------------------------------------

    /// Persist a schedule entry so it survives restart
    pub fn put_entry(&self, entry: &ScheduleEntry) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO schedule_entries
             (id, cron_expr, queue, task_type, payload, max_retries, timeout_ms, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.id,
                entry.cron_expr,
                entry.queue,
                entry.task.task_type,
                entry.task.payload,
                entry.policy.max_retries,
                entry.policy.timeout_ms as i64,
                entry.created_at.timestamp_millis(),
            ],
        )?;
        debug!(entry_id = %entry.id, cron = %entry.cron_expr, "Stored schedule entry");
        Ok(())
    }

    /// Fetch one schedule entry
    pub fn get_entry(&self, entry_id: &str) -> Result<Option<ScheduleEntry>, StoreError> {
        let entry = self
            .conn()
            .query_row(
                "SELECT id, cron_expr, queue, task_type, payload, max_retries, timeout_ms, created_at
                 FROM schedule_entries WHERE id = ?1",
                params![entry_id],
                entry_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    /// Remove a schedule entry
    pub fn delete_entry(&self, entry_id: &str) -> Result<(), StoreError> {
        let removed = self
            .conn()
            .execute("DELETE FROM schedule_entries WHERE id = ?1", params![entry_id])?;
        if removed == 0 {
            return Err(StoreError::EntryNotFound {
                id: entry_id.to_string(),
            });
        }
        debug!(entry_id = %entry_id, "Deleted schedule entry");
        Ok(())
    }

    /// All registered entries, oldest first
    pub fn list_entries(&self) -> Result<Vec<ScheduleEntry>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, cron_expr, queue, task_type, payload, max_retries, timeout_ms, created_at
             FROM schedule_entries ORDER BY created_at ASC, id ASC",
        )?;
        let entries = stmt
            .query_map([], entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    // ------------------------------------------------------------------
    // Jobs
    // ------------------------------------------------------------------

    /// Append a job to the tail of its queue's pending set
    pub fn enqueue(&self, job: &JobInstance) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO jobs
             (id, schedule_entry_id, queue, task_type, payload, max_retries, timeout_ms,
              attempt, state, enqueued_at, available_at, lease_expires_at, last_error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                job.id,
                job.schedule_entry_id,
                job.queue,
                job.task.task_type,
                job.task.payload,
                job.policy.max_retries,
                job.policy.timeout_ms as i64,
                job.attempt,
                job.state.to_string(),
                job.enqueued_at.timestamp_millis(),
                job.available_at.timestamp_millis(),
                job.lease_expires_at.map(|t| t.timestamp_millis()),
                job.last_error,
            ],
        )?;
        debug!(job_id = %job.id, queue = %job.queue, task_type = %job.task.task_type, "Enqueued job");
        Ok(())
    }

    /// Atomically lease one due pending job.
    ///
    /// FIFO within a queue; strict round-robin across `queues` (the scan
    /// starts one queue further each call, so no queue starves). The
    /// returned job is already transitioned to Leased and carries the
    /// incremented attempt number. `Ok(None)` is the expected empty-poll
    /// signal, not an error.
    pub fn lease(
        &self,
        queues: &[String],
        lease_for: Duration,
    ) -> Result<Option<JobInstance>, StoreError> {
        if queues.is_empty() {
            return Ok(None);
        }

        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        let expires_ms = now_ms + duration_millis(lease_for);
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % queues.len();

        let mut conn = self.conn();
        let tx = conn.transaction()?;

        for offset in 0..queues.len() {
            let queue = &queues[(start + offset) % queues.len()];
            let candidate = tx
                .query_row(
                    "SELECT id, schedule_entry_id, queue, task_type, payload, max_retries,
                            timeout_ms, attempt, state, enqueued_at, available_at,
                            lease_expires_at, last_error
                     FROM jobs
                     WHERE queue = ?1 AND state = 'pending' AND available_at <= ?2
                     ORDER BY enqueued_at ASC, id ASC
                     LIMIT 1",
                    params![queue, now_ms],
                    job_from_row,
                )
                .optional()?;

            if let Some(mut job) = candidate {
                tx.execute(
                    "UPDATE jobs
                     SET state = 'leased', attempt = attempt + 1, lease_expires_at = ?1
                     WHERE id = ?2",
                    params![expires_ms, job.id],
                )?;
                tx.commit()?;

                job.state = JobState::Leased;
                job.attempt += 1;
                job.lease_expires_at = Some(millis_to_datetime(expires_ms));
                debug!(
                    job_id = %job.id,
                    queue = %job.queue,
                    attempt = job.attempt,
                    "Leased job"
                );
                return Ok(Some(job));
            }
        }

        Ok(None)
    }

    /// Remove a leased job after successful execution.
    ///
    /// Acknowledging a job that is gone or no longer leased returns
    /// [`StoreError::AlreadyAcknowledged`] without touching queue state.
    pub fn acknowledge(&self, job_id: &str) -> Result<(), StoreError> {
        let removed = self.conn().execute(
            "DELETE FROM jobs WHERE id = ?1 AND state = 'leased'",
            params![job_id],
        )?;
        if removed == 0 {
            return Err(StoreError::AlreadyAcknowledged {
                id: job_id.to_string(),
            });
        }
        debug!(job_id = %job_id, "Acknowledged job");
        Ok(())
    }

    /// Record a failed attempt for a leased job.
    ///
    /// While the retry budget allows (`attempt < max_retries + 1`) the job
    /// is re-enqueued as Pending with an exponential backoff delay;
    /// otherwise it moves to the terminal, retained Failed state. Returns
    /// the state the job ended in.
    pub fn fail(&self, job_id: &str, reason: &str) -> Result<JobState, StoreError> {
        let now = Utc::now();
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let row: Option<(u32, u32)> = tx
            .query_row(
                "SELECT attempt, max_retries FROM jobs WHERE id = ?1 AND state = 'leased'",
                params![job_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        let Some((attempt, max_retries)) = row else {
            return Err(StoreError::JobNotFound {
                id: job_id.to_string(),
            });
        };

        let next_state = if attempt < max_retries + 1 {
            let delay = self.backoff.delay(attempt);
            let available_ms = now.timestamp_millis() + duration_millis(delay);
            tx.execute(
                "UPDATE jobs
                 SET state = 'pending', available_at = ?1, lease_expires_at = NULL, last_error = ?2
                 WHERE id = ?3",
                params![available_ms, reason, job_id],
            )?;
            debug!(job_id = %job_id, attempt, delay_ms = delay.as_millis() as u64, "Job failed, retrying after backoff");
            JobState::Pending
        } else {
            tx.execute(
                "UPDATE jobs
                 SET state = 'failed', lease_expires_at = NULL, last_error = ?1
                 WHERE id = ?2",
                params![reason, job_id],
            )?;
            warn!(job_id = %job_id, attempt, reason = %reason, "Job failed permanently, retries exhausted");
            JobState::Failed
        };

        tx.commit()?;
        Ok(next_state)
    }

    /// Terminally fail a leased job without consuming an attempt.
    ///
    /// Used for permanent misconfiguration (no handler for the task type):
    /// nothing ran, so the attempt incremented at lease time is rolled back.
    pub fn fail_permanent(&self, job_id: &str, reason: &str) -> Result<(), StoreError> {
        let updated = self.conn().execute(
            "UPDATE jobs
             SET state = 'failed',
                 attempt = CASE WHEN attempt > 0 THEN attempt - 1 ELSE 0 END,
                 lease_expires_at = NULL,
                 last_error = ?1
             WHERE id = ?2 AND state = 'leased'",
            params![reason, job_id],
        )?;
        if updated == 0 {
            return Err(StoreError::JobNotFound {
                id: job_id.to_string(),
            });
        }
        warn!(job_id = %job_id, reason = %reason, "Job failed permanently");
        Ok(())
    }

    /// Reclaim every leased job whose lease has expired.
    ///
    /// Jobs with retry budget left become Pending and immediately
    /// leasable; jobs that crashed on their final attempt move to Failed.
    /// Idempotent: a second sweep finds nothing to free. Returns how many
    /// jobs changed state.
    pub fn release_expired(&self) -> Result<usize, StoreError> {
        let now_ms = Utc::now().timestamp_millis();
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let exhausted = tx.execute(
            "UPDATE jobs
             SET state = 'failed', lease_expires_at = NULL,
                 last_error = 'lease expired with no retries left'
             WHERE state = 'leased' AND lease_expires_at <= ?1 AND attempt >= max_retries + 1",
            params![now_ms],
        )?;
        let reclaimed = tx.execute(
            "UPDATE jobs
             SET state = 'pending', lease_expires_at = NULL, available_at = ?1
             WHERE state = 'leased' AND lease_expires_at <= ?1",
            params![now_ms],
        )?;
        tx.commit()?;

        let total = exhausted + reclaimed;
        if total > 0 {
            info!(reclaimed, exhausted, "Released expired leases");
        }
        Ok(total)
    }

    /// Fetch one job by id
    pub fn get_job(&self, job_id: &str) -> Result<Option<JobInstance>, StoreError> {
        let job = self
            .conn()
            .query_row(
                "SELECT id, schedule_entry_id, queue, task_type, payload, max_retries,
                        timeout_ms, attempt, state, enqueued_at, available_at,
                        lease_expires_at, last_error
                 FROM jobs WHERE id = ?1",
                params![job_id],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    /// List jobs, optionally filtered by queue and/or state, oldest first
    pub fn list_jobs(
        &self,
        queue: Option<&str>,
        state: Option<JobState>,
    ) -> Result<Vec<JobInstance>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, schedule_entry_id, queue, task_type, payload, max_retries,
                    timeout_ms, attempt, state, enqueued_at, available_at,
                    lease_expires_at, last_error
             FROM jobs
             WHERE (?1 IS NULL OR queue = ?1) AND (?2 IS NULL OR state = ?2)
             ORDER BY enqueued_at ASC, id ASC",
        )?;
        let jobs = stmt
            .query_map(params![queue, state.map(|s| s.to_string())], job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    /// Per-queue job counts
    pub fn stats(&self) -> Result<Vec<QueueStat>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT queue,
                    SUM(CASE WHEN state = 'pending' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN state = 'leased' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN state = 'failed' THEN 1 ELSE 0 END)
             FROM jobs GROUP BY queue ORDER BY queue",
        )?;
        let stats = stmt
            .query_map([], |r| {
                Ok(QueueStat {
                    queue: r.get(0)?,
                    pending: r.get::<_, i64>(1)? as u64,
                    leased: r.get::<_, i64>(2)? as u64,
                    failed: r.get::<_, i64>(3)? as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(stats)
    }
}

fn duration_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn parse_state(idx: usize, raw: String) -> rusqlite::Result<JobState> {
    raw.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<JobInstance> {
    let state = parse_state(8, row.get::<_, String>(8)?)?;
    Ok(JobInstance {
        id: row.get(0)?,
        schedule_entry_id: row.get(1)?,
        queue: row.get(2)?,
        task: TaskDefinition {
            task_type: row.get(3)?,
            payload: row.get(4)?,
        },
        policy: RetryPolicy {
            max_retries: row.get(5)?,
            timeout_ms: row.get::<_, i64>(6)? as u64,
        },
        attempt: row.get(7)?,
        state,
        enqueued_at: millis_to_datetime(row.get(9)?),
        available_at: millis_to_datetime(row.get(10)?),
        lease_expires_at: row.get::<_, Option<i64>>(11)?.map(millis_to_datetime),
        last_error: row.get(12)?,
    })
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<ScheduleEntry> {
    Ok(ScheduleEntry {
        id: row.get(0)?,
        cron_expr: row.get(1)?,
        queue: row.get(2)?,
        task: TaskDefinition {
            task_type: row.get(3)?,
            payload: row.get(4)?,
        },
        policy: RetryPolicy {
            max_retries: row.get(5)?,
            timeout_ms: row.get::<_, i64>(6)? as u64,
        },
        created_at: millis_to_datetime(row.get(7)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> JobStore {
        JobStore::in_memory().unwrap()
    }

    fn fast_backoff() -> BackoffPolicy {
        BackoffPolicy {
            base_ms: 50,
            cap_ms: 200,
        }
    }

    fn job(queue: &str, task_type: &str) -> JobInstance {
        JobInstance::new(
            queue,
            TaskDefinition::new(task_type, b"{}".to_vec()),
            RetryPolicy {
                max_retries: 2,
                timeout_ms: 1_000,
            },
        )
    }

    fn queues(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    const LEASE: Duration = Duration::from_secs(60);

    #[test]
    fn test_enqueue_and_lease_fifo() {
        let store = store();
        let first = job("default", "a");
        std::thread::sleep(Duration::from_millis(2));
        let second = job("default", "b");

        store.enqueue(&first).unwrap();
        store.enqueue(&second).unwrap();

        let leased = store.lease(&queues(&["default"]), LEASE).unwrap().unwrap();
        assert_eq!(leased.id, first.id);
        assert_eq!(leased.state, JobState::Leased);
        assert_eq!(leased.attempt, 1);
        assert!(leased.lease_expires_at.is_some());
    }

    #[test]
    fn test_leased_job_is_not_leasable_again() {
        let store = store();
        store.enqueue(&job("default", "a")).unwrap();

        let first = store.lease(&queues(&["default"]), LEASE).unwrap();
        assert!(first.is_some());

        let second = store.lease(&queues(&["default"]), LEASE).unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn test_lease_empty_queue_returns_none() {
        let store = store();
        assert!(store.lease(&queues(&["default"]), LEASE).unwrap().is_none());
        assert!(store.lease(&[], LEASE).unwrap().is_none());
    }

    #[test]
    fn test_lease_round_robin_across_queues() {
        let store = store();
        // Three jobs in "busy", one in "quiet" - the quiet queue must
        // still be served within the first two leases.
        for _ in 0..3 {
            store.enqueue(&job("busy", "a")).unwrap();
        }
        store.enqueue(&job("quiet", "b")).unwrap();

        let qs = queues(&["busy", "quiet"]);
        let first = store.lease(&qs, LEASE).unwrap().unwrap();
        let second = store.lease(&qs, LEASE).unwrap().unwrap();

        let mut served: Vec<String> = vec![first.queue, second.queue];
        served.sort();
        assert_eq!(served, vec!["busy".to_string(), "quiet".to_string()]);
    }

    #[test]
    fn test_acknowledge_removes_job() {
        let store = store();
        let j = job("default", "a");
        store.enqueue(&j).unwrap();
        let leased = store.lease(&queues(&["default"]), LEASE).unwrap().unwrap();

        store.acknowledge(&leased.id).unwrap();
        assert!(store.get_job(&j.id).unwrap().is_none());
    }

    #[test]
    fn test_acknowledge_twice_is_stable() {
        let store = store();
        store.enqueue(&job("default", "a")).unwrap();
        store.enqueue(&job("default", "b")).unwrap();
        let leased = store.lease(&queues(&["default"]), LEASE).unwrap().unwrap();

        store.acknowledge(&leased.id).unwrap();
        let err = store.acknowledge(&leased.id).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyAcknowledged { .. }));

        // The other job is unaffected.
        assert_eq!(store.list_jobs(None, None).unwrap().len(), 1);
    }

    #[test]
    fn test_acknowledge_pending_job_is_rejected() {
        let store = store();
        let j = job("default", "a");
        store.enqueue(&j).unwrap();

        let err = store.acknowledge(&j.id).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyAcknowledged { .. }));
        assert_eq!(store.list_jobs(None, None).unwrap().len(), 1);
    }

    #[test]
    fn test_fail_requeues_with_backoff() {
        let store = store().with_backoff(fast_backoff());
        store.enqueue(&job("default", "a")).unwrap();
        let leased = store.lease(&queues(&["default"]), LEASE).unwrap().unwrap();

        let before = Utc::now();
        let state = store.fail(&leased.id, "boom").unwrap();
        assert_eq!(state, JobState::Pending);

        let stored = store.get_job(&leased.id).unwrap().unwrap();
        assert_eq!(stored.state, JobState::Pending);
        assert_eq!(stored.attempt, 1);
        assert_eq!(stored.last_error.as_deref(), Some("boom"));
        // Backoff floor for attempt 1 is base * 2 = 100ms.
        assert!(stored.available_at >= before + chrono::Duration::milliseconds(100));

        // Not leasable before the backoff elapses...
        assert!(store.lease(&queues(&["default"]), LEASE).unwrap().is_none());

        // ...but leasable afterwards, with the next attempt number.
        std::thread::sleep(Duration::from_millis(250));
        let again = store.lease(&queues(&["default"]), LEASE).unwrap().unwrap();
        assert_eq!(again.attempt, 2);
    }

    #[test]
    fn test_fail_exhausts_retries_into_failed_state() {
        let store = store().with_backoff(BackoffPolicy {
            base_ms: 1,
            cap_ms: 1,
        });
        let j = JobInstance::new(
            "default",
            TaskDefinition::new("a", b"{}".to_vec()),
            RetryPolicy {
                max_retries: 1,
                timeout_ms: 1_000,
            },
        );
        store.enqueue(&j).unwrap();

        // Attempt 1 fails -> requeued.
        let leased = store.lease(&queues(&["default"]), LEASE).unwrap().unwrap();
        assert_eq!(store.fail(&leased.id, "first").unwrap(), JobState::Pending);

        // Attempt 2 (the last) fails -> terminal.
        std::thread::sleep(Duration::from_millis(10));
        let leased = store.lease(&queues(&["default"]), LEASE).unwrap().unwrap();
        assert_eq!(leased.attempt, 2);
        assert_eq!(store.fail(&leased.id, "second").unwrap(), JobState::Failed);

        // Retained for inspection, never silently discarded.
        let stored = store.get_job(&j.id).unwrap().unwrap();
        assert_eq!(stored.state, JobState::Failed);
        assert_eq!(stored.attempt, 2);
        assert_eq!(stored.last_error.as_deref(), Some("second"));
        assert!(store.lease(&queues(&["default"]), LEASE).unwrap().is_none());
    }

    #[test]
    fn test_fail_unknown_job() {
        let store = store();
        let err = store.fail("missing", "boom").unwrap_err();
        assert!(matches!(err, StoreError::JobNotFound { .. }));
    }

    #[test]
    fn test_fail_permanent_does_not_consume_attempt() {
        let store = store();
        let j = job("default", "unknown");
        store.enqueue(&j).unwrap();
        let leased = store.lease(&queues(&["default"]), LEASE).unwrap().unwrap();
        assert_eq!(leased.attempt, 1);

        store
            .fail_permanent(&leased.id, "no handler registered for task type \"unknown\"")
            .unwrap();

        let stored = store.get_job(&j.id).unwrap().unwrap();
        assert_eq!(stored.state, JobState::Failed);
        assert_eq!(stored.attempt, 0);
        assert!(stored.last_error.unwrap().contains("no handler"));
    }

    #[test]
    fn test_release_expired_reclaims_once() {
        let store = store();
        store.enqueue(&job("default", "a")).unwrap();
        store
            .lease(&queues(&["default"]), Duration::from_millis(10))
            .unwrap()
            .unwrap();

        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(store.release_expired().unwrap(), 1);
        // Idempotent: the second sweep finds nothing.
        assert_eq!(store.release_expired().unwrap(), 0);

        let jobs = store.list_jobs(None, Some(JobState::Pending)).unwrap();
        assert_eq!(jobs.len(), 1);
        // The crashed execution still counted as an attempt.
        assert_eq!(jobs[0].attempt, 1);
    }

    #[test]
    fn test_release_expired_ignores_live_leases() {
        let store = store();
        store.enqueue(&job("default", "a")).unwrap();
        store.lease(&queues(&["default"]), LEASE).unwrap().unwrap();

        assert_eq!(store.release_expired().unwrap(), 0);
    }

    #[test]
    fn test_release_expired_fails_job_with_no_budget_left() {
        let store = store();
        let j = JobInstance::new(
            "default",
            TaskDefinition::new("a", b"{}".to_vec()),
            RetryPolicy {
                max_retries: 0,
                timeout_ms: 1_000,
            },
        );
        store.enqueue(&j).unwrap();
        store
            .lease(&queues(&["default"]), Duration::from_millis(10))
            .unwrap()
            .unwrap();

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(store.release_expired().unwrap(), 1);

        let stored = store.get_job(&j.id).unwrap().unwrap();
        assert_eq!(stored.state, JobState::Failed);
        assert!(stored.last_error.unwrap().contains("lease expired"));
    }

    #[test]
    fn test_entry_round_trip_and_delete() {
        let store = store();
        let entry = ScheduleEntry::new(
            "*/5 * * * *",
            "default",
            TaskDefinition::new("email:welcome", br#"{"user_id":1}"#.to_vec()),
            RetryPolicy::default(),
        );
        store.put_entry(&entry).unwrap();

        let fetched = store.get_entry(&entry.id).unwrap().unwrap();
        assert_eq!(fetched.cron_expr, "*/5 * * * *");
        assert_eq!(fetched.task.task_type, "email:welcome");
        assert_eq!(fetched.task.payload, entry.task.payload);

        assert_eq!(store.list_entries().unwrap().len(), 1);

        store.delete_entry(&entry.id).unwrap();
        assert!(store.get_entry(&entry.id).unwrap().is_none());

        let err = store.delete_entry(&entry.id).unwrap_err();
        assert!(matches!(err, StoreError::EntryNotFound { .. }));
    }

    #[test]
    fn test_list_jobs_filters() {
        let store = store();
        store.enqueue(&job("alpha", "a")).unwrap();
        store.enqueue(&job("beta", "b")).unwrap();

        assert_eq!(store.list_jobs(Some("alpha"), None).unwrap().len(), 1);
        assert_eq!(store.list_jobs(None, Some(JobState::Pending)).unwrap().len(), 2);
        assert_eq!(store.list_jobs(None, Some(JobState::Failed)).unwrap().len(), 0);
    }

    #[test]
    fn test_stats_counts_by_state() {
        let store = store();
        store.enqueue(&job("default", "a")).unwrap();
        store.enqueue(&job("default", "b")).unwrap();
        store.lease(&queues(&["default"]), LEASE).unwrap().unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].queue, "default");
        assert_eq!(stats[0].pending, 1);
        assert_eq!(stats[0].leased, 1);
        assert_eq!(stats[0].failed, 0);
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();

        let entry = ScheduleEntry::new(
            "*/1 * * * *",
            "default",
            TaskDefinition::new("email:welcome", b"{}".to_vec()),
            RetryPolicy::default(),
        );
        let j = job("default", "a");
        {
            let store = JobStore::open(dir.path()).unwrap();
            store.put_entry(&entry).unwrap();
            store.enqueue(&j).unwrap();
        }

        let store = JobStore::open(dir.path()).unwrap();
        assert!(store.get_entry(&entry.id).unwrap().is_some());
        let reloaded = store.get_job(&j.id).unwrap().unwrap();
        assert_eq!(reloaded.queue, "default");
        assert_eq!(reloaded.state, JobState::Pending);
        assert_eq!(reloaded.policy.max_retries, 2);
    }
}
