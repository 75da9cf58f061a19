//! # Job queue
//!
//! A durable, priority-ordered work queue backed by the `jobs` table.
//! Producers persist a pending row first and only then attempt a
//! non-blocking hand-off into a bounded in-memory channel; the channel is a
//! latency optimisation, never the queue of record. Across processes the
//! claim transition — a conditional UPDATE whose affected-row count is the
//! claim decision — is the only serialisation point.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::{DatabaseError, ParseError};
use crate::retry::RetryPolicy;
use crate::types::{Cadence, JobStatus, JobType};

/// Capacity of the local in-memory buffer between the loader and workers.
pub const LOCAL_BUFFER_CAPACITY: usize = 1000;

/// How many eligible rows one loader pass claims at most.
const LOADER_BATCH_SIZE: i64 = 10;

/// Period of the loader and stats background loops.
const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Jobs created by a scheduler tick.
pub const SCHEDULED_BACKUP_PRIORITY: i32 = 7;
/// Jobs created from the admin surface.
pub const MANUAL_BACKUP_PRIORITY: i32 = 5;
pub const RESTORE_PRIORITY: i32 = 5;
/// Retention trims run after everything else.
pub const CLEANUP_PRIORITY: i32 = 1;

/// Enumeration of errors for operations with the queue.
#[derive(Error, Debug)]
pub enum QueueError {
    /// The local buffer is saturated. The job row is already persisted and
    /// will be picked up by the polling loader.
    #[error("local queue buffer is full")]
    QueueFull,
    #[error("queue is shutting down")]
    ShuttingDown,
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// A row of the `jobs` table.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Job {
    pub id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    pub priority: i32,
    pub payload: serde_json::Value,
    pub retry_count: i32,
    pub max_retries: i32,
    pub error_message: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Deserialize the payload for this job's type.
    pub fn parse_payload<P: DeserializeOwned>(&self) -> Result<P, ParseError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|error| ParseError::InvalidPayload { error })
    }

    /// Whether another attempt is permitted after the current one failed.
    pub fn has_retries_remaining(&self) -> bool {
        self.retry_count + 1 < self.max_retries
    }
}

/// A job to be inserted into the queue.
pub struct NewJob {
    pub job_type: JobType,
    pub priority: i32,
    pub payload: serde_json::Value,
    /// Defaults per job type when unset.
    pub max_retries: Option<i32>,
}

impl NewJob {
    pub fn new(job_type: JobType, priority: i32, payload: serde_json::Value) -> Self {
        Self {
            job_type,
            priority,
            payload,
            max_retries: None,
        }
    }
}

/// Payload of a backup job. When `backup_id` is present the worker reuses
/// that row instead of creating a new one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupPayload {
    pub instance_id: String,
    pub database: String,
    pub cadence: Cadence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<Uuid>,
}

/// Payload of a restore job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestorePayload {
    pub backup_id: Uuid,
    pub instance_id: String,
    pub database: String,
}

/// Payload of a cleanup job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupPayload {
    pub instance_id: String,
    pub cadence: Cadence,
}

/// Snapshot of queue totals. `local_buffered` and `active_workers` reflect
/// this process; the row counts reflect the whole cluster.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub total_jobs: i64,
    pub pending_jobs: i64,
    pub running_jobs: i64,
    pub completed_jobs: i64,
    pub failed_jobs: i64,
    pub retrying_jobs: i64,
    pub local_buffered: usize,
    pub active_workers: usize,
}

/// What travels through the local channel. `claimed` is false for the direct
/// producer hand-off; the receiving worker then performs the claim itself,
/// and drops the message if some other consumer won the row meanwhile.
#[derive(Debug)]
struct QueuedJob {
    job: Job,
    claimed: bool,
}

/// Decrements the active-job count when a worker finishes (or panics).
pub struct ActiveGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A claimed job handed to a worker. Exactly one `RunningJob` exists per
/// `running` row in this process.
pub struct RunningJob {
    pub job: Job,
    _active: ActiveGuard,
}

/// A queue implemented on top of the `jobs` table.
#[derive(Clone)]
pub struct PgQueue {
    pool: PgPool,
    capacity: usize,
    tx: mpsc::Sender<QueuedJob>,
    rx: Arc<Mutex<mpsc::Receiver<QueuedJob>>>,
    running: Arc<AtomicBool>,
    shutting_down: Arc<AtomicBool>,
    /// Producer-only handles (the API process) skip the local hand-off:
    /// with no consumers in-process the buffer would only fill and stick.
    producer_only: bool,
    active_jobs: Arc<AtomicUsize>,
    stats: Arc<RwLock<QueueStats>>,
    retry_policy: RetryPolicy,
}

pub type QueueResult<T> = std::result::Result<T, QueueError>;

impl PgQueue {
    /// Initialize a new queue connected to the control database at `url`.
    pub async fn new(url: &str, max_connections: u32) -> QueueResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|error| DatabaseError::PoolCreation { error })?;

        Ok(Self::new_from_pool(pool))
    }

    pub fn new_from_pool(pool: PgPool) -> Self {
        Self::with_capacity(pool, LOCAL_BUFFER_CAPACITY)
    }

    /// A handle that only inserts rows, for processes that run no workers.
    /// The polling loader of a worker process picks the rows up.
    pub fn new_producer(pool: PgPool) -> Self {
        let mut queue = Self::with_capacity(pool, 1);
        queue.producer_only = true;
        queue
    }

    pub fn with_capacity(pool: PgPool, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);

        Self {
            pool,
            capacity,
            tx,
            rx: Arc::new(Mutex::new(rx)),
            running: Arc::new(AtomicBool::new(false)),
            shutting_down: Arc::new(AtomicBool::new(false)),
            producer_only: false,
            active_jobs: Arc::new(AtomicUsize::new(0)),
            stats: Arc::new(RwLock::new(QueueStats::default())),
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Spawn the loader and stats loops. Consumers call this once per worker
    /// process; producer-only processes never do.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let loader = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(POLL_INTERVAL);
            loop {
                interval.tick().await;
                if !loader.is_running() {
                    break;
                }
                loader.run_loader_once().await;
            }
        });

        let stats = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(POLL_INTERVAL);
            loop {
                interval.tick().await;
                if !stats.is_running() {
                    break;
                }
                if let Err(e) = stats.refresh_stats().await {
                    warn!("failed to refresh queue stats: {}", e);
                }
            }
        });
    }

    /// Stop the background loops and refuse further producers. Jobs already
    /// claimed keep running; their workers drain separately.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Insert a job and attempt the local hand-off. The insert always comes
    /// first: losing the in-memory slot must never lose the job.
    pub async fn add_job(&self, new_job: NewJob) -> QueueResult<Job> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(QueueError::ShuttingDown);
        }

        let max_retries = new_job
            .max_retries
            .unwrap_or_else(|| new_job.job_type.default_max_retries());

        let job = sqlx::query_as::<_, Job>(
            r#"
INSERT INTO jobs (id, job_type, status, priority, payload, max_retries, scheduled_at, created_at)
VALUES ($1, $2, 'pending', $3, $4, $5, NOW(), NOW())
RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(new_job.job_type)
        .bind(new_job.priority)
        .bind(&new_job.payload)
        .bind(max_retries)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| DatabaseError::query("INSERT", error))?;

        metrics::counter!(
            "pgvault_jobs_enqueued_total",
            &[("type", new_job.job_type.as_str())]
        )
        .increment(1);

        if self.producer_only {
            return Ok(job);
        }

        match self.tx.try_send(QueuedJob {
            job: job.clone(),
            claimed: false,
        }) {
            Ok(()) => Ok(job),
            Err(TrySendError::Full(_)) => Err(QueueError::QueueFull),
            Err(TrySendError::Closed(_)) => Err(QueueError::ShuttingDown),
        }
    }

    pub async fn add_backup_job(
        &self,
        instance_id: &str,
        database: &str,
        cadence: Cadence,
        backup_id: Option<Uuid>,
        priority: i32,
    ) -> QueueResult<Job> {
        let payload = BackupPayload {
            instance_id: instance_id.to_owned(),
            database: database.to_owned(),
            cadence,
            backup_id,
        };
        self.add_job(NewJob::new(
            JobType::Backup,
            priority,
            serde_json::to_value(payload)
                .map_err(|error| ParseError::InvalidPayload { error })?,
        ))
        .await
    }

    pub async fn add_restore_job(
        &self,
        backup_id: Uuid,
        instance_id: &str,
        database: &str,
    ) -> QueueResult<Job> {
        let payload = RestorePayload {
            backup_id,
            instance_id: instance_id.to_owned(),
            database: database.to_owned(),
        };
        self.add_job(NewJob::new(
            JobType::Restore,
            RESTORE_PRIORITY,
            serde_json::to_value(payload)
                .map_err(|error| ParseError::InvalidPayload { error })?,
        ))
        .await
    }

    pub async fn add_cleanup_job(
        &self,
        instance_id: &str,
        cadence: Cadence,
    ) -> QueueResult<Job> {
        let payload = CleanupPayload {
            instance_id: instance_id.to_owned(),
            cadence,
        };
        self.add_job(NewJob::new(
            JobType::Cleanup,
            CLEANUP_PRIORITY,
            serde_json::to_value(payload)
                .map_err(|error| ParseError::InvalidPayload { error })?,
        ))
        .await
    }

    /// Wait up to a short poll interval for the next claimed job. Returns
    /// None on timeout or shutdown so callers can interleave liveness
    /// reporting between waits.
    pub async fn next_job(&self) -> Option<RunningJob> {
        let received = {
            let mut rx = self.rx.lock().await;
            tokio::time::timeout(Duration::from_millis(250), rx.recv()).await
        };

        let queued = match received {
            Ok(Some(queued)) => queued,
            // Channel closed or nothing buffered this interval.
            Ok(None) | Err(_) => return None,
        };

        let mut job = queued.job;
        if !queued.claimed {
            // Producer hand-off: the row is still pending in the database,
            // so the claim happens here. Losing the race to the loader (or
            // another process) just drops the message.
            match claim(&self.pool, &job).await {
                Ok(true) => {
                    job.status = JobStatus::Running;
                    job.started_at = Some(Utc::now());
                }
                Ok(false) => return None,
                Err(e) => {
                    error!("failed to claim handed-off job {}: {}", job.id, e);
                    return None;
                }
            }
        }

        self.active_jobs.fetch_add(1, Ordering::SeqCst);
        Some(RunningJob {
            job,
            _active: ActiveGuard {
                counter: self.active_jobs.clone(),
            },
        })
    }

    /// Terminal success for a job.
    pub async fn complete_job(&self, id: Uuid) -> QueueResult<()> {
        sqlx::query(
            r#"
UPDATE jobs
SET status = 'completed', completed_at = NOW(), error_message = NULL
WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|error| DatabaseError::query("UPDATE", error))?;

        metrics::counter!("pgvault_jobs_completed_total").increment(1);
        Ok(())
    }

    /// Terminal failure for a job with no attempts remaining.
    pub async fn fail_job(&self, id: Uuid, message: &str) -> QueueResult<()> {
        sqlx::query(
            r#"
UPDATE jobs
SET status = 'failed', completed_at = NOW(), error_message = $2
WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(message)
        .execute(&self.pool)
        .await
        .map_err(|error| DatabaseError::query("UPDATE", error))?;

        metrics::counter!("pgvault_jobs_failed_total").increment(1);
        Ok(())
    }

    /// Send a failed job with attempts remaining back through the loader,
    /// eligible again once its backoff deadline passes.
    pub async fn retry_job(&self, job: &Job, message: &str) -> QueueResult<()> {
        let backoff = self
            .retry_policy
            .time_until_next_retry(job.retry_count as u32);
        let scheduled_at =
            Utc::now() + chrono::Duration::from_std(backoff).unwrap_or(chrono::Duration::zero());

        sqlx::query(
            r#"
UPDATE jobs
SET status = 'retrying',
    retry_count = retry_count + 1,
    error_message = $2,
    scheduled_at = $3,
    started_at = NULL
WHERE id = $1
            "#,
        )
        .bind(job.id)
        .bind(message)
        .bind(scheduled_at)
        .execute(&self.pool)
        .await
        .map_err(|error| DatabaseError::query("UPDATE", error))?;

        metrics::counter!("pgvault_jobs_retried_total").increment(1);
        Ok(())
    }

    /// Snapshot of totals plus the live local buffer and worker counts.
    pub async fn stats(&self) -> QueueStats {
        let mut stats = self.stats.read().await.clone();
        stats.local_buffered = self.capacity - self.tx.capacity();
        stats.active_workers = self.active_jobs.load(Ordering::SeqCst);
        stats
    }

    /// One loader pass: claim up to a batch of eligible rows and buffer
    /// them locally, rolling a claim back when the buffer is full so that
    /// another process can take the row instead.
    pub async fn run_loader_once(&self) {
        let jobs = match load_eligible(&self.pool, LOADER_BATCH_SIZE).await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!("queue loader could not query the database: {}", e);
                return;
            }
        };

        for job in jobs {
            let claimed = match claim(&self.pool, &job).await {
                Ok(claimed) => claimed,
                Err(e) => {
                    error!("failed to claim job {}: {}", job.id, e);
                    continue;
                }
            };
            if !claimed {
                continue;
            }

            let mut job = job;
            job.status = JobStatus::Running;
            job.started_at = Some(Utc::now());
            let id = job.id;

            if self
                .tx
                .try_send(QueuedJob { job, claimed: true })
                .is_err()
            {
                // Local buffer saturated (or closed): undo the claim so the
                // row stays visible to every process.
                if let Err(e) = release(&self.pool, id).await {
                    error!("failed to release claimed job {}: {}", id, e);
                }
                break;
            }
        }
    }

    async fn refresh_stats(&self) -> Result<(), DatabaseError> {
        #[derive(sqlx::FromRow)]
        struct StatsRow {
            total: i64,
            pending: i64,
            running: i64,
            completed: i64,
            failed: i64,
            retrying: i64,
        }

        let row = sqlx::query_as::<_, StatsRow>(
            r#"
SELECT
    COUNT(*) AS total,
    COUNT(*) FILTER (WHERE status = 'pending') AS pending,
    COUNT(*) FILTER (WHERE status = 'running') AS running,
    COUNT(*) FILTER (WHERE status = 'completed') AS completed,
    COUNT(*) FILTER (WHERE status = 'failed') AS failed,
    COUNT(*) FILTER (WHERE status = 'retrying') AS retrying
FROM jobs
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|error| DatabaseError::query("SELECT", error))?;

        let mut stats = self.stats.write().await;
        stats.total_jobs = row.total;
        stats.pending_jobs = row.pending;
        stats.running_jobs = row.running;
        stats.completed_jobs = row.completed;
        stats.failed_jobs = row.failed;
        stats.retrying_jobs = row.retrying;

        metrics::gauge!("pgvault_queue_pending_jobs").set(row.pending as f64);
        metrics::gauge!("pgvault_queue_running_jobs").set(row.running as f64);

        Ok(())
    }
}

/// Rows a loader pass may try to claim: pending or retrying past their
/// backoff deadline, plus running rows whose worker has gone silent for
/// five minutes (the staleness reaper).
async fn load_eligible(pool: &PgPool, limit: i64) -> Result<Vec<Job>, DatabaseError> {
    sqlx::query_as::<_, Job>(
        r#"
SELECT * FROM jobs
WHERE (status IN ('pending', 'retrying') AND scheduled_at <= NOW())
   OR (status = 'running' AND started_at < NOW() - INTERVAL '5 minutes')
ORDER BY priority DESC, created_at ASC
LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(|error| DatabaseError::query("SELECT", error))
}

/// The claim transition. The conditional UPDATE's affected-row count is the
/// at-most-once decision across every process sharing the table.
async fn claim(pool: &PgPool, job: &Job) -> Result<bool, DatabaseError> {
    let query = match job.status {
        JobStatus::Running => {
            // Reclaiming from a dead worker: the staleness window re-checked
            // in the UPDATE guards against racing a live one.
            r#"
UPDATE jobs
SET status = 'running', started_at = NOW()
WHERE id = $1 AND status = 'running' AND started_at < NOW() - INTERVAL '5 minutes'
            "#
        }
        JobStatus::Pending => {
            "UPDATE jobs SET status = 'running', started_at = NOW() WHERE id = $1 AND status = 'pending'"
        }
        JobStatus::Retrying => {
            "UPDATE jobs SET status = 'running', started_at = NOW() WHERE id = $1 AND status = 'retrying'"
        }
        JobStatus::Completed | JobStatus::Failed => return Ok(false),
    };

    let result = sqlx::query(query)
        .bind(job.id)
        .execute(pool)
        .await
        .map_err(|error| DatabaseError::query("UPDATE", error))?;

    Ok(result.rows_affected() == 1)
}

/// Roll a claimed-but-unbuffered row back so any process can pick it up.
async fn release(pool: &PgPool, id: Uuid) -> Result<(), DatabaseError> {
    sqlx::query(
        "UPDATE jobs SET status = 'pending', started_at = NULL WHERE id = $1 AND status = 'running'",
    )
    .bind(id)
    .execute(pool)
    .await
    .map_err(|error| DatabaseError::query("UPDATE", error))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn get_job(pool: &PgPool, id: Uuid) -> Job {
        sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_one(pool)
            .await
            .expect("job missing")
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn add_job_persists_and_hands_off(db: PgPool) {
        let queue = PgQueue::new_from_pool(db.clone());

        let job = queue
            .add_backup_job("pg1", "app", Cadence::Manual, None, MANUAL_BACKUP_PRIORITY)
            .await
            .expect("failed to add job");

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.max_retries, 3);

        let running = queue.next_job().await.expect("no job handed off");
        assert_eq!(running.job.id, job.id);

        // The hand-off claimed the row.
        let row = get_job(&db, job.id).await;
        assert_eq!(row.status, JobStatus::Running);
        assert!(row.started_at.is_some());

        let payload: BackupPayload = running.job.parse_payload().unwrap();
        assert_eq!(payload.instance_id, "pg1");
        assert_eq!(payload.database, "app");
        assert_eq!(payload.cadence, Cadence::Manual);
        assert!(payload.backup_id.is_none());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn restore_jobs_default_to_a_single_attempt(db: PgPool) {
        let queue = PgQueue::new_from_pool(db.clone());
        let backup_id = Uuid::now_v7();

        let job = queue
            .add_restore_job(backup_id, "pg1", "app_restored")
            .await
            .unwrap();

        assert_eq!(job.job_type, JobType::Restore);
        assert_eq!(job.max_retries, 1);

        let payload: RestorePayload = job.parse_payload().unwrap();
        assert_eq!(payload.backup_id, backup_id);
        assert_eq!(payload.database, "app_restored");
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn queue_full_persists_the_row_anyway(db: PgPool) {
        let queue = PgQueue::with_capacity(db.clone(), 1);

        queue
            .add_cleanup_job("pg1", Cadence::Hourly)
            .await
            .expect("first job should fit the buffer");

        let err = queue
            .add_cleanup_job("pg1", Cadence::Daily)
            .await
            .expect_err("buffer should be saturated");
        assert!(matches!(err, QueueError::QueueFull));

        // Both rows must exist regardless of the hand-off outcome.
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn loader_rolls_back_claims_when_the_buffer_is_full(db: PgPool) {
        let queue = PgQueue::with_capacity(db.clone(), 1);

        let first = queue.add_cleanup_job("pg1", Cadence::Hourly).await.unwrap();
        let second = queue
            .add_cleanup_job("pg1", Cadence::Daily)
            .await
            .expect_err("buffer should be saturated");
        assert!(matches!(second, QueueError::QueueFull));

        // Buffer still holds the first job, so the loader can claim the
        // second row but must roll it back.
        queue.run_loader_once().await;

        let rows = sqlx::query_as::<_, Job>("SELECT * FROM jobs ORDER BY created_at ASC")
            .fetch_all(&db)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows
            .iter()
            .filter(|j| j.id != first.id)
            .all(|j| j.status == JobStatus::Pending && j.started_at.is_none()));

        // Drain the buffer; the next pass buffers the remaining row.
        let running = queue.next_job().await.unwrap();
        assert_eq!(running.job.id, first.id);
        drop(running);

        queue.run_loader_once().await;
        let reloaded = queue.next_job().await.unwrap();
        assert_eq!(reloaded.job.status, JobStatus::Running);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn claims_are_exclusive_across_queue_instances(db: PgPool) {
        let producer = PgQueue::with_capacity(db.clone(), 100);

        let mut jobs = Vec::new();
        for _ in 0..8 {
            jobs.push(producer.add_cleanup_job("pg1", Cadence::Hourly).await.unwrap());
        }

        // Two competing claimants per job; exactly one side must win each.
        let mut successes = 0;
        for job in &jobs {
            let (a, b) = tokio::join!(claim(&db, job), claim(&db, job));
            let a = a.unwrap();
            let b = b.unwrap();
            assert!(!(a && b), "both claimants won job {}", job.id);
            if a || b {
                successes += 1;
            }
        }
        assert_eq!(successes, jobs.len());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn loader_orders_by_priority_then_age(db: PgPool) {
        let queue = PgQueue::with_capacity(db.clone(), 100);

        let low = queue.add_cleanup_job("pg1", Cadence::Hourly).await.unwrap();
        let high = queue
            .add_backup_job("pg1", "app", Cadence::Hourly, None, SCHEDULED_BACKUP_PRIORITY)
            .await
            .unwrap();

        let eligible = load_eligible(&db, 10).await.unwrap();
        assert_eq!(eligible[0].id, high.id);
        assert_eq!(eligible[1].id, low.id);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn stale_running_jobs_are_reclaimed_after_five_minutes(db: PgPool) {
        let queue = PgQueue::with_capacity(db.clone(), 100);
        let job = queue
            .add_backup_job("pg1", "app", Cadence::Hourly, None, SCHEDULED_BACKUP_PRIORITY)
            .await
            .unwrap();

        // A worker claimed the job 4m59s ago: not yet stale.
        sqlx::query(
            "UPDATE jobs SET status = 'running', started_at = NOW() - INTERVAL '299 seconds' WHERE id = $1",
        )
        .bind(job.id)
        .execute(&db)
        .await
        .unwrap();
        assert!(load_eligible(&db, 10).await.unwrap().is_empty());

        // Two seconds past the window: eligible and claimable.
        sqlx::query(
            "UPDATE jobs SET started_at = NOW() - INTERVAL '301 seconds' WHERE id = $1",
        )
        .bind(job.id)
        .execute(&db)
        .await
        .unwrap();

        let eligible = load_eligible(&db, 10).await.unwrap();
        assert_eq!(eligible.len(), 1);
        assert!(claim(&db, &eligible[0]).await.unwrap());

        // The fresh claim reset started_at, so a second reclaim loses.
        let reclaimed = get_job(&db, job.id).await;
        assert!(!claim(&db, &reclaimed).await.unwrap());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn retrying_jobs_wait_out_their_backoff(db: PgPool) {
        let queue = PgQueue::with_capacity(db.clone(), 100);
        let job = queue
            .add_backup_job("pg1", "app", Cadence::Hourly, None, SCHEDULED_BACKUP_PRIORITY)
            .await
            .unwrap();

        queue.retry_job(&job, "pg_dump failed: exit status 1").await.unwrap();

        let row = get_job(&db, job.id).await;
        assert_eq!(row.status, JobStatus::Retrying);
        assert_eq!(row.retry_count, 1);
        assert!(row.scheduled_at > Utc::now());
        assert_eq!(
            row.error_message.as_deref(),
            Some("pg_dump failed: exit status 1")
        );

        // Invisible until the backoff deadline passes.
        assert!(load_eligible(&db, 10).await.unwrap().is_empty());

        sqlx::query("UPDATE jobs SET scheduled_at = NOW() WHERE id = $1")
            .bind(job.id)
            .execute(&db)
            .await
            .unwrap();
        let eligible = load_eligible(&db, 10).await.unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].status, JobStatus::Retrying);
        assert!(claim(&db, &eligible[0]).await.unwrap());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn terminal_transitions_set_completed_at(db: PgPool) {
        let queue = PgQueue::with_capacity(db.clone(), 100);

        let done = queue.add_cleanup_job("pg1", Cadence::Hourly).await.unwrap();
        queue.complete_job(done.id).await.unwrap();
        let row = get_job(&db, done.id).await;
        assert_eq!(row.status, JobStatus::Completed);
        assert!(row.completed_at.is_some());
        assert!(row.error_message.is_none());

        let lost = queue.add_cleanup_job("pg1", Cadence::Daily).await.unwrap();
        queue.fail_job(lost.id, "gave up").await.unwrap();
        let row = get_job(&db, lost.id).await;
        assert_eq!(row.status, JobStatus::Failed);
        assert!(row.completed_at.is_some());
        assert_eq!(row.error_message.as_deref(), Some("gave up"));
        assert!(row.retry_count <= row.max_retries);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn stopped_queue_refuses_producers(db: PgPool) {
        let queue = PgQueue::new_from_pool(db.clone());
        queue.start();
        assert!(queue.is_running());

        queue.stop();
        assert!(!queue.is_running());

        let err = queue
            .add_cleanup_job("pg1", Cadence::Hourly)
            .await
            .expect_err("stopped queue must refuse work");
        assert!(matches!(err, QueueError::ShuttingDown));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn producer_handles_never_report_a_full_buffer(db: PgPool) {
        let queue = PgQueue::new_producer(db.clone());

        // Far more jobs than the (unused) local buffer could hold.
        for _ in 0..5 {
            queue.add_cleanup_job("pg1", Cadence::Hourly).await.unwrap();
        }

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(count, 5);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn stats_reflect_row_counts(db: PgPool) {
        let queue = PgQueue::with_capacity(db.clone(), 100);

        let a = queue.add_cleanup_job("pg1", Cadence::Hourly).await.unwrap();
        queue.add_cleanup_job("pg1", Cadence::Daily).await.unwrap();
        queue.complete_job(a.id).await.unwrap();

        queue.refresh_stats().await.unwrap();
        let stats = queue.stats().await;
        assert_eq!(stats.total_jobs, 2);
        assert_eq!(stats.pending_jobs, 1);
        assert_eq!(stats.completed_jobs, 1);
        assert_eq!(stats.active_workers, 0);
        assert_eq!(stats.local_buffered, 2);
    }
}
