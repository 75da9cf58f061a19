//! The worker pool: N tasks consuming the queue, dispatching on job type,
//! and writing terminal state back to the job rows.

use std::sync::Arc;
use std::time::{Duration, Instant};

use pgvault_common::queue::Job;
use pgvault_common::types::{JobStatus, JobType};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use crate::backup::handle_backup;
use crate::cleanup::handle_cleanup;
use crate::context::AppContext;
use crate::error::WorkerError;
use crate::restore::handle_restore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Idle,
    Working,
    Stopped,
}

/// One worker's observable state. Writers hold the lock only for the flip;
/// concurrent readers always see a consistent (status, current job) pair.
pub struct Worker {
    pub id: usize,
    state: RwLock<(WorkerStatus, Option<Uuid>)>,
}

impl Worker {
    fn new(id: usize) -> Self {
        Self {
            id,
            state: RwLock::new((WorkerStatus::Idle, None)),
        }
    }

    async fn set_working(&self, job_id: Uuid) {
        *self.state.write().await = (WorkerStatus::Working, Some(job_id));
    }

    async fn set_idle(&self) {
        *self.state.write().await = (WorkerStatus::Idle, None);
    }

    async fn set_stopped(&self) {
        *self.state.write().await = (WorkerStatus::Stopped, None);
    }

    pub async fn snapshot(&self) -> (WorkerStatus, Option<Uuid>) {
        *self.state.read().await
    }
}

/// Spawns and drains the pool of identical workers.
pub struct WorkerPool {
    ctx: Arc<AppContext>,
    workers: Vec<Arc<Worker>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(ctx: Arc<AppContext>, count: usize) -> Self {
        let workers = (0..count).map(|id| Arc::new(Worker::new(id))).collect();
        Self {
            ctx,
            workers,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub async fn start(&self) {
        let mut handles = self.handles.lock().await;
        for worker in &self.workers {
            let worker = worker.clone();
            let ctx = self.ctx.clone();
            let liveness = self
                .ctx
                .health_registry
                .register(&format!("worker-{}", worker.id), chrono::Duration::seconds(60));

            handles.push(tokio::spawn(async move {
                info!("worker {} started", worker.id);
                while ctx.is_running() {
                    liveness.report_healthy();

                    let Some(running) = ctx.queue.next_job().await else {
                        continue;
                    };

                    worker.set_working(running.job.id).await;
                    process_job(&ctx, &running.job).await;
                    worker.set_idle().await;
                }
                worker.set_stopped().await;
                info!("worker {} stopped", worker.id);
            }));
        }
    }

    /// Drain in-flight jobs, waiting up to `grace`. Jobs still running past
    /// the deadline are abandoned mid-flight; their rows stay `running` for
    /// the staleness reaper in another process.
    pub async fn shutdown(&self, grace: Duration) {
        let deadline = Instant::now() + grace;
        let mut handles = self.handles.lock().await;

        for handle in handles.drain(..) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, handle).await.is_err() {
                error!("worker did not drain within the grace period, abandoning its job");
            }
        }
    }

    pub async fn snapshot(&self) -> Vec<(usize, WorkerStatus, Option<Uuid>)> {
        let mut out = Vec::with_capacity(self.workers.len());
        for worker in &self.workers {
            let (status, job) = worker.snapshot().await;
            out.push((worker.id, status, job));
        }
        out
    }
}

/// Dispatch one claimed job and write its terminal state. At-most-once with
/// best-effort retry: a retryable failure with attempts remaining goes back
/// through the loader as `retrying`.
pub async fn process_job(ctx: &AppContext, job: &Job) {
    debug_assert_eq!(job.status, JobStatus::Running);
    let labels = [("type", job.job_type.as_str())];
    metrics::counter!("pgvault_jobs_processed_total", &labels).increment(1);
    let started = Instant::now();

    let result = match job.job_type {
        JobType::Backup => handle_backup(ctx, job).await,
        JobType::Restore => handle_restore(ctx, job).await,
        JobType::Cleanup => handle_cleanup(ctx, job).await,
    };

    metrics::histogram!("pgvault_job_duration_seconds", &labels)
        .record(started.elapsed().as_secs_f64());

    match result {
        Ok(()) => {
            if let Err(e) = ctx.queue.complete_job(job.id).await {
                error!("failed to mark job {} completed: {}", job.id, e);
            }
        }
        Err(WorkerError::Database(e)) => {
            // The control database is unreachable: leave the row as-is and
            // let the staleness reaper hand it to a healthier process.
            error!("job {} aborted on database error: {}", job.id, e);
        }
        Err(e) => {
            let message = e.to_string();
            let outcome = if e.is_retryable() && job.has_retries_remaining() {
                ctx.queue.retry_job(job, &message).await
            } else {
                ctx.queue.fail_job(job.id, &message).await
            };
            if let Err(write_error) = outcome {
                error!(
                    "failed to record failure of job {}: {}",
                    job.id, write_error
                );
            }
        }
    }
}
