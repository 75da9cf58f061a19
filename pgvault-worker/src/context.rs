use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Error;
use pgvault_common::health::HealthRegistry;
use pgvault_common::models::LogWriter;
use pgvault_common::queue::PgQueue;
use pgvault_common::store::{ObjectStore, S3Store};
use sqlx::PgPool;
use tracing::info;

use crate::config::Config;
use crate::tools;

/// Everything the worker loops share: the control database, the queue, the
/// object store, and the shutdown flag that coordinates them.
pub struct AppContext {
    pub config: Config,
    pub db: PgPool,
    pub queue: PgQueue,
    pub store: Arc<dyn ObjectStore>,
    pub health_registry: HealthRegistry,
    pub logs: LogWriter,
    pub temp_dir: PathBuf,
    /// Captured once at startup; logged again at the start of every dump.
    pub dump_tool_version: Option<String>,
    running: AtomicBool,
}

impl AppContext {
    pub async fn new(config: &Config) -> Result<Self, Error> {
        let db = config.database.connect().await?;
        let queue = PgQueue::new_from_pool(db.clone());

        // Store misconfiguration is fatal before any job can be claimed.
        let store = Arc::new(S3Store::new(&config.store).await?);

        let dump_tool_version = tools::pg_dump_version().await;
        match &dump_tool_version {
            Some(version) => info!("using {}", version),
            None => info!("pg_dump not found on PATH; backup jobs will fail until it is installed"),
        }

        Ok(Self {
            config: config.clone(),
            db: db.clone(),
            queue,
            store,
            health_registry: HealthRegistry::new("liveness"),
            logs: LogWriter::new(db, "worker"),
            temp_dir: PathBuf::from(&config.temp_dir),
            dump_tool_version,
            running: AtomicBool::new(true),
        })
    }

    #[cfg(test)]
    pub(crate) fn for_tests(config: Config, db: PgPool, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            temp_dir: PathBuf::from(&config.temp_dir),
            config,
            db: db.clone(),
            queue: PgQueue::with_capacity(db.clone(), 100),
            store,
            health_registry: HealthRegistry::new("liveness"),
            logs: LogWriter::new(db, "worker"),
            dump_tool_version: None,
            running: AtomicBool::new(true),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.queue.stop();
    }

    /// Flip the running flag on SIGTERM / ctrl-c; the main loop and the
    /// worker pool observe it and drain.
    pub fn spawn_shutdown_listener(self: Arc<Self>) {
        tokio::spawn(async move {
            let ctrl_c = tokio::signal::ctrl_c();

            #[cfg(unix)]
            {
                let mut sigterm = tokio::signal::unix::signal(
                    tokio::signal::unix::SignalKind::terminate(),
                )
                .expect("failed to register SIGTERM handler");

                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }

            #[cfg(not(unix))]
            {
                ctrl_c.await.ok();
            }

            info!("shutdown signal received, draining");
            self.shutdown();
        });
    }
}
