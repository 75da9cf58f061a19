//! Hosts the worker pool and the scheduler: consume queue jobs to run
//! pg_dump pipelines, and fan cadence ticks out into new jobs.

use std::future::ready;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Error;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use envconfig::Envconfig;
use pgvault_common::metrics::{serve, setup_metrics_routes};
use pgvault_worker::config::Config;
use pgvault_worker::context::AppContext;
use pgvault_worker::scheduler;
use pgvault_worker::worker::WorkerPool;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pgvault-worker", about = "pgvault backup worker and scheduler")]
struct Cli {
    /// Size of the worker pool; overrides WORKER_COUNT.
    #[arg(long)]
    workers: Option<usize>,

    /// Verbose logging for local development.
    #[arg(long)]
    dev: bool,
}

fn setup_tracing(cli: &Cli, config: &Config) {
    let filter = if cli.dev {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

pub async fn index() -> &'static str {
    "pgvault worker"
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let cli = Cli::parse();
    let config = Config::init_from_env().expect("failed to load configuration from env");
    setup_tracing(&cli, &config);

    let worker_count = cli.workers.unwrap_or(config.worker_count).max(1);

    let ctx = Arc::new(AppContext::new(&config).await?);
    ctx.clone().spawn_shutdown_listener();

    // Liveness + metrics surface.
    let registry = ctx.health_registry.clone();
    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(registry.get_status())));
    let router = setup_metrics_routes(router);
    let bind = config.bind();
    tokio::task::spawn(async move {
        serve(router, &bind)
            .await
            .expect("failed to start serving metrics");
    });

    // The queue's loader and stats loops run only in this process.
    ctx.queue.start();

    let pool = WorkerPool::new(ctx.clone(), worker_count);
    pool.start().await;
    info!("started {} workers", worker_count);

    let scheduler_liveness = ctx
        .health_registry
        .register("scheduler", chrono::Duration::seconds(60));
    let scheduler_ctx = ctx.clone();
    tokio::spawn(async move {
        scheduler::run(scheduler_ctx, scheduler_liveness).await;
    });

    while ctx.is_running() {
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    // Drain: in-flight dumps may finish within the grace window; anything
    // slower is abandoned for the staleness reaper.
    info!("draining worker pool");
    pool.shutdown(Duration::from_secs(config.shutdown_grace_seconds))
        .await;
    info!("shutdown complete");

    Ok(())
}
