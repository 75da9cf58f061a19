//! The pgvault admin API: registers instances, accepts manual backup and
//! restore requests, and serves status polls. All work executes in the
//! worker process; this binary only writes rows and enqueues jobs.

use std::sync::Arc;

use axum::Router;
use clap::Parser;
use config::Config;
use envconfig::Envconfig;
use eyre::{eyre, Result};
use pgvault_common::metrics::setup_metrics_routes;
use pgvault_common::queue::PgQueue;
use tracing::info;
use tracing_subscriber::EnvFilter;

use handlers::AppState;

mod config;
mod handlers;

#[derive(Parser)]
#[command(name = "pgvault-api", about = "pgvault admin API")]
struct Cli {
    /// Listen port; overrides BIND_PORT.
    #[arg(long)]
    port: Option<u16>,

    /// Verbose logging for local development.
    #[arg(long)]
    dev: bool,

    /// Apply pending control-database migrations before serving.
    #[arg(long)]
    migrate: bool,
}

fn setup_tracing(cli: &Cli, config: &Config) {
    let filter = if cli.dev {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn listen(app: Router, bind: String) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("shutdown signal received");
        })
        .await?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::init_from_env().expect("failed to load configuration from env");
    if let Some(port) = cli.port {
        config.port = port;
    }
    setup_tracing(&cli, &config);

    if config.api_key.is_empty() {
        return Err(eyre!("API_KEY must be set"));
    }

    let db = config
        .database
        .connect()
        .await
        .map_err(|e| eyre!("failed to connect to control database: {}", e))?;

    if cli.migrate {
        info!("applying control-database migrations");
        sqlx::migrate!("../pgvault-common/migrations")
            .run(&db)
            .await?;
    }

    let state = AppState {
        queue: PgQueue::new_producer(db.clone()),
        db,
        api_key: Arc::new(config.api_key.clone()),
    };

    let app = handlers::add_routes(Router::new(), state, config.max_body_size);
    let app = setup_metrics_routes(app);

    info!("pgvault api listening on {}", config.bind());
    listen(app, config.bind()).await
}
