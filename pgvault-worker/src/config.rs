use envconfig::Envconfig;
use pgvault_common::config::{DatabaseConfig, RetentionConfig, StoreConfig};

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    /// Liveness and metrics only; the worker has no admin surface.
    #[envconfig(from = "BIND_PORT", default = "3302")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub database: DatabaseConfig,

    #[envconfig(nested = true)]
    pub store: StoreConfig,

    #[envconfig(nested = true)]
    pub retention: RetentionConfig,

    #[envconfig(from = "WORKER_COUNT", default = "4")]
    pub worker_count: usize,

    #[envconfig(from = "BACKUP_TEMP_DIR", default = "/tmp/postgres-backups")]
    pub temp_dir: String,

    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: String,

    /// How long in-flight jobs may keep running after a shutdown signal.
    #[envconfig(from = "SHUTDOWN_GRACE_SECONDS", default = "30")]
    pub shutdown_grace_seconds: u64,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
