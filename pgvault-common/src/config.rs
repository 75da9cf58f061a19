use envconfig::Envconfig;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};

use crate::error::{ConfigError, DatabaseError};
use crate::types::Cadence;

/// Connection settings for the control database.
#[derive(Envconfig, Clone)]
pub struct DatabaseConfig {
    #[envconfig(from = "POSTGRES_HOST", default = "localhost")]
    pub host: String,

    #[envconfig(from = "POSTGRES_PORT", default = "5432")]
    pub port: u16,

    #[envconfig(from = "POSTGRES_DB", default = "pgvault")]
    pub dbname: String,

    #[envconfig(from = "POSTGRES_USER", default = "postgres")]
    pub user: String,

    #[envconfig(from = "POSTGRES_PASSWORD", default = "")]
    pub password: String,

    #[envconfig(from = "POSTGRES_SSLMODE", default = "prefer")]
    pub ssl_mode: String,

    #[envconfig(from = "MAX_PG_CONNECTIONS", default = "10")]
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn connect_options(&self) -> Result<PgConnectOptions, ConfigError> {
        let ssl_mode: PgSslMode =
            self.ssl_mode
                .parse()
                .map_err(|_| ConfigError::Invalid {
                    name: "POSTGRES_SSLMODE",
                    reason: format!("{} is not a valid ssl mode", self.ssl_mode),
                })?;

        Ok(PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.dbname)
            .username(&self.user)
            .password(&self.password)
            .ssl_mode(ssl_mode))
    }

    pub async fn connect(&self) -> Result<PgPool, DatabaseError> {
        let options = self
            .connect_options()
            .map_err(|error| DatabaseError::Connection {
                error: sqlx::Error::Configuration(error.to_string().into()),
            })?;

        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect_with(options)
            .await
            .map_err(|error| DatabaseError::PoolCreation { error })
    }
}

/// Object-store settings. Region, bucket and both credential halves are
/// required; an empty value is a fatal startup error.
#[derive(Envconfig, Clone)]
pub struct StoreConfig {
    #[envconfig(from = "S3_ENDPOINT", default = "")]
    pub endpoint: String,

    #[envconfig(from = "S3_REGION", default = "")]
    pub region: String,

    #[envconfig(from = "S3_BUCKET", default = "")]
    pub bucket: String,

    #[envconfig(from = "S3_ACCESS_KEY_ID", default = "")]
    pub access_key_id: String,

    #[envconfig(from = "S3_SECRET_ACCESS_KEY", default = "")]
    pub secret_access_key: String,

    #[envconfig(from = "S3_USE_SSL", default = "true")]
    pub use_ssl: bool,
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.region.is_empty() {
            return Err(ConfigError::Missing("S3_REGION"));
        }
        if self.bucket.is_empty() {
            return Err(ConfigError::Missing("S3_BUCKET"));
        }
        if self.access_key_id.is_empty() {
            return Err(ConfigError::Missing("S3_ACCESS_KEY_ID"));
        }
        if self.secret_access_key.is_empty() {
            return Err(ConfigError::Missing("S3_SECRET_ACCESS_KEY"));
        }
        Ok(())
    }

    /// The endpoint override for non-AWS stores, with a scheme derived from
    /// `S3_USE_SSL` when the configured value carries none.
    pub fn endpoint_url(&self) -> Option<String> {
        if self.endpoint.is_empty() {
            return None;
        }
        if self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://") {
            return Some(self.endpoint.clone());
        }
        let scheme = if self.use_ssl { "https" } else { "http" };
        Some(format!("{}://{}", scheme, self.endpoint))
    }
}

/// How many artifacts to keep per cadence. These are object counts, not time
/// windows: cleanup keeps the N newest objects under the cadence prefix.
#[derive(Envconfig, Clone, Copy)]
pub struct RetentionConfig {
    #[envconfig(from = "RETENTION_HOURLY", default = "24")]
    pub hourly: u32,

    #[envconfig(from = "RETENTION_DAILY", default = "7")]
    pub daily: u32,

    #[envconfig(from = "RETENTION_WEEKLY", default = "4")]
    pub weekly: u32,

    #[envconfig(from = "RETENTION_MONTHLY", default = "12")]
    pub monthly: u32,
}

impl RetentionConfig {
    /// None for `manual`: manual backups are exempt from retention.
    pub fn keep_count(&self, cadence: Cadence) -> Option<u32> {
        match cadence {
            Cadence::Hourly => Some(self.hourly),
            Cadence::Daily => Some(self.daily),
            Cadence::Weekly => Some(self.weekly),
            Cadence::Monthly => Some(self.monthly),
            Cadence::Manual => None,
        }
    }
}
