use thiserror::Error;

/// Enumeration of parsing errors for values read from the control database
/// or from job payloads.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("{0} is not a valid Cadence")]
    InvalidCadence(String),
    #[error("{0} is not a valid JobType")]
    InvalidJobType(String),
    #[error("{0} is not a valid JobStatus")]
    InvalidJobStatus(String),
    #[error("{0} is not a valid BackupStatus")]
    InvalidBackupStatus(String),
    #[error("{0} is not a valid SslMode")]
    InvalidSslMode(String),
    #[error("could not deserialize job payload: {error}")]
    InvalidPayload { error: serde_json::Error },
}

/// Enumeration of control-database errors.
/// Errors that can originate from sqlx and are wrapped by us to provide
/// additional context.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("pool creation failed with: {error}")]
    PoolCreation { error: sqlx::Error },
    #[error("connection failed with: {error}")]
    Connection { error: sqlx::Error },
    #[error("{command} query failed with: {error}")]
    Query {
        command: &'static str,
        error: sqlx::Error,
    },
}

impl DatabaseError {
    pub fn query(command: &'static str, error: sqlx::Error) -> Self {
        DatabaseError::Query { command, error }
    }
}

/// Missing or invalid startup configuration. Fatal: binaries exit non-zero.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    Missing(&'static str),
    #[error("invalid configuration for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}
