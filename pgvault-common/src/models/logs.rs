use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::types::LogLevel;

/// Append-only structured event, queryable by job or backup id.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct LogEntry {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub component: String,
    pub job_id: Option<Uuid>,
    pub backup_id: Option<Uuid>,
    pub message: String,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Writes structured rows into `logs` for one component. Append failures
/// degrade to a tracing warning so that logging can never fail a pipeline.
#[derive(Clone)]
pub struct LogWriter {
    pool: PgPool,
    component: String,
}

impl LogWriter {
    pub fn new(pool: PgPool, component: &str) -> Self {
        Self {
            pool,
            component: component.to_owned(),
        }
    }

    pub async fn log(
        &self,
        level: LogLevel,
        job_id: Option<Uuid>,
        backup_id: Option<Uuid>,
        message: &str,
        details: Option<&str>,
    ) {
        let result = sqlx::query(
            r#"
INSERT INTO logs ("timestamp", level, component, job_id, backup_id, message, details)
VALUES (NOW(), $1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(level)
        .bind(&self.component)
        .bind(job_id)
        .bind(backup_id)
        .bind(message)
        .bind(details)
        .execute(&self.pool)
        .await;

        if let Err(error) = result {
            warn!("failed to append log entry: {}", error);
        }
    }

    pub async fn info(&self, job_id: Option<Uuid>, backup_id: Option<Uuid>, message: &str) {
        self.log(LogLevel::Info, job_id, backup_id, message, None)
            .await;
    }

    pub async fn warn(&self, job_id: Option<Uuid>, backup_id: Option<Uuid>, message: &str) {
        self.log(LogLevel::Warn, job_id, backup_id, message, None)
            .await;
    }

    pub async fn error(
        &self,
        job_id: Option<Uuid>,
        backup_id: Option<Uuid>,
        message: &str,
        details: Option<&str>,
    ) {
        self.log(LogLevel::Error, job_id, backup_id, message, details)
            .await;
    }
}

/// Log rows for one job or backup, oldest first, most recent `limit`.
pub async fn list(
    pool: &PgPool,
    job_id: Option<Uuid>,
    backup_id: Option<Uuid>,
    limit: i64,
) -> Result<Vec<LogEntry>, DatabaseError> {
    sqlx::query_as::<_, LogEntry>(
        r#"
SELECT * FROM (
    SELECT * FROM logs
    WHERE ($1::uuid IS NULL OR job_id = $1)
      AND ($2::uuid IS NULL OR backup_id = $2)
    ORDER BY "timestamp" DESC
    LIMIT $3
) recent
ORDER BY "timestamp" ASC, id ASC
        "#,
    )
    .bind(job_id)
    .bind(backup_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(|error| DatabaseError::query("SELECT", error))
}
