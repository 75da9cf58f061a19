use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::types::{BackupStatus, Cadence};

/// The durable record of one dump attempt of one database. Created by the
/// API or the scheduler, then mutated exclusively by the worker that claims
/// the associated job.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Backup {
    pub id: Uuid,
    pub instance_id: String,
    pub database_name: String,
    pub cadence: Cadence,
    pub status: BackupStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub local_path: Option<String>,
    pub file_size: i64,
    pub object_key: Option<String>,
    pub error_message: Option<String>,
    pub job_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Inserts a new pending backup row and returns it.
pub async fn create(
    pool: &PgPool,
    instance_id: &str,
    database_name: &str,
    cadence: Cadence,
) -> Result<Backup, DatabaseError> {
    sqlx::query_as::<_, Backup>(
        r#"
INSERT INTO backups (id, instance_id, database_name, cadence, status)
VALUES ($1, $2, $3, $4, 'pending')
RETURNING *
        "#,
    )
    .bind(Uuid::now_v7())
    .bind(instance_id)
    .bind(database_name)
    .bind(cadence)
    .fetch_one(pool)
    .await
    .map_err(|error| DatabaseError::query("INSERT", error))
}

pub async fn get(pool: &PgPool, id: Uuid) -> Result<Option<Backup>, DatabaseError> {
    sqlx::query_as::<_, Backup>("SELECT * FROM backups WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|error| DatabaseError::query("SELECT", error))
}

pub async fn list(
    pool: &PgPool,
    instance_id: Option<&str>,
    limit: i64,
) -> Result<Vec<Backup>, DatabaseError> {
    sqlx::query_as::<_, Backup>(
        r#"
SELECT * FROM backups
WHERE $1::text IS NULL OR instance_id = $1
ORDER BY created_at DESC
LIMIT $2
        "#,
    )
    .bind(instance_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(|error| DatabaseError::query("SELECT", error))
}

/// Best-effort association of the queue job driving this backup.
pub async fn set_job_id(pool: &PgPool, id: Uuid, job_id: Uuid) -> Result<(), DatabaseError> {
    sqlx::query("UPDATE backups SET job_id = $2 WHERE id = $1")
        .bind(id)
        .bind(job_id)
        .execute(pool)
        .await
        .map_err(|error| DatabaseError::query("UPDATE", error))?;

    Ok(())
}

pub async fn mark_in_progress(pool: &PgPool, id: Uuid) -> Result<(), DatabaseError> {
    sqlx::query(
        "UPDATE backups SET status = 'in_progress', start_time = NOW() WHERE id = $1",
    )
    .bind(id)
    .execute(pool)
    .await
    .map_err(|error| DatabaseError::query("UPDATE", error))?;

    Ok(())
}

/// Records where the dump landed on disk and how large it is.
pub async fn set_local_file(
    pool: &PgPool,
    id: Uuid,
    local_path: &str,
    file_size: i64,
) -> Result<(), DatabaseError> {
    sqlx::query("UPDATE backups SET local_path = $2, file_size = $3 WHERE id = $1")
        .bind(id)
        .bind(local_path)
        .bind(file_size)
        .execute(pool)
        .await
        .map_err(|error| DatabaseError::query("UPDATE", error))?;

    Ok(())
}

/// Terminal success: the artifact is in the object store and the local file
/// is gone.
pub async fn mark_completed(
    pool: &PgPool,
    id: Uuid,
    object_key: &str,
    file_size: i64,
) -> Result<(), DatabaseError> {
    sqlx::query(
        r#"
UPDATE backups
SET status = 'completed',
    end_time = NOW(),
    object_key = $2,
    file_size = $3,
    local_path = NULL,
    error_message = NULL
WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(object_key)
    .bind(file_size)
    .execute(pool)
    .await
    .map_err(|error| DatabaseError::query("UPDATE", error))?;

    Ok(())
}

/// Terminal failure; `end_time` is always set alongside it.
pub async fn mark_failed(pool: &PgPool, id: Uuid, message: &str) -> Result<(), DatabaseError> {
    sqlx::query(
        "UPDATE backups SET status = 'failed', end_time = NOW(), error_message = $2 WHERE id = $1",
    )
    .bind(id)
    .bind(message)
    .execute(pool)
    .await
    .map_err(|error| DatabaseError::query("UPDATE", error))?;

    Ok(())
}
