use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use pgvault_common::models::{backup, instance, Backup};
use pgvault_common::queue::MANUAL_BACKUP_PRIORITY;
use pgvault_common::types::{BackupStatus, Cadence};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use super::app::{
    bad_request, internal_error, not_found, queue_error, ApiError, ApiResponse, AppState,
};

/// The body of a manual backup request. With no database named, the
/// instance's first configured database is dumped.
#[derive(Deserialize)]
pub struct BackupRequest {
    pub instance_id: String,
    pub database: Option<String>,
}

/// Returned on acceptance. The dump has not happened yet; poll the backup id.
#[derive(Serialize)]
pub struct BackupAccepted {
    pub backup_id: Uuid,
    pub job_id: Uuid,
}

pub async fn trigger(
    State(state): State<AppState>,
    Json(body): Json<BackupRequest>,
) -> Result<(StatusCode, Json<ApiResponse<BackupAccepted>>), ApiError> {
    let inst = instance::get(&state.db, &body.instance_id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| not_found("instance not found"))?;

    let database = match body.database {
        Some(database) => {
            if !inst.databases.contains(&database) {
                return Err(bad_request(
                    "database is not configured on this instance",
                ));
            }
            database
        }
        None => inst
            .databases
            .first()
            .cloned()
            .unwrap_or_else(|| "postgres".to_owned()),
    };

    let record = backup::create(&state.db, &inst.id, &database, Cadence::Manual)
        .await
        .map_err(internal_error)?;

    let job = state
        .queue
        .add_backup_job(
            &inst.id,
            &database,
            Cadence::Manual,
            Some(record.id),
            MANUAL_BACKUP_PRIORITY,
        )
        .await
        .map_err(queue_error)?;

    if let Err(e) = backup::set_job_id(&state.db, record.id, job.id).await {
        warn!("failed to set job id on backup {}: {}", record.id, e);
    }

    Ok((
        StatusCode::ACCEPTED,
        ApiResponse::accepted(
            "backup queued; poll the backup for status",
            BackupAccepted {
                backup_id: record.id,
                job_id: job.id,
            },
        ),
    ))
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub instance_id: Option<String>,
    pub limit: Option<i64>,
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<Vec<Backup>>>, ApiError> {
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    let backups = backup::list(&state.db, query.instance_id.as_deref(), limit)
        .await
        .map_err(internal_error)?;
    Ok(ApiResponse::ok(backups))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Backup>>, ApiError> {
    let found = backup::get(&state.db, id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| not_found("backup not found"))?;
    Ok(ApiResponse::ok(found))
}

/// The body of a restore request: feed a completed backup into a database
/// on a target instance.
#[derive(Deserialize)]
pub struct RestoreRequest {
    pub backup_id: Uuid,
    pub instance_id: String,
    pub database: String,
}

#[derive(Serialize)]
pub struct RestoreAccepted {
    pub job_id: Uuid,
}

pub async fn trigger_restore(
    State(state): State<AppState>,
    Json(body): Json<RestoreRequest>,
) -> Result<(StatusCode, Json<ApiResponse<RestoreAccepted>>), ApiError> {
    if body.database.trim().is_empty() {
        return Err(bad_request("database must not be empty"));
    }

    let record = backup::get(&state.db, body.backup_id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| not_found("backup not found"))?;
    if record.status != BackupStatus::Completed {
        return Err(bad_request("only completed backups can be restored"));
    }

    instance::get(&state.db, &body.instance_id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| not_found("instance not found"))?;

    let job = state
        .queue
        .add_restore_job(body.backup_id, &body.instance_id, &body.database)
        .await
        .map_err(queue_error)?;

    Ok((
        StatusCode::ACCEPTED,
        ApiResponse::accepted(
            "restore queued; poll the job for status",
            RestoreAccepted { job_id: job.id },
        ),
    ))
}
