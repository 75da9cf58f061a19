use axum::extract::{Query, State};
use axum::Json;
use pgvault_common::models::{logs, LogEntry};
use serde::Deserialize;
use uuid::Uuid;

use super::app::{internal_error, ApiError, ApiResponse, AppState};

#[derive(Deserialize)]
pub struct LogsQuery {
    pub job_id: Option<Uuid>,
    pub backup_id: Option<Uuid>,
    pub limit: Option<i64>,
}

/// Structured log rows for one job or backup, oldest first.
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<ApiResponse<Vec<LogEntry>>>, ApiError> {
    let limit = query.limit.unwrap_or(200).clamp(1, 1000);
    let entries = logs::list(&state.db, query.job_id, query.backup_id, limit)
        .await
        .map_err(internal_error)?;
    Ok(ApiResponse::ok(entries))
}
