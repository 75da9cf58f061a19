use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use pgvault_common::error::DatabaseError;
use pgvault_common::models::instance::{self, Instance, InstanceUpdate};
use pgvault_common::types::SslMode;
use serde::Deserialize;
use uuid::Uuid;

use super::app::{bad_request, internal_error, not_found, ApiError, ApiResponse, AppState};

/// The body of a request to register an instance. Everything but the
/// connection coordinates has a default.
#[derive(Deserialize)]
pub struct CreateInstanceRequest {
    pub id: Option<String>,
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: i32,
    pub username: String,
    pub password: String,
    pub databases: Option<Vec<String>>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub ssl_mode: Option<SslMode>,
}

fn default_port() -> i32 {
    5432
}

fn default_enabled() -> bool {
    true
}

fn is_unique_violation(error: &DatabaseError) -> bool {
    match error {
        DatabaseError::Query {
            error: sqlx::Error::Database(db_error),
            ..
        } => db_error.is_unique_violation(),
        _ => false,
    }
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateInstanceRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Instance>>), ApiError> {
    if body.name.trim().is_empty() {
        return Err(bad_request("name must not be empty"));
    }
    if body.host.trim().is_empty() {
        return Err(bad_request("host must not be empty"));
    }
    if body.username.trim().is_empty() {
        return Err(bad_request("username must not be empty"));
    }
    if !(1..=65535).contains(&body.port) {
        return Err(bad_request("port must be between 1 and 65535"));
    }
    let databases = match body.databases {
        Some(databases) if databases.is_empty() => {
            return Err(bad_request("databases must not be empty"))
        }
        Some(databases) => databases,
        None => vec!["postgres".to_owned()],
    };

    let now = Utc::now();
    let new_instance = Instance {
        id: body.id.unwrap_or_else(|| Uuid::now_v7().to_string()),
        name: body.name,
        host: body.host,
        port: body.port,
        username: body.username,
        password: body.password,
        databases,
        enabled: body.enabled,
        ssl_mode: body.ssl_mode.unwrap_or(SslMode::Prefer),
        created_at: now,
        updated_at: now,
    };

    match instance::create(&state.db, &new_instance).await {
        Ok(()) => {}
        Err(e) if is_unique_violation(&e) => {
            return Err(super::app::api_error(
                StatusCode::CONFLICT,
                "an instance with this id or name already exists",
            ))
        }
        Err(e) => return Err(internal_error(e)),
    }

    let created = instance::get(&state.db, &new_instance.id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| internal_error("instance vanished after insert"))?;

    Ok((StatusCode::CREATED, ApiResponse::ok(created)))
}

pub async fn list(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<Instance>>>, ApiError> {
    let instances = instance::list(&state.db).await.map_err(internal_error)?;
    Ok(ApiResponse::ok(instances))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Instance>>, ApiError> {
    let found = instance::get(&state.db, &id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| not_found("instance not found"))?;
    Ok(ApiResponse::ok(found))
}

/// The body of an update request; absent fields keep their current value.
#[derive(Deserialize)]
pub struct UpdateInstanceRequest {
    pub name: Option<String>,
    pub host: Option<String>,
    pub port: Option<i32>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub databases: Option<Vec<String>>,
    pub enabled: Option<bool>,
    pub ssl_mode: Option<SslMode>,
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateInstanceRequest>,
) -> Result<Json<ApiResponse<Instance>>, ApiError> {
    if matches!(&body.databases, Some(databases) if databases.is_empty()) {
        return Err(bad_request("databases must not be empty"));
    }
    if matches!(body.port, Some(port) if !(1..=65535).contains(&port)) {
        return Err(bad_request("port must be between 1 and 65535"));
    }

    let updated = instance::update(
        &state.db,
        &id,
        &InstanceUpdate {
            name: body.name,
            host: body.host,
            port: body.port,
            username: body.username,
            password: body.password,
            databases: body.databases,
            enabled: body.enabled,
            ssl_mode: body.ssl_mode,
        },
    )
    .await
    .map_err(internal_error)?
    .ok_or_else(|| not_found("instance not found"))?;

    Ok(ApiResponse::ok(updated))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let deleted = instance::delete(&state.db, &id)
        .await
        .map_err(internal_error)?;
    if !deleted {
        return Err(not_found("instance not found"));
    }
    Ok(ApiResponse::accepted("instance deleted", ()))
}
