use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{routing, Json, Router};
use pgvault_common::queue::{PgQueue, QueueError, QueueStats};
use serde::Serialize;
use sqlx::PgPool;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::error;

use super::{backups, instances, logs};

/// Shared state of the admin surface.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub queue: PgQueue,
    /// Process-wide immutable shared secret, loaded at startup.
    pub api_key: Arc<String>,
}

/// The uniform response envelope every endpoint returns.
#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            message: None,
            data: Some(data),
            error: None,
        })
    }

    /// 2xx acceptance: the work is queued, not done; the caller polls.
    pub fn accepted(message: &str, data: T) -> Json<Self> {
        Json(Self {
            success: true,
            message: Some(message.to_owned()),
            data: Some(data),
            error: None,
        })
    }
}

pub type ApiError = (StatusCode, Json<ApiResponse<()>>);

pub fn api_error(status: StatusCode, message: &str) -> ApiError {
    (
        status,
        Json(ApiResponse {
            success: false,
            message: None,
            data: None,
            error: Some(message.to_owned()),
        }),
    )
}

pub fn bad_request(message: &str) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, message)
}

pub fn not_found(message: &str) -> ApiError {
    api_error(StatusCode::NOT_FOUND, message)
}

pub fn internal_error<E: std::fmt::Display>(err: E) -> ApiError {
    error!("internal error: {}", err);
    api_error(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string())
}

/// Producer-side queue signals surface to the admin caller; everything else
/// is internal.
pub fn queue_error(err: QueueError) -> ApiError {
    match err {
        QueueError::QueueFull => api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "job queue is full, retry shortly",
        ),
        QueueError::ShuttingDown => {
            api_error(StatusCode::SERVICE_UNAVAILABLE, "service is shutting down")
        }
        other => internal_error(other),
    }
}

/// Require the shared API key as a bearer token or `X-API-Key` header.
async fn require_api_key(
    State(state): State<AppState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let headers = request.headers();
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .or_else(|| {
            headers
                .get("x-api-key")
                .and_then(|v| v.to_str().ok())
        });

    if presented != Some(state.api_key.as_str()) {
        return api_error(StatusCode::UNAUTHORIZED, "invalid or missing api key")
            .into_response();
    }

    next.run(request).await
}

pub fn add_routes(router: Router, state: AppState, max_body_size: usize) -> Router {
    let api = Router::new()
        .route(
            "/instances",
            routing::post(instances::create).get(instances::list),
        )
        .route(
            "/instances/:id",
            routing::get(instances::get)
                .put(instances::update)
                .delete(instances::delete),
        )
        .route(
            "/backups",
            routing::post(backups::trigger).get(backups::list),
        )
        .route("/backups/:id", routing::get(backups::get))
        .route("/restores", routing::post(backups::trigger_restore))
        .route("/queue/stats", routing::get(queue_stats))
        .route("/logs", routing::get(logs::list))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ))
        .layer(RequestBodyLimitLayer::new(max_body_size))
        .with_state(state);

    router
        .route("/", routing::get(index))
        .route("/_readiness", routing::get(index))
        .route("/_liveness", routing::get(index)) // No async loop here, axum health is process health
        .nest("/api", api)
}

pub async fn index() -> &'static str {
    "pgvault api"
}

#[cfg(test)]
pub(crate) fn test_state(db: PgPool) -> AppState {
    AppState {
        queue: PgQueue::new_producer(db.clone()),
        db,
        api_key: Arc::new("test-key".to_owned()),
    }
}

async fn queue_stats(State(state): State<AppState>) -> Json<ApiResponse<QueueStats>> {
    ApiResponse::ok(state.queue.stats().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http::Request;
    use http_body_util::BodyExt; // for `collect`
    use tower::ServiceExt; // for `oneshot`

    #[sqlx::test(migrations = "../pgvault-common/migrations")]
    async fn index_needs_no_auth(db: PgPool) {
        let app = add_routes(Router::new(), test_state(db), 1_000_000);

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"pgvault api");
    }

    #[sqlx::test(migrations = "../pgvault-common/migrations")]
    async fn api_routes_require_the_key(db: PgPool) {
        let app = add_routes(Router::new(), test_state(db), 1_000_000);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/instances")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/instances")
                    .header("x-api-key", "wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        for (header_name, value) in [
            ("x-api-key", "test-key"),
            ("authorization", "Bearer test-key"),
        ] {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .uri("/api/instances")
                        .header(header_name, value)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[sqlx::test(migrations = "../pgvault-common/migrations")]
    async fn queue_stats_returns_the_envelope(db: PgPool) {
        let app = add_routes(Router::new(), test_state(db), 1_000_000);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/queue/stats")
                    .header("x-api-key", "test-key")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["success"], true);
        assert!(parsed["data"]["total_jobs"].is_number());
    }
}
