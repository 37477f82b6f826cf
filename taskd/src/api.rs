//! HTTP surface for the task lifecycle service.
//!
//! Two authorization tiers share one router: user-scoped routes under
//! `/api/v1/services/{service}/...` apply ownership filtering (a task
//! belonging to someone else is reported as 404, identical to a missing
//! task), and admin-scoped routes under `/api/v1/admin/...` operate on any
//! task. Both tiers require the `X-Operator-Token` header; only `/healthz`
//! and `/api/v1/help` are unauthenticated.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::Value;
use shared::model::{Priority, TaskRecord};
use tracing::warn;

use crate::task_service::TaskService;

#[derive(Clone)]
pub struct AppState {
    pub task_service: Arc<TaskService>,
    pub operator_token: Arc<String>,
}

/// Errors surfaced by the API layer. Each variant maps to a status code and
/// a `{"error": ..., "details": ...}` JSON body.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Task not found")]
    NotFound,
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized"),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "Not Found"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error"),
        };
        let body = Json(serde_json::json!({
            "error": error_message,
            "details": self.to_string(),
        }));
        (status, body).into_response()
    }
}

/// Compares the `X-Operator-Token` header against the configured token in
/// constant time, so a caller cannot learn the token byte-by-byte from
/// response timing.
fn require_operator_token(headers: &HeaderMap, expected: &str) -> Result<(), ApiError> {
    use subtle::ConstantTimeEq;

    let provided = match headers.get("X-Operator-Token") {
        Some(value) => match value.to_str() {
            Ok(value) => value,
            Err(_) => {
                warn!("invalid X-Operator-Token header encoding");
                return Err(ApiError::Unauthorized);
            }
        },
        None => {
            warn!("missing X-Operator-Token header");
            return Err(ApiError::Unauthorized);
        }
    };

    let provided_bytes = provided.as_bytes();
    let expected_bytes = expected.as_bytes();
    let matches = provided_bytes.len() == expected_bytes.len()
        && bool::from(provided_bytes.ct_eq(expected_bytes));
    if matches {
        Ok(())
    } else {
        warn!("operator token mismatch");
        Err(ApiError::Unauthorized)
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/v1/help", get(help_endpoint))
        .route("/api/v1/services/{service}/users", get(list_service_users))
        .route(
            "/api/v1/services/{service}/users/{user_id}/tasks",
            get(list_user_tasks).post(create_task),
        )
        .route(
            "/api/v1/services/{service}/tasks/{task_id}",
            get(get_task_status).delete(cleanup_task),
        )
        .route(
            "/api/v1/services/{service}/tasks/{task_id}/cancel",
            post(cancel_task),
        )
        .route("/api/v1/admin/tasks", get(list_all_tasks))
        .route(
            "/api/v1/admin/services/{service}/tasks",
            get(list_service_tasks),
        )
        .route(
            "/api/v1/admin/tasks/{task_id}/cancel",
            post(admin_cancel_task),
        )
        .route("/api/v1/admin/tasks/{task_id}", delete(admin_cleanup_task))
        .with_state(state)
}

#[derive(Serialize)]
struct RedisHealth {
    connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    redis: RedisHealth,
}

async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    match state.task_service.health_check().await {
        Ok(()) => Json(HealthResponse {
            status: "ok",
            redis: RedisHealth { connected: true, message: None },
        })
        .into_response(),
        Err(err) => {
            warn!(%err, "health check failed");
            let body = HealthResponse {
                status: "error",
                redis: RedisHealth { connected: false, message: Some(err.to_string()) },
            };
            (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
        }
    }
}

#[derive(Serialize)]
struct HelpResponse {
    description: &'static str,
    endpoints: Vec<&'static str>,
}

async fn help_endpoint() -> impl IntoResponse {
    Json(HelpResponse {
        description: "Task lifecycle service API (X-Operator-Token required for all endpoints except /help and /healthz)",
        endpoints: vec![
            "GET /healthz",
            "GET /api/v1/services/{service}/users/{user_id}/tasks",
            "POST /api/v1/services/{service}/users/{user_id}/tasks",
            "GET /api/v1/services/{service}/users",
            "GET /api/v1/services/{service}/tasks/{task_id}",
            "POST /api/v1/services/{service}/tasks/{task_id}/cancel",
            "DELETE /api/v1/services/{service}/tasks/{task_id}",
            "GET /api/v1/admin/tasks",
            "GET /api/v1/admin/services/{service}/tasks",
            "POST /api/v1/admin/tasks/{task_id}/cancel",
            "DELETE /api/v1/admin/tasks/{task_id}",
        ],
    })
}

#[derive(Serialize)]
struct TaskUserListResponse {
    users: Vec<String>,
}

async fn list_service_users(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(service): Path<String>,
) -> Result<Json<TaskUserListResponse>, ApiError> {
    require_operator_token(&headers, &state.operator_token)?;
    let users = state.task_service.list_users_by_service(&service).await?;
    Ok(Json(TaskUserListResponse { users }))
}

#[derive(Serialize)]
struct TaskListResponse {
    tasks: Vec<TaskRecord>,
}

async fn list_user_tasks(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((service, user_id)): Path<(String, String)>,
) -> Result<Json<TaskListResponse>, ApiError> {
    require_operator_token(&headers, &state.operator_token)?;
    let tasks = state
        .task_service
        .list_by_service_and_user(&service, &user_id)
        .await?;
    Ok(Json(TaskListResponse { tasks }))
}

#[derive(Serialize)]
struct TaskCreateResponse {
    task_id: String,
    status: shared::model::TaskStatus,
}

async fn create_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((service, user_id)): Path<(String, String)>,
    Query(parameters): Query<HashMap<String, String>>,
) -> Result<(StatusCode, Json<TaskCreateResponse>), ApiError> {
    require_operator_token(&headers, &state.operator_token)?;
    let parameters: HashMap<String, Value> = parameters
        .into_iter()
        .map(|(key, value)| (key, Value::String(value)))
        .collect();
    let result = state
        .task_service
        .create(&service, &user_id, parameters, Priority::default())
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(TaskCreateResponse { task_id: result.task_id, status: result.status }),
    ))
}

#[derive(Serialize)]
struct TaskStatusResponse {
    task: TaskRecord,
}

#[derive(serde::Deserialize)]
struct UserIdQuery {
    user_id: String,
}

async fn get_task_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((service, task_id)): Path<(String, String)>,
    Query(query): Query<UserIdQuery>,
) -> Result<Json<TaskStatusResponse>, ApiError> {
    require_operator_token(&headers, &state.operator_token)?;
    let task = state.task_service.get(&task_id).await?;
    match task {
        Some(task) if task.service == service && task.user_id == query.user_id => {
            Ok(Json(TaskStatusResponse { task }))
        }
        _ => Err(ApiError::NotFound),
    }
}

async fn cancel_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((service, task_id)): Path<(String, String)>,
    Query(query): Query<UserIdQuery>,
) -> Result<Json<TaskStatusResponse>, ApiError> {
    require_operator_token(&headers, &state.operator_token)?;
    let task = state
        .task_service
        .cancel(&task_id, Some(&service), Some(&query.user_id))
        .await?;
    match task {
        Some(task) => Ok(Json(TaskStatusResponse { task })),
        None => Err(ApiError::NotFound),
    }
}

async fn cleanup_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((service, task_id)): Path<(String, String)>,
    Query(query): Query<UserIdQuery>,
) -> Result<Json<TaskStatusResponse>, ApiError> {
    require_operator_token(&headers, &state.operator_token)?;
    let task = state.task_service.get(&task_id).await?;
    let Some(task) = task.filter(|task| task.service == service && task.user_id == query.user_id)
    else {
        return Err(ApiError::NotFound);
    };
    state
        .task_service
        .cleanup(&task_id, Some(&service), Some(&query.user_id))
        .await?;
    Ok(Json(TaskStatusResponse { task }))
}

async fn list_all_tasks(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<TaskListResponse>, ApiError> {
    require_operator_token(&headers, &state.operator_token)?;
    let tasks = state.task_service.list_all().await?;
    Ok(Json(TaskListResponse { tasks }))
}

async fn list_service_tasks(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(service): Path<String>,
) -> Result<Json<TaskListResponse>, ApiError> {
    require_operator_token(&headers, &state.operator_token)?;
    let tasks = state.task_service.list_by_service(&service).await?;
    Ok(Json(TaskListResponse { tasks }))
}

async fn admin_cancel_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
) -> Result<Json<TaskStatusResponse>, ApiError> {
    require_operator_token(&headers, &state.operator_token)?;
    let task = state.task_service.cancel(&task_id, None, None).await?;
    match task {
        Some(task) => Ok(Json(TaskStatusResponse { task })),
        None => Err(ApiError::NotFound),
    }
}

async fn admin_cleanup_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
) -> Result<Json<TaskStatusResponse>, ApiError> {
    require_operator_token(&headers, &state.operator_token)?;
    let Some(task) = state.task_service.get(&task_id).await? else {
        return Err(ApiError::NotFound);
    };
    state.task_service.cleanup(&task_id, None, None).await?;
    Ok(Json(TaskStatusResponse { task }))
}
