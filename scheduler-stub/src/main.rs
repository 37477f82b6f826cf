//! Minimal in-memory scheduler used for local development against `taskd`.
//!
//! Implements exactly the scheduler contract `taskd`'s `SchedulerClient`
//! speaks: `POST /task` and `POST /cancel`, both replying 2xx for any
//! well-formed payload. No persistence, no authentication.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use clap::Parser;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "scheduler-stub")]
#[command(about = "Minimal in-memory scheduler for exercising taskd locally", long_about = None)]
struct CliArgs {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:9000")]
    listen_address: String,
}

#[derive(Debug, Deserialize)]
struct TaskPayload {
    task_id: String,
    #[serde(flatten)]
    rest: HashMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct CancelPayload {
    task_id: String,
}

#[derive(Default)]
struct SchedulerState {
    tasks: HashMap<String, Value>,
}

type SharedState = Arc<RwLock<SchedulerState>>;

async fn submit_task(
    State(state): State<SharedState>,
    Json(payload): Json<TaskPayload>,
) -> impl IntoResponse {
    info!(task_id = %payload.task_id, "accepted task");
    let mut state = state.write().await;
    state.tasks.insert(payload.task_id.clone(), serde_json::json!(payload.rest));
    (
        StatusCode::OK,
        Json(serde_json::json!({"status": "accepted", "task_id": payload.task_id})),
    )
}

async fn cancel_task(
    State(state): State<SharedState>,
    Json(payload): Json<CancelPayload>,
) -> impl IntoResponse {
    let mut state = state.write().await;
    if state.tasks.remove(&payload.task_id).is_none() {
        warn!(task_id = %payload.task_id, "cancellation for unknown task");
    } else {
        info!(task_id = %payload.task_id, "cancelled task");
    }
    (
        StatusCode::OK,
        Json(serde_json::json!({"status": "cancelled", "task_id": payload.task_id})),
    )
}

fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/task", post(submit_task))
        .route("/cancel", post(cancel_task))
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("scheduler_stub=info")),
        )
        .init();

    let cli_args = CliArgs::parse();
    let state: SharedState = Arc::new(RwLock::new(SchedulerState::default()));
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&cli_args.listen_address).await?;
    info!(listen_address = %cli_args.listen_address, "scheduler-stub listening");
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state() -> SharedState {
        Arc::new(RwLock::new(SchedulerState::default()))
    }

    #[tokio::test]
    async fn submit_then_cancel_round_trip() {
        let state = test_state();
        let router = create_router(state);

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/task")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({"task_id": "1", "service": "sync", "user_id": "alice", "parameters": {}})
                            .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/cancel")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({"task_id": "1", "service": "sync", "user_id": "alice"}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn cancel_of_unknown_task_still_succeeds() {
        let state = test_state();
        let router = create_router(state);

        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/cancel")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::json!({"task_id": "missing"}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
