//! Orchestrator HTTP server.
//!
//! Binds the `TaskService` to the public surface: task submission and
//! inspection, cancel/retry, worker listing, and activity queries.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::{Path as UrlPath, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use taskmesh_config::{load_config, TaskmeshConfig};
use taskmesh_core::{Capability, TaskState};
use taskmesh_runtime::{ApiError, RuntimeApp, TaskService};

#[derive(Clone)]
struct AppState {
    service: Arc<TaskService>,
}

#[derive(Debug, Deserialize)]
struct CreateTaskRequest {
    description: String,
    submitter_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AvailableQuery {
    capability: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListTasksQuery {
    state: String,
}

#[derive(Debug, Deserialize)]
struct ActivityQuery {
    worker_id: Option<String>,
    task_id: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

pub fn init_tracing(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn load_or_default(path: &Path) -> anyhow::Result<TaskmeshConfig> {
    if path.exists() {
        Ok(load_config(path)?)
    } else {
        warn!(path = %path.display(), "config file not found, using defaults");
        Ok(TaskmeshConfig::default())
    }
}

pub async fn run_server(config: PathBuf, listen: SocketAddr) -> anyhow::Result<()> {
    let config = load_or_default(&config)?;
    init_tracing(&config.observability.log_level);

    let mut app = RuntimeApp::from_config(config)
        .await
        .context("build orchestrator runtime failed")?;
    app.spawn_loops();

    let state = AppState {
        service: app.service.clone(),
    };
    let router = Router::new()
        .route("/health", get(health))
        .route("/tasks", post(create_task).get(list_tasks))
        .route("/tasks/{task_id}", get(get_task))
        .route("/tasks/{task_id}/cancel", post(cancel_task))
        .route("/tasks/{task_id}/retry", post(retry_task))
        .route("/workers", get(list_workers))
        .route("/workers/available", get(list_available_workers))
        .route("/activity", get(recent_activity))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .context("bind server listener failed")?;
    info!(%listen, "taskmesh-server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("server terminated with error")?;

    app.shutdown().await;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn create_task(
    State(state): State<AppState>,
    Json(payload): Json<CreateTaskRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorBody>)> {
    let receipt = state
        .service
        .submit(&payload.description, payload.submitter_id)
        .await
        .map_err(map_api_error)?;
    Ok(Json(receipt))
}

async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListTasksQuery>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorBody>)> {
    let task_state = TaskState::from_str(&query.state)
        .map_err(|err| map_api_error(ApiError::InvalidArgument(err.to_string())))?;
    let tasks = state
        .service
        .list_tasks(task_state)
        .await
        .map_err(map_api_error)?;
    Ok(Json(serde_json::json!({
        "count": tasks.len(),
        "tasks": tasks,
    })))
}

async fn get_task(
    State(state): State<AppState>,
    UrlPath(task_id): UrlPath<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorBody>)> {
    let details = state
        .service
        .get_task(&task_id)
        .await
        .map_err(map_api_error)?;
    Ok(Json(details))
}

async fn cancel_task(
    State(state): State<AppState>,
    UrlPath(task_id): UrlPath<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorBody>)> {
    state.service.cancel(&task_id).await.map_err(map_api_error)?;
    Ok(Json(serde_json::json!({
        "task_id": task_id,
        "status": "cancelled",
    })))
}

async fn retry_task(
    State(state): State<AppState>,
    UrlPath(task_id): UrlPath<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorBody>)> {
    let receipt = state.service.retry(&task_id).await.map_err(map_api_error)?;
    Ok(Json(receipt))
}

async fn list_workers(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorBody>)> {
    let workers = state.service.list_workers().await.map_err(map_api_error)?;
    Ok(Json(serde_json::json!({ "workers": workers })))
}

async fn list_available_workers(
    State(state): State<AppState>,
    Query(query): Query<AvailableQuery>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorBody>)> {
    let capability = query
        .capability
        .as_deref()
        .map(Capability::from_str)
        .transpose()
        .map_err(|err| map_api_error(ApiError::InvalidArgument(err.to_string())))?;
    let available = state
        .service
        .list_available_workers(capability)
        .await
        .map_err(map_api_error)?;
    Ok(Json(serde_json::json!({
        "count": available.len(),
        "available": available,
    })))
}

async fn recent_activity(
    State(state): State<AppState>,
    Query(query): Query<ActivityQuery>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorBody>)> {
    let entries = state
        .service
        .recent_activity(
            query.worker_id.as_deref(),
            query.task_id.as_deref(),
            query.limit.unwrap_or(100),
        )
        .await
        .map_err(map_api_error)?;
    Ok(Json(serde_json::json!({ "entries": entries })))
}

fn map_api_error(err: ApiError) -> (StatusCode, Json<ErrorBody>) {
    let (status, code) = match &err {
        ApiError::InvalidArgument(_) => (StatusCode::BAD_REQUEST, "invalid_argument"),
        ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        ApiError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
        ApiError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
        ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    };
    (
        status,
        Json(ErrorBody {
            code: code.to_string(),
            message: err.to_string(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_errors_map_to_expected_status_codes() {
        let cases = [
            (
                ApiError::InvalidArgument("too short".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::NotFound("task".to_string()),
                StatusCode::NOT_FOUND,
            ),
            (
                ApiError::Conflict("already terminal".to_string()),
                StatusCode::CONFLICT,
            ),
            (
                ApiError::Unavailable("redis down".to_string()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ApiError::Internal("bug".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            let (status, _) = map_api_error(err);
            assert_eq!(status, expected);
        }
    }
}
