//! Worker agent service.
//!
//! Accepts execution requests from the dispatcher on `/execute` (one at a
//! time; 503 while occupied), runs them through a `SubtaskExecutor`, and
//! reports outcomes on the result queue. A heartbeat loop keeps the status
//! hash alive in the registry; when heartbeats stop, the TTL quietly
//! removes this worker from the orchestrator's view.

mod executor;

pub use executor::{LlmExecutor, StubExecutor, SubtaskExecutor};

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use taskmesh_config::{load_config, TaskmeshConfig};
use taskmesh_core::{Capability, ResultQueue, SubTaskResult, WorkerStatus};
use taskmesh_planner::{HttpLlmClient, HttpLlmClientConfig};
use taskmesh_runtime::{build_coord_backends, ExecuteRequest, RegistryService};

struct WorkerState {
    worker_id: String,
    endpoint: String,
    capabilities: Vec<Capability>,
    current_subtask: Mutex<Option<String>>,
    completed_count: AtomicU64,
}

impl WorkerState {
    fn status(&self) -> WorkerStatus {
        let current = self
            .current_subtask
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or(None);
        WorkerStatus {
            worker_id: self.worker_id.clone(),
            endpoint: self.endpoint.clone(),
            capabilities: self.capabilities.clone(),
            available: current.is_none(),
            current_subtask_id: current,
            cpu_pct: 0.0,
            mem_pct: 0.0,
            completed_count: self.completed_count.load(Ordering::Relaxed),
            last_heartbeat_at: Utc::now(),
        }
    }

    /// Claim the worker for a subtask; `false` when already occupied.
    fn try_occupy(&self, subtask_id: &str) -> bool {
        match self.current_subtask.lock() {
            Ok(mut guard) => {
                if guard.is_some() {
                    false
                } else {
                    *guard = Some(subtask_id.to_string());
                    true
                }
            }
            Err(_) => false,
        }
    }

    fn release(&self, completed: bool) {
        if let Ok(mut guard) = self.current_subtask.lock() {
            *guard = None;
        }
        if completed {
            self.completed_count.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[derive(Clone)]
struct AppState {
    state: Arc<WorkerState>,
    executor: Arc<dyn SubtaskExecutor>,
    result_queue: Arc<dyn ResultQueue>,
    registry: Arc<RegistryService>,
}

fn init_tracing(log_level: &str) {
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

fn build_executor(
    config: &TaskmeshConfig,
    worker_id: &str,
) -> anyhow::Result<Arc<dyn SubtaskExecutor>> {
    match config.planner.mode.trim().to_ascii_lowercase().as_str() {
        "llm" => {
            let client = HttpLlmClient::new(HttpLlmClientConfig {
                endpoint: config.planner.endpoint.clone(),
                api_key: config.planner.api_key.clone(),
                timeout_secs: 120,
            })
            .map_err(|e| anyhow::anyhow!("llm client: {e}"))?;
            Ok(Arc::new(LlmExecutor::new(
                client,
                worker_id,
                config.planner.model.clone(),
                config.planner.temperature,
            )))
        }
        _ => Ok(Arc::new(StubExecutor {
            worker_id: worker_id.to_string(),
        })),
    }
}

pub async fn run_worker(config: PathBuf, listen: SocketAddr) -> anyhow::Result<()> {
    let config = load_or_default(&config)?;
    init_tracing(&config.observability.log_level);

    let capabilities: Vec<Capability> = config
        .worker
        .capabilities
        .iter()
        .map(|raw| raw.parse::<Capability>())
        .collect::<Result<_, _>>()
        .map_err(|e| anyhow::anyhow!("worker capabilities: {e}"))?;

    let coord = build_coord_backends(
        &config.stores.coord,
        Duration::from_secs(config.orchestrator.liveness_window_seconds),
    )
    .context("build coordination backends failed")?;
    let registry = Arc::new(RegistryService::new(coord.registry.clone()));

    let endpoint = config
        .worker
        .endpoint
        .clone()
        .unwrap_or_else(|| format!("http://{listen}"));
    let state = Arc::new(WorkerState {
        worker_id: config.worker.id.clone(),
        endpoint,
        capabilities,
        current_subtask: Mutex::new(None),
        completed_count: AtomicU64::new(0),
    });

    registry
        .register(&state.status())
        .await
        .map_err(|e| anyhow::anyhow!("worker registration: {e}"))?;
    info!(worker_id = %state.worker_id, %listen, "worker registered");

    let app_state = AppState {
        state: state.clone(),
        executor: build_executor(&config, &state.worker_id)?,
        result_queue: coord.result_queue.clone(),
        registry: registry.clone(),
    };

    let cancel = CancellationToken::new();
    let heartbeat = tokio::spawn(heartbeat_loop(
        state.clone(),
        registry.clone(),
        Duration::from_secs(config.orchestrator.heartbeat_interval_seconds),
        cancel.clone(),
    ));

    let router = Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/execute", post(execute))
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .context("bind worker listener failed")?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("worker terminated with error")?;

    // Final deregistration is a courtesy; the TTL expires us regardless.
    cancel.cancel();
    let _ = heartbeat.await;
    if let Err(err) = registry.deregister(&state.worker_id).await {
        warn!(error = %err, "worker deregistration failed");
    }
    Ok(())
}

async fn heartbeat_loop(
    state: Arc<WorkerState>,
    registry: Arc<RegistryService>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if let Err(err) = registry.heartbeat(&state.status()).await {
            warn!(error = %err, "heartbeat write failed");
        }
    }
}

async fn health(State(app): State<AppState>) -> Json<serde_json::Value> {
    let status = app.state.status();
    Json(serde_json::json!({
        "status": "healthy",
        "worker_id": status.worker_id,
        "available": status.available,
        "current_subtask": status.current_subtask_id,
    }))
}

async fn status(State(app): State<AppState>) -> Json<WorkerStatus> {
    Json(app.state.status())
}

async fn execute(
    State(app): State<AppState>,
    Json(request): Json<ExecuteRequest>,
) -> impl IntoResponse {
    if !app.state.try_occupy(&request.subtask.id) {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"error": "worker busy"})),
        );
    }

    info!(
        task_id = %request.task_id,
        subtask_id = %request.subtask.id,
        "subtask accepted"
    );
    let worker_id = app.state.worker_id.clone();
    tokio::spawn(execute_async(app, request));

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "accepted",
            "worker_id": worker_id,
        })),
    )
}

async fn execute_async(app: AppState, request: ExecuteRequest) {
    let started = tokio::time::Instant::now();
    let outcome = app.executor.execute(&request).await;
    // The reported execution time must be strictly positive.
    let execution_time = started.elapsed().as_secs_f64().max(0.001);

    let (result, completed) = match outcome {
        Ok(output) => (
            SubTaskResult::completed(
                request.task_id.clone(),
                request.subtask.id.clone(),
                app.state.worker_id.clone(),
                output,
                execution_time,
            ),
            true,
        ),
        Err(error) => {
            error!(
                task_id = %request.task_id,
                subtask_id = %request.subtask.id,
                error = %error,
                "subtask execution failed"
            );
            (
                SubTaskResult::failed(
                    request.task_id.clone(),
                    request.subtask.id.clone(),
                    app.state.worker_id.clone(),
                    error,
                    execution_time,
                ),
                false,
            )
        }
    };

    if let Err(err) = app.result_queue.enqueue(&result).await {
        error!(error = %err, "result enqueue failed");
    }
    app.state.release(completed);

    // Push the availability flip immediately instead of waiting for the
    // next heartbeat tick.
    if let Err(err) = app.registry.heartbeat(&app.state.status()).await {
        warn!(error = %err, "status refresh after completion failed");
    }
    info!(
        task_id = %request.task_id,
        subtask_id = %request.subtask.id,
        execution_time,
        "subtask finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker_state() -> WorkerState {
        WorkerState {
            worker_id: "worker-1".to_string(),
            endpoint: "http://127.0.0.1:8001".to_string(),
            capabilities: vec![Capability::DataAnalysis],
            current_subtask: Mutex::new(None),
            completed_count: AtomicU64::new(0),
        }
    }

    #[test]
    fn test_occupy_release_cycle() {
        let state = worker_state();
        assert!(state.try_occupy("sub_a"));
        assert!(!state.try_occupy("sub_b"), "second claim rejected");

        let status = state.status();
        assert!(!status.available);
        assert_eq!(status.current_subtask_id.as_deref(), Some("sub_a"));

        state.release(true);
        let status = state.status();
        assert!(status.available);
        assert!(status.current_subtask_id.is_none());
        assert_eq!(status.completed_count, 1);
    }

    #[test]
    fn test_failed_execution_does_not_count_as_completed() {
        let state = worker_state();
        assert!(state.try_occupy("sub_a"));
        state.release(false);
        assert_eq!(state.status().completed_count, 0);
    }
}
