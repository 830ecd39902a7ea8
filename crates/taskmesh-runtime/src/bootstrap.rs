//! Bootstrap - build stores, planner, and the runtime app from config.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use taskmesh_config::{PlannerConfig, StoreSpec, TaskmeshConfig};
use taskmesh_core::{
    ActivityLog, Capability, Decomposer, DispatchLedger, Planner, ResultQueue, ResultStore,
    SelectionPolicy, StateStore, StoreError, TaskStore, WorkQueue, WorkerRegistry,
};
use taskmesh_planner::{
    HttpLlmClient, HttpLlmClientConfig, LlmPlanner, LlmPlannerConfig, SingleStepPlanner,
};
use taskmesh_stores::{
    connect_pool, InMemoryActivityLog, InMemoryDispatchLedger, InMemoryResultQueue,
    InMemoryResultStore, InMemoryStateStore, InMemoryTaskStore, InMemoryWorkQueue,
    InMemoryWorkerRegistry, PostgresActivityLog, PostgresResultStore, PostgresTaskStore,
    RedisDispatchLedger, RedisResultQueue, RedisStateStore, RedisWorkQueue, RedisWorkerRegistry,
};

use crate::dispatcher::{Dispatcher, DispatcherConfig};
use crate::registry::RegistryService;
use crate::result_processor::{ResultProcessor, ResultProcessorConfig};
use crate::service::TaskService;
use crate::worker_client::{DispatchError, HttpWorkerClient};

const DEFAULT_PREFIX: &str = "taskmesh";

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("config error: {0}")]
    Config(#[from] taskmesh_config::ConfigError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("unsupported {store} store backend: {backend}")]
    UnsupportedStoreBackend { store: String, backend: String },

    #[error("missing connection url for {store} store")]
    MissingStoreConnectionUrl { store: String },

    #[error("unknown planner mode: {0}")]
    UnknownPlannerMode(String),

    #[error("invalid selection policy: {0}")]
    InvalidSelectionPolicy(String),

    #[error("http client error: {0}")]
    HttpClient(String),
}

impl From<DispatchError> for BootstrapError {
    fn from(err: DispatchError) -> Self {
        BootstrapError::HttpClient(err.to_string())
    }
}

/// The durable-store side: tasks, results, activity logs.
#[derive(Clone)]
pub struct DurableBackends {
    pub task_store: Arc<dyn TaskStore>,
    pub result_store: Arc<dyn ResultStore>,
    pub activity_log: Arc<dyn ActivityLog>,
}

/// The coordination-store side: queues, registry, ledger, shared state.
#[derive(Clone)]
pub struct CoordBackends {
    pub work_queue: Arc<dyn WorkQueue>,
    pub result_queue: Arc<dyn ResultQueue>,
    pub registry: Arc<dyn WorkerRegistry>,
    pub ledger: Arc<dyn DispatchLedger>,
    pub state: Arc<dyn StateStore>,
}

/// Build the durable backends from a store spec.
pub async fn build_durable_backends(spec: &StoreSpec) -> Result<DurableBackends, BootstrapError> {
    match spec.backend.trim().to_ascii_lowercase().as_str() {
        "in_memory" | "memory" => Ok(DurableBackends {
            task_store: Arc::new(InMemoryTaskStore::new()),
            result_store: Arc::new(InMemoryResultStore::new()),
            activity_log: Arc::new(InMemoryActivityLog::new()),
        }),
        "postgres" | "postgresql" | "pgsql" => {
            let url = spec.connection_url.clone().ok_or_else(|| {
                BootstrapError::MissingStoreConnectionUrl {
                    store: "durable".to_string(),
                }
            })?;
            let prefix = spec
                .key_prefix
                .clone()
                .unwrap_or_else(|| DEFAULT_PREFIX.to_string());
            let pool = connect_pool(&url, spec.pool_min, spec.pool_max).await?;
            Ok(DurableBackends {
                task_store: Arc::new(PostgresTaskStore::new(pool.clone(), &prefix).await?),
                result_store: Arc::new(PostgresResultStore::new(pool.clone(), &prefix).await?),
                activity_log: Arc::new(PostgresActivityLog::new(pool, &prefix).await?),
            })
        }
        backend => Err(BootstrapError::UnsupportedStoreBackend {
            store: "durable".to_string(),
            backend: backend.to_string(),
        }),
    }
}

/// Build the coordination backends from a store spec.
pub fn build_coord_backends(
    spec: &StoreSpec,
    liveness_window: Duration,
) -> Result<CoordBackends, BootstrapError> {
    match spec.backend.trim().to_ascii_lowercase().as_str() {
        "in_memory" | "memory" => Ok(CoordBackends {
            work_queue: Arc::new(InMemoryWorkQueue::new()),
            result_queue: Arc::new(InMemoryResultQueue::new()),
            registry: Arc::new(InMemoryWorkerRegistry::new(liveness_window)),
            ledger: Arc::new(InMemoryDispatchLedger::new()),
            state: Arc::new(InMemoryStateStore::new()),
        }),
        "redis" => {
            let url = spec.connection_url.clone().ok_or_else(|| {
                BootstrapError::MissingStoreConnectionUrl {
                    store: "coord".to_string(),
                }
            })?;
            let prefix = spec
                .key_prefix
                .clone()
                .unwrap_or_else(|| DEFAULT_PREFIX.to_string());
            Ok(CoordBackends {
                work_queue: Arc::new(RedisWorkQueue::new(&url, &prefix)?),
                result_queue: Arc::new(RedisResultQueue::new(&url, &prefix)?),
                registry: Arc::new(RedisWorkerRegistry::new(&url, &prefix, liveness_window)?),
                ledger: Arc::new(RedisDispatchLedger::new(&url, &prefix)?),
                state: Arc::new(RedisStateStore::new(&url, &prefix)?),
            })
        }
        backend => Err(BootstrapError::UnsupportedStoreBackend {
            store: "coord".to_string(),
            backend: backend.to_string(),
        }),
    }
}

/// Build the planner from config.
pub fn build_planner(
    config: &PlannerConfig,
    timeout: Duration,
) -> Result<Arc<dyn Planner>, BootstrapError> {
    match config.mode.trim().to_ascii_lowercase().as_str() {
        "llm" => {
            let client = HttpLlmClient::new(HttpLlmClientConfig {
                endpoint: config.endpoint.clone(),
                api_key: config.api_key.clone(),
                timeout_secs: timeout.as_secs().max(1),
            })
            .map_err(|e| BootstrapError::HttpClient(e.to_string()))?;
            Ok(Arc::new(LlmPlanner::new(
                client,
                LlmPlannerConfig {
                    model: config.model.clone(),
                    temperature: config.temperature,
                    timeout,
                },
            )))
        }
        "single_step" => Ok(Arc::new(SingleStepPlanner::new(Capability::CodeGeneration))),
        mode => Err(BootstrapError::UnknownPlannerMode(mode.to_string())),
    }
}

pub fn parse_selection_policy(raw: &str) -> Result<SelectionPolicy, BootstrapError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "intersects" => Ok(SelectionPolicy::Intersects),
        "covers" => Ok(SelectionPolicy::Covers),
        other => Err(BootstrapError::InvalidSelectionPolicy(other.to_string())),
    }
}

/// Fully wired orchestrator runtime.
pub struct RuntimeApp {
    pub config: TaskmeshConfig,
    pub service: Arc<TaskService>,
    pub registry: Arc<RegistryService>,
    pub durable: DurableBackends,
    pub coord: CoordBackends,
    dispatcher: Arc<Dispatcher>,
    result_processor: Arc<ResultProcessor>,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl RuntimeApp {
    /// Build every component from config. Loops are not started yet; call
    /// [`spawn_loops`](Self::spawn_loops).
    pub async fn from_config(config: TaskmeshConfig) -> Result<Self, BootstrapError> {
        let orch = &config.orchestrator;
        let liveness_window = Duration::from_secs(orch.liveness_window_seconds);
        let dequeue_timeout = Duration::from_secs(orch.dequeue_timeout_seconds);
        let selection_policy = parse_selection_policy(&orch.selection_policy)?;

        let durable = build_durable_backends(&config.stores.durable).await?;
        let coord = build_coord_backends(&config.stores.coord, liveness_window)?;
        let planner = build_planner(
            &config.planner,
            Duration::from_secs(orch.planner_timeout_seconds),
        )?;

        let registry = Arc::new(RegistryService::new(coord.registry.clone()));
        let worker_client = Arc::new(HttpWorkerClient::new(Duration::from_secs(
            orch.dispatch_timeout_seconds,
        ))?);

        let service = Arc::new(TaskService::new(
            durable.task_store.clone(),
            durable.result_store.clone(),
            durable.activity_log.clone(),
            coord.work_queue.clone(),
            coord.ledger.clone(),
            Decomposer::new(planner),
            registry.clone(),
        ));

        let dispatcher = Arc::new(Dispatcher::new(
            coord.work_queue.clone(),
            durable.task_store.clone(),
            registry.clone(),
            worker_client,
            durable.activity_log.clone(),
            DispatcherConfig {
                dequeue_timeout,
                selection_policy,
                ..DispatcherConfig::default()
            },
        ));

        let result_processor = Arc::new(ResultProcessor::new(
            coord.result_queue.clone(),
            coord.work_queue.clone(),
            durable.task_store.clone(),
            durable.result_store.clone(),
            coord.ledger.clone(),
            registry.clone(),
            durable.activity_log.clone(),
            ResultProcessorConfig { dequeue_timeout },
        ));

        Ok(Self {
            config,
            service,
            registry,
            durable,
            coord,
            dispatcher,
            result_processor,
            cancel: CancellationToken::new(),
            handles: Vec::new(),
        })
    }

    /// Spawn the configured number of dispatcher and result-processor
    /// instances.
    pub fn spawn_loops(&mut self) {
        let orch = &self.config.orchestrator;
        for _ in 0..orch.dispatcher_concurrency {
            let dispatcher = self.dispatcher.clone();
            let cancel = self.cancel.clone();
            self.handles
                .push(tokio::spawn(async move { dispatcher.run(cancel).await }));
        }
        for _ in 0..orch.result_processor_concurrency {
            let processor = self.result_processor.clone();
            let cancel = self.cancel.clone();
            self.handles
                .push(tokio::spawn(async move { processor.run(cancel).await }));
        }
        info!(
            dispatchers = orch.dispatcher_concurrency,
            result_processors = orch.result_processor_concurrency,
            "orchestrator loops started"
        );
    }

    /// Signal cancellation and wait for every loop to stop.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
        info!("orchestrator loops stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_memory_config() -> TaskmeshConfig {
        let mut config = TaskmeshConfig::default();
        config.planner.mode = "single_step".to_string();
        config
    }

    #[tokio::test]
    async fn test_runtime_app_builds_and_shuts_down() {
        let mut app = RuntimeApp::from_config(in_memory_config()).await.unwrap();
        app.spawn_loops();

        let receipt = app
            .service
            .submit("compute the factorial of ten", None)
            .await
            .unwrap();
        assert_eq!(receipt.subtasks_count, 1);
        assert_eq!(receipt.initial_subtasks_queued, 1);

        app.shutdown().await;
    }

    #[test]
    fn test_parse_selection_policy() {
        assert_eq!(
            parse_selection_policy("intersects").unwrap(),
            SelectionPolicy::Intersects
        );
        assert_eq!(
            parse_selection_policy("COVERS").unwrap(),
            SelectionPolicy::Covers
        );
        assert!(parse_selection_policy("closest").is_err());
    }

    #[test]
    fn test_unknown_backends_are_rejected() {
        tokio_test::block_on(async {
            let mut spec = StoreSpec::default();
            spec.backend = "sqlite".to_string();
            assert!(matches!(
                build_durable_backends(&spec).await,
                Err(BootstrapError::UnsupportedStoreBackend { .. })
            ));
            assert!(matches!(
                build_coord_backends(&spec, Duration::from_secs(60)),
                Err(BootstrapError::UnsupportedStoreBackend { .. })
            ));
        });
    }

    #[test]
    fn test_unknown_planner_mode_is_rejected() {
        let mut planner = PlannerConfig::default();
        planner.mode = "oracle".to_string();
        assert!(matches!(
            build_planner(&planner, Duration::from_secs(5)),
            Err(BootstrapError::UnknownPlannerMode(_))
        ));
    }
}
