//! # Taskmesh Config
//!
//! Unified single-file configuration management for taskmesh. One
//! `taskmesh.yaml` configures the orchestrator knobs, store backends,
//! planner/LLM settings, worker identity, and observability for both the
//! server and worker binaries.

mod loader;

pub use loader::{load_config, ConfigError};

use serde::Deserialize;

/// Top-level configuration schema.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskmeshConfig {
    /// Config schema version.
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub stores: StoresConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

fn default_version() -> u32 {
    1
}

impl Default for TaskmeshConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            app: AppConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            stores: StoresConfig::default(),
            planner: PlannerConfig::default(),
            worker: WorkerConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_env")]
    pub environment: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            environment: default_env(),
        }
    }
}

fn default_app_name() -> String {
    "taskmesh".to_string()
}

fn default_env() -> String {
    "development".to_string()
}

/// Orchestration knobs; every default matches the documented contract.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_liveness_window")]
    pub liveness_window_seconds: u64,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_seconds: u64,
    #[serde(default = "default_dispatch_timeout")]
    pub dispatch_timeout_seconds: u64,
    #[serde(default = "default_dequeue_timeout")]
    pub dequeue_timeout_seconds: u64,
    #[serde(default = "default_one")]
    pub dispatcher_concurrency: usize,
    #[serde(default = "default_one")]
    pub result_processor_concurrency: usize,
    #[serde(default = "default_planner_timeout")]
    pub planner_timeout_seconds: u64,
    /// `intersects` (worker shares at least one required capability) or
    /// `covers` (worker capabilities are a superset).
    #[serde(default = "default_selection_policy")]
    pub selection_policy: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            liveness_window_seconds: default_liveness_window(),
            heartbeat_interval_seconds: default_heartbeat_interval(),
            dispatch_timeout_seconds: default_dispatch_timeout(),
            dequeue_timeout_seconds: default_dequeue_timeout(),
            dispatcher_concurrency: default_one(),
            result_processor_concurrency: default_one(),
            planner_timeout_seconds: default_planner_timeout(),
            selection_policy: default_selection_policy(),
        }
    }
}

fn default_liveness_window() -> u64 {
    60
}

fn default_heartbeat_interval() -> u64 {
    10
}

fn default_dispatch_timeout() -> u64 {
    5
}

fn default_dequeue_timeout() -> u64 {
    1
}

fn default_one() -> usize {
    1
}

fn default_planner_timeout() -> u64 {
    30
}

fn default_selection_policy() -> String {
    "intersects".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StoresConfig {
    /// Durable store: `in_memory` or `postgres`.
    #[serde(default)]
    pub durable: StoreSpec,
    /// Coordination store: `in_memory` or `redis`.
    #[serde(default)]
    pub coord: StoreSpec,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSpec {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub connection_url: Option<String>,
    /// Key prefix (Redis) or table prefix (PostgreSQL).
    #[serde(default)]
    pub key_prefix: Option<String>,
    #[serde(default = "default_pool_min")]
    pub pool_min: u32,
    #[serde(default = "default_pool_max")]
    pub pool_max: u32,
}

impl Default for StoreSpec {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            connection_url: None,
            key_prefix: None,
            pool_min: default_pool_min(),
            pool_max: default_pool_max(),
        }
    }
}

fn default_backend() -> String {
    "in_memory".to_string()
}

fn default_pool_min() -> u32 {
    2
}

fn default_pool_max() -> u32 {
    20
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlannerConfig {
    /// `llm` or `single_step`.
    #[serde(default = "default_planner_mode")]
    pub mode: String,
    #[serde(default = "default_planner_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_planner_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: f32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            mode: default_planner_mode(),
            endpoint: default_planner_endpoint(),
            api_key: None,
            model: default_planner_model(),
            temperature: 0.0,
        }
    }
}

fn default_planner_mode() -> String {
    "llm".to_string()
}

fn default_planner_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_planner_model() -> String {
    "gpt-4o-mini".to_string()
}

/// Identity and surface of one worker process.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_worker_id")]
    pub id: String,
    #[serde(default = "default_worker_listen")]
    pub listen: String,
    /// Address the orchestrator should dial; defaults to the listen address.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_worker_capabilities")]
    pub capabilities: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            id: default_worker_id(),
            listen: default_worker_listen(),
            endpoint: None,
            capabilities: default_worker_capabilities(),
        }
    }
}

fn default_worker_id() -> String {
    "worker-1".to_string()
}

fn default_worker_listen() -> String {
    "127.0.0.1:8001".to_string()
}

fn default_worker_capabilities() -> Vec<String> {
    vec!["data_analysis".to_string(), "code_generation".to_string()]
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_file: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
