//! TaskService - the narrow task API surface.
//!
//! Thin over the stores and the Decomposer: submit, fetch, cancel, retry,
//! worker listing, activity queries. HTTP binding lives in the server app.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

use taskmesh_core::{
    ActivityEntry, ActivityLog, Capability, DecomposedPlan, Decomposer, DispatchLedger,
    SelectionPolicy, StoreError, SubTaskResult, Task, TaskState, TaskStore, WorkItem, WorkQueue,
    WorkerStatus, TASK_DESCRIPTION_MAX, TASK_DESCRIPTION_MIN,
};
use taskmesh_core::ResultStore;

use crate::registry::RegistryService;
use crate::result_processor::upstream_context_for;

const ORCHESTRATOR_ACTOR: &str = "orchestrator";
const DEFAULT_SUBMITTER: &str = "default_user";

/// API-surface errors with their HTTP mapping decided by the server app.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => ApiError::NotFound(what),
            StoreError::Connection(what) => ApiError::Unavailable(what),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

/// Response to a successful submission.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitReceipt {
    pub task_id: String,
    pub status: String,
    pub subtasks_count: usize,
    pub initial_subtasks_queued: usize,
}

/// Response to a successful manual retry.
#[derive(Debug, Clone, Serialize)]
pub struct RetryReceipt {
    pub task_id: String,
    pub status: String,
    pub requeued_subtasks: usize,
}

/// Full task view: the row plus every stored subtask result.
#[derive(Debug, Clone, Serialize)]
pub struct TaskDetails {
    pub task: Task,
    pub subtask_results: Vec<SubTaskResult>,
}

pub struct TaskService {
    task_store: Arc<dyn TaskStore>,
    result_store: Arc<dyn ResultStore>,
    activity_log: Arc<dyn ActivityLog>,
    work_queue: Arc<dyn WorkQueue>,
    ledger: Arc<dyn DispatchLedger>,
    decomposer: Decomposer,
    registry: Arc<RegistryService>,
}

impl TaskService {
    pub fn new(
        task_store: Arc<dyn TaskStore>,
        result_store: Arc<dyn ResultStore>,
        activity_log: Arc<dyn ActivityLog>,
        work_queue: Arc<dyn WorkQueue>,
        ledger: Arc<dyn DispatchLedger>,
        decomposer: Decomposer,
        registry: Arc<RegistryService>,
    ) -> Self {
        Self {
            task_store,
            result_store,
            activity_log,
            work_queue,
            ledger,
            decomposer,
            registry,
        }
    }

    /// Submit a task: validate, persist, decompose, queue the initial
    /// ready set, move to `Running` if anything was queued.
    pub async fn submit(
        &self,
        description: &str,
        submitter_id: Option<String>,
    ) -> Result<SubmitReceipt, ApiError> {
        let description = description.trim();
        let char_count = description.chars().count();
        if !(TASK_DESCRIPTION_MIN..=TASK_DESCRIPTION_MAX).contains(&char_count) {
            return Err(ApiError::InvalidArgument(format!(
                "description must be {}..{} characters, got {}",
                TASK_DESCRIPTION_MIN, TASK_DESCRIPTION_MAX, char_count
            )));
        }

        let mut task = Task::new(
            submitter_id.unwrap_or_else(|| DEFAULT_SUBMITTER.to_string()),
            description,
        );
        self.task_store.create(&task).await?;

        let plan = self.decomposer.decompose(description).await;
        task.set_subtasks(plan.subtasks.clone());
        self.task_store.set_subtasks(&task).await?;

        let queued = self.enqueue_initial(&task, &plan).await?;
        if queued > 0 {
            self.task_store
                .update_state(&task.id, TaskState::Running, None, None)
                .await?;
        }

        info!(
            task_id = %task.id,
            subtasks = plan.subtasks.len(),
            queued,
            fallback = plan.fallback,
            "task submitted"
        );
        self.log_activity(
            ActivityEntry::info(
                ORCHESTRATOR_ACTOR,
                Some(task.id.clone()),
                format!("task submitted with {} subtasks", plan.subtasks.len()),
            )
            .with_metadata(json!({"queued": queued, "fallback": plan.fallback})),
        )
        .await;

        Ok(SubmitReceipt {
            task_id: task.id,
            status: "created".to_string(),
            subtasks_count: plan.subtasks.len(),
            initial_subtasks_queued: queued,
        })
    }

    /// Initial ready set, already priority-ordered by the decomposer.
    async fn enqueue_initial(
        &self,
        task: &Task,
        plan: &DecomposedPlan,
    ) -> Result<usize, ApiError> {
        let mut queued = 0usize;
        for subtask_id in &plan.initial_ready {
            let Some(subtask) = task.subtask(subtask_id) else {
                continue;
            };
            if !self.ledger.mark_enqueued(&task.id, subtask_id).await? {
                continue;
            }
            let item = WorkItem::new(
                task.id.clone(),
                subtask.clone(),
                serde_json::Value::Object(serde_json::Map::new()),
            );
            self.work_queue.enqueue(&item).await?;
            queued += 1;
        }
        Ok(queued)
    }

    /// List tasks currently in `state`, newest first.
    pub async fn list_tasks(&self, state: TaskState) -> Result<Vec<Task>, ApiError> {
        Ok(self.task_store.list_by_state(state).await?)
    }

    /// Fetch the task row plus all subtask results; 404 when unknown.
    pub async fn get_task(&self, task_id: &str) -> Result<TaskDetails, ApiError> {
        let task = self
            .task_store
            .load(task_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("task {task_id}")))?;
        let subtask_results = self.result_store.list_for_task(task_id).await?;
        Ok(TaskDetails {
            task,
            subtask_results,
        })
    }

    /// Cancel a pending or running task. In-flight subtasks are not
    /// interrupted; their results are recorded without advancing the DAG.
    pub async fn cancel(&self, task_id: &str) -> Result<(), ApiError> {
        let task = self
            .task_store
            .load(task_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("task {task_id}")))?;
        if !task.state.can_transition_to(TaskState::Cancelled) {
            return Err(ApiError::Conflict(format!(
                "cannot cancel task in state {}",
                task.state.as_str()
            )));
        }

        self.task_store
            .update_state(task_id, TaskState::Cancelled, None, None)
            .await?;
        info!(task_id, "task cancelled");
        self.log_activity(ActivityEntry::info(
            ORCHESTRATOR_ACTOR,
            Some(task_id.to_string()),
            "task cancelled",
        ))
        .await;
        Ok(())
    }

    /// Manual retry: re-enqueue the failed subtasks of a `Failed` task
    /// (resetting it to `Running`), or the stuck in-flight subtasks of a
    /// `Running` task whose worker died. Successors become ready the
    /// normal way once the retried subtasks complete. The superseded
    /// failed rows are recorded in the activity log for audit.
    pub async fn retry(&self, task_id: &str) -> Result<RetryReceipt, ApiError> {
        let task = self
            .task_store
            .load(task_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("task {task_id}")))?;
        if task.state != TaskState::Failed && task.state != TaskState::Running {
            return Err(ApiError::Conflict(format!(
                "cannot retry task in state {}",
                task.state.as_str()
            )));
        }

        let all_results = self.result_store.list_for_task(task_id).await?;
        let completed: std::collections::HashSet<&str> = all_results
            .iter()
            .filter(|r| r.is_completed())
            .map(|r| r.subtask_id.as_str())
            .collect();
        // Failed subtasks, plus subtasks that were dispatchable (every
        // dependency completed) yet never produced a result - the
        // signature of a worker that died mid-flight.
        let failed_ids: Vec<String> = task
            .subtasks
            .iter()
            .filter(|st| {
                let has_failed = all_results
                    .iter()
                    .any(|r| r.subtask_id == st.id && !r.is_completed());
                let stuck = !all_results.iter().any(|r| r.subtask_id == st.id)
                    && st.dependencies.iter().all(|d| completed.contains(d.as_str()));
                has_failed || stuck
            })
            .map(|st| st.id.clone())
            .collect();

        for result in all_results.iter().filter(|r| !r.is_completed()) {
            self.log_activity(
                ActivityEntry::warn(
                    ORCHESTRATOR_ACTOR,
                    Some(task_id.to_string()),
                    format!(
                        "retry supersedes failed result of subtask {} from {}",
                        result.subtask_id, result.worker_id
                    ),
                )
                .with_metadata(json!({
                    "subtask_id": result.subtask_id,
                    "worker_id": result.worker_id,
                    "error": result.error,
                })),
            )
            .await;
        }

        self.ledger.clear(task_id, &failed_ids).await?;
        if task.state == TaskState::Failed {
            self.task_store
                .update_state(task_id, TaskState::Running, None, None)
                .await?;
        }

        let mut requeued = 0usize;
        for subtask_id in &failed_ids {
            let Some(subtask) = task.subtask(subtask_id) else {
                continue;
            };
            if !self.ledger.mark_enqueued(task_id, subtask_id).await? {
                continue;
            }
            let context = upstream_context_for(subtask, &all_results);
            let item = WorkItem::new(task_id.to_string(), subtask.clone(), context);
            self.work_queue.enqueue(&item).await?;
            requeued += 1;
        }

        info!(task_id, requeued, "task retried");
        Ok(RetryReceipt {
            task_id: task_id.to_string(),
            status: "retrying".to_string(),
            requeued_subtasks: requeued,
        })
    }

    /// Registry snapshot of all live workers.
    pub async fn list_workers(&self) -> Result<Vec<WorkerStatus>, ApiError> {
        Ok(self.registry.snapshot().await?)
    }

    /// Ids of live, available workers, optionally filtered by capability.
    pub async fn list_available_workers(
        &self,
        capability: Option<Capability>,
    ) -> Result<Vec<String>, ApiError> {
        let required: Vec<Capability> = capability.into_iter().collect();
        let workers = self
            .registry
            .available_for(&required, SelectionPolicy::Intersects)
            .await?;
        Ok(workers.into_iter().map(|w| w.worker_id).collect())
    }

    /// Recent activity log entries, newest first.
    pub async fn recent_activity(
        &self,
        worker_id: Option<&str>,
        task_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ActivityEntry>, ApiError> {
        Ok(self
            .activity_log
            .recent(worker_id, task_id, limit.clamp(1, 1_000))
            .await?)
    }

    async fn log_activity(&self, entry: ActivityEntry) {
        if let Err(err) = self.activity_log.append(&entry).await {
            warn!(error = %err, "activity log append failed");
        }
    }
}
