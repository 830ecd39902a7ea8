//! TaskStore trait - durable persistence for task rows.

use async_trait::async_trait;

use super::StoreError;
use crate::types::{Task, TaskState};

/// Durable task persistence. The task row is owned by the orchestrator;
/// updates happen through the narrow methods here rather than blind saves
/// so concurrent result processing cannot lose state.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task row.
    async fn create(&self, task: &Task) -> Result<(), StoreError>;

    /// Load a task by id.
    async fn load(&self, task_id: &str) -> Result<Option<Task>, StoreError>;

    /// Replace the stored subtasks blob (set once by the decomposer).
    async fn set_subtasks(&self, task: &Task) -> Result<(), StoreError>;

    /// Update state plus the aggregate/error columns; refreshes
    /// `updated_at`. `NotFound` when the task does not exist.
    async fn update_state(
        &self,
        task_id: &str,
        state: TaskState,
        aggregate_result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<(), StoreError>;

    /// All tasks currently in `state`, newest first.
    async fn list_by_state(&self, state: TaskState) -> Result<Vec<Task>, StoreError>;
}
