//! Task type definitions
//!
//! Task represents a user submission together with its decomposition and
//! terminal outcome. The row is owned exclusively by the orchestrator;
//! workers only ever produce `SubTaskResult` messages.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use ulid::Ulid;

use super::SubTask;

/// Minimum accepted task description length.
pub const TASK_DESCRIPTION_MIN: usize = 10;
/// Maximum accepted task description length.
pub const TASK_DESCRIPTION_MAX: usize = 5_000;

/// Task lifecycle state machine.
///
/// `Pending → Running → {Completed, Failed}`; `{Pending, Running} → Cancelled`;
/// `Failed → Running` only through the manual retry path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    /// Wire form of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        }
    }

    /// Whether the transition `self → next` is legal.
    ///
    /// Retry (`Failed → Running`) is listed here because it is an explicit
    /// operator action; all other transitions out of a terminal state are
    /// rejected.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (TaskState::Pending, TaskState::Running)
                | (TaskState::Pending, TaskState::Cancelled)
                | (TaskState::Running, TaskState::Completed)
                | (TaskState::Running, TaskState::Failed)
                | (TaskState::Running, TaskState::Cancelled)
                | (TaskState::Failed, TaskState::Running)
        )
    }
}

/// Raised when a wire string does not name a task state.
#[derive(Debug, Clone, Error)]
#[error("unknown task state: {0}")]
pub struct UnknownTaskState(pub String);

impl FromStr for TaskState {
    type Err = UnknownTaskState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "pending" => Ok(TaskState::Pending),
            "running" => Ok(TaskState::Running),
            "completed" => Ok(TaskState::Completed),
            "failed" => Ok(TaskState::Failed),
            "cancelled" => Ok(TaskState::Cancelled),
            other => Err(UnknownTaskState(other.to_string())),
        }
    }
}

/// A user-submitted work request, decomposed into a DAG of subtasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Globally unique, chronologically sortable.
    pub id: String,
    pub submitter_id: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub state: TaskState,
    #[serde(default)]
    pub subtasks: Vec<SubTask>,
    /// Present iff `state == Completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate_result: Option<Value>,
    /// Present iff `state == Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Task {
    /// Mint a fresh, chronologically sortable task id.
    pub fn mint_id() -> String {
        format!("task_{}", Ulid::new().to_string().to_lowercase())
    }

    /// Create a new pending task without subtasks.
    pub fn new(submitter_id: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Self::mint_id(),
            submitter_id: submitter_id.into(),
            description: description.into(),
            created_at: now,
            updated_at: now,
            state: TaskState::Pending,
            subtasks: Vec::new(),
            aggregate_result: None,
            error: None,
        }
    }

    /// Attach the decomposed subtasks.
    pub fn set_subtasks(&mut self, subtasks: Vec<SubTask>) {
        self.subtasks = subtasks;
        self.updated_at = Utc::now();
    }

    /// Look up a subtask by id.
    pub fn subtask(&self, subtask_id: &str) -> Option<&SubTask> {
        self.subtasks.iter().find(|st| st.id == subtask_id)
    }

    pub fn start_running(&mut self) {
        self.set_state(TaskState::Running);
    }

    /// Terminal success; the aggregate is mandatory by invariant.
    pub fn complete(&mut self, aggregate_result: Value) {
        self.aggregate_result = Some(aggregate_result);
        self.error = None;
        self.set_state(TaskState::Completed);
    }

    /// Terminal failure; the error message is mandatory by invariant.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
        self.aggregate_result = None;
        self.set_state(TaskState::Failed);
    }

    pub fn cancel(&mut self) {
        self.set_state(TaskState::Cancelled);
    }

    /// Reset a failed task for the manual retry path.
    pub fn reset_for_retry(&mut self) {
        self.error = None;
        self.set_state(TaskState::Running);
    }

    fn set_state(&mut self, state: TaskState) {
        self.state = state;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_ids_sort_chronologically() {
        let earlier = Task::mint_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let later = Task::mint_id();
        assert!(earlier < later);
    }

    #[test]
    fn test_state_transition_table() {
        assert!(TaskState::Pending.can_transition_to(TaskState::Running));
        assert!(TaskState::Pending.can_transition_to(TaskState::Cancelled));
        assert!(TaskState::Running.can_transition_to(TaskState::Completed));
        assert!(TaskState::Running.can_transition_to(TaskState::Failed));
        assert!(TaskState::Running.can_transition_to(TaskState::Cancelled));
        assert!(TaskState::Failed.can_transition_to(TaskState::Running));

        assert!(!TaskState::Pending.can_transition_to(TaskState::Completed));
        assert!(!TaskState::Completed.can_transition_to(TaskState::Running));
        assert!(!TaskState::Cancelled.can_transition_to(TaskState::Running));
        assert!(!TaskState::Failed.can_transition_to(TaskState::Completed));
    }

    #[test]
    fn test_terminal_states() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Running.is_terminal());
    }

    #[test]
    fn test_complete_sets_aggregate_and_clears_error() {
        let mut task = Task::new("user-1", "compute the factorial of ten");
        task.start_running();
        task.complete(json!({"summary": "all completed"}));
        assert_eq!(task.state, TaskState::Completed);
        assert!(task.aggregate_result.is_some());
        assert!(task.error.is_none());
    }

    #[test]
    fn test_fail_sets_error_and_clears_aggregate() {
        let mut task = Task::new("user-1", "compute the factorial of ten");
        task.start_running();
        task.fail("subtask sub_a failed");
        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.error.as_deref(), Some("subtask sub_a failed"));
        assert!(task.aggregate_result.is_none());
        assert!(task.updated_at >= task.created_at);
    }

    #[test]
    fn test_retry_reset_clears_error() {
        let mut task = Task::new("user-1", "compute the factorial of ten");
        task.start_running();
        task.fail("boom");
        task.reset_for_retry();
        assert_eq!(task.state, TaskState::Running);
        assert!(task.error.is_none());
    }

    #[test]
    fn test_state_serde_is_lowercase() {
        assert_eq!(
            serde_json::to_string(&TaskState::Running).expect("serialize"),
            "\"running\""
        );
    }

    #[test]
    fn test_state_round_trips_through_wire_form() {
        for state in [
            TaskState::Pending,
            TaskState::Running,
            TaskState::Completed,
            TaskState::Failed,
            TaskState::Cancelled,
        ] {
            assert_eq!(state.as_str().parse::<TaskState>().expect("parse"), state);
        }
        assert!("sleeping".parse::<TaskState>().is_err());
    }
}
