//! SubTaskResult - the outcome a worker reports for one subtask.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Terminal outcome of a single subtask execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubTaskOutcome {
    Completed,
    Failed,
}

impl SubTaskOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubTaskOutcome::Completed => "completed",
            SubTaskOutcome::Failed => "failed",
        }
    }
}

/// Output from one subtask execution, produced once by a worker and
/// ingested idempotently by the result processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTaskResult {
    pub task_id: String,
    pub subtask_id: String,
    pub worker_id: String,
    pub outcome: SubTaskOutcome,
    /// Present iff `outcome == Completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Present iff `outcome == Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_seconds: f64,
    pub created_at: DateTime<Utc>,
}

impl SubTaskResult {
    /// Build a successful result.
    pub fn completed(
        task_id: impl Into<String>,
        subtask_id: impl Into<String>,
        worker_id: impl Into<String>,
        output: Value,
        execution_time_seconds: f64,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            subtask_id: subtask_id.into(),
            worker_id: worker_id.into(),
            outcome: SubTaskOutcome::Completed,
            output: Some(output),
            error: None,
            execution_time_seconds,
            created_at: Utc::now(),
        }
    }

    /// Build a failed result.
    pub fn failed(
        task_id: impl Into<String>,
        subtask_id: impl Into<String>,
        worker_id: impl Into<String>,
        error: impl Into<String>,
        execution_time_seconds: f64,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            subtask_id: subtask_id.into(),
            worker_id: worker_id.into(),
            outcome: SubTaskOutcome::Failed,
            output: None,
            error: Some(error.into()),
            execution_time_seconds,
            created_at: Utc::now(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.outcome == SubTaskOutcome::Completed
    }
}
