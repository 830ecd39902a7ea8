//! ActivityEntry - append-only operational log rows.
//!
//! Written by both the orchestrator and workers; kept in the durable store
//! so operators can audit what happened to a task after the fact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Debug,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// One operational log row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub worker_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl ActivityEntry {
    pub fn new(
        worker_id: impl Into<String>,
        task_id: Option<String>,
        level: LogLevel,
        message: impl Into<String>,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            task_id,
            level,
            message: message.into(),
            metadata: None,
            created_at: Utc::now(),
        }
    }

    pub fn info(
        worker_id: impl Into<String>,
        task_id: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(worker_id, task_id, LogLevel::Info, message)
    }

    pub fn warn(
        worker_id: impl Into<String>,
        task_id: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(worker_id, task_id, LogLevel::Warn, message)
    }

    pub fn error(
        worker_id: impl Into<String>,
        task_id: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(worker_id, task_id, LogLevel::Error, message)
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_constructors_set_level() {
        let entry = ActivityEntry::warn("orchestrator", Some("task_a".to_string()), "requeued");
        assert_eq!(entry.level, LogLevel::Warn);
        assert_eq!(entry.task_id.as_deref(), Some("task_a"));
    }

    #[test]
    fn test_metadata_round_trip() {
        let entry = ActivityEntry::info("worker-1", None, "accepted")
            .with_metadata(json!({"subtask_id": "sub_a"}));
        let value = serde_json::to_value(&entry).expect("serialize");
        assert_eq!(value["metadata"]["subtask_id"], "sub_a");
        assert_eq!(value["level"], "info");
    }
}
