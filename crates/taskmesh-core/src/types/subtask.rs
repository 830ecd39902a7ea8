//! SubTask - the smallest schedulable unit of work.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

use super::Capability;

/// Minimum accepted subtask description length.
pub const SUBTASK_DESCRIPTION_MIN: usize = 10;
/// Maximum accepted subtask description length.
pub const SUBTASK_DESCRIPTION_MAX: usize = 1_000;

/// An individual unit of work within a task, assigned to one worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTask {
    /// Unique within the parent task.
    pub id: String,
    pub description: String,
    /// Non-empty set drawn from the capability vocabulary.
    pub required_capabilities: Vec<Capability>,
    /// Ids of subtasks in the same task that must complete first.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// 0..=10, higher is more urgent.
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_duration_seconds: Option<u32>,
    #[serde(default)]
    pub input_data: Value,
}

fn default_priority() -> u8 {
    5
}

impl SubTask {
    /// Mint a fresh, chronologically sortable subtask id.
    pub fn mint_id() -> String {
        format!("sub_{}", Ulid::new().to_string().to_lowercase())
    }

    /// Create a subtask with a fresh id and no dependencies.
    pub fn new(description: impl Into<String>, required_capabilities: Vec<Capability>) -> Self {
        Self {
            id: Self::mint_id(),
            description: description.into(),
            required_capabilities,
            dependencies: Vec::new(),
            priority: default_priority(),
            estimated_duration_seconds: None,
            input_data: Value::Object(serde_json::Map::new()),
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(10);
        self
    }

    /// Whether this subtask has no upstream dependencies.
    pub fn is_root(&self) -> bool {
        self.dependencies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minted_ids_are_prefixed_and_unique() {
        let a = SubTask::mint_id();
        let b = SubTask::mint_id();
        assert!(a.starts_with("sub_"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_subtask_json_shape() {
        let st = SubTask::new("collect the data set", vec![Capability::WebScraping])
            .with_priority(7)
            .with_dependencies(vec!["sub_x".to_string()]);
        let value = serde_json::to_value(&st).expect("serialize");
        assert_eq!(value["required_capabilities"][0], "web_scraping");
        assert_eq!(value["priority"], 7);
        assert_eq!(value["dependencies"][0], "sub_x");
        // Absent duration is omitted on the wire.
        assert!(value.get("estimated_duration_seconds").is_none());
        assert!(value["input_data"].is_object());
    }

    #[test]
    fn test_priority_is_clamped_into_range() {
        let st = SubTask::new("collect the data set", vec![Capability::WebScraping])
            .with_priority(200);
        assert_eq!(st.priority, 10);
    }
}
