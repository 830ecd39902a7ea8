//! Planner module
//!
//! The Planner is the external call boundary that turns a free-form task
//! description into a list of subtask records. Implementations can use
//! different LLM backends or fixed strategies.
//!
//! The Planner does NOT handle:
//! - Id assignment or dependency rewriting
//! - Validation of the returned records
//! Those belong to the [`Decomposer`](crate::decomposer::Decomposer).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Capability;

/// Planner errors. Every variant triggers the single-subtask fallback in
/// the Decomposer; none of them fails a submission.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("llm error: {0}")]
    Llm(String),

    #[error("planner output could not be parsed: {0}")]
    Generation(String),

    #[error("planner call timed out after {0}s")]
    Timeout(u64),
}

/// One planned subtask record, exactly as the Planner emits it.
///
/// `dependencies` are 0-based indices into the same record list, referencing
/// earlier entries. Capabilities are raw wire strings here; unknown ones are
/// filtered out during normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTaskSpec {
    pub description: String,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<usize>,
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default)]
    pub estimated_duration: Option<i64>,
}

fn default_priority() -> i64 {
    5
}

impl SubTaskSpec {
    pub fn new(description: impl Into<String>, required_capabilities: Vec<Capability>) -> Self {
        Self {
            description: description.into(),
            required_capabilities: required_capabilities
                .iter()
                .map(|c| c.as_str().to_string())
                .collect(),
            dependencies: Vec::new(),
            priority: default_priority(),
            estimated_duration: None,
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<usize>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }
}

/// Planner trait - decomposes a task description into subtask records.
#[async_trait]
pub trait Planner: Send + Sync {
    /// Decompose `description`, choosing capabilities from `vocabulary`.
    async fn decompose(
        &self,
        description: &str,
        vocabulary: &[Capability],
    ) -> Result<Vec<SubTaskSpec>, PlanError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_defaults_apply_on_sparse_json() {
        let spec: SubTaskSpec = serde_json::from_str(
            r#"{"description": "fetch the data", "required_capabilities": ["web_scraping"]}"#,
        )
        .expect("deserialize");
        assert_eq!(spec.priority, 5);
        assert!(spec.dependencies.is_empty());
        assert!(spec.estimated_duration.is_none());
    }
}
