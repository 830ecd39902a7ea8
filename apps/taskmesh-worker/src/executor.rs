//! SubtaskExecutor - how this worker actually performs a subtask.
//!
//! The orchestration contract only cares that an executor turns an
//! execution request into an output blob or an error string; the LLM
//! implementation mirrors the production agents, the stub backs local
//! development and tests.

use async_trait::async_trait;
use serde_json::{json, Value};

use taskmesh_planner::{LlmClient, LlmRequest};
use taskmesh_runtime::ExecuteRequest;

#[async_trait]
pub trait SubtaskExecutor: Send + Sync {
    async fn execute(&self, request: &ExecuteRequest) -> Result<Value, String>;
}

/// Executes subtasks by prompting an LLM with the subtask description and
/// the outputs of its upstream dependencies.
pub struct LlmExecutor<C: LlmClient> {
    pub client: C,
    pub worker_id: String,
    pub model: String,
    pub temperature: f32,
}

impl<C: LlmClient> LlmExecutor<C> {
    pub fn new(client: C, worker_id: impl Into<String>, model: impl Into<String>, temperature: f32) -> Self {
        Self {
            client,
            worker_id: worker_id.into(),
            model: model.into(),
            temperature,
        }
    }

    fn build_prompt(&self, request: &ExecuteRequest) -> (String, String) {
        let caps = request
            .subtask
            .required_capabilities
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        let mut system = String::new();
        system.push_str("You are a specialized worker agent with these capabilities:\n");
        system.push_str(&caps);
        system.push_str("\nExecute the task and reply with the result only.\n");

        let mut user = String::new();
        user.push_str(&format!("Execute this task:\n{}\n", request.subtask.description));
        if !request.subtask.input_data.is_null()
            && request.subtask.input_data != json!({})
        {
            user.push_str(&format!(
                "\nInput data:\n{}\n",
                request.subtask.input_data
            ));
        }
        if request.upstream_context.as_object().is_some_and(|m| !m.is_empty()) {
            user.push_str(&format!(
                "\nOutputs from upstream subtasks:\n{}\n",
                request.upstream_context
            ));
        }
        (system, user)
    }
}

#[async_trait]
impl<C: LlmClient> SubtaskExecutor for LlmExecutor<C> {
    async fn execute(&self, request: &ExecuteRequest) -> Result<Value, String> {
        let (system, user) = self.build_prompt(request);
        let output = self
            .client
            .complete(LlmRequest {
                system,
                user,
                model: self.model.clone(),
                temperature: self.temperature,
            })
            .await
            .map_err(|e| e.to_string())?;

        Ok(json!({
            "success": true,
            "result": output,
            "summary": format!("completed by {}", self.worker_id),
        }))
    }
}

/// Development executor: acknowledges the subtask without doing real work.
pub struct StubExecutor {
    pub worker_id: String,
}

#[async_trait]
impl SubtaskExecutor for StubExecutor {
    async fn execute(&self, request: &ExecuteRequest) -> Result<Value, String> {
        Ok(json!({
            "success": true,
            "result": format!("acknowledged: {}", request.subtask.description),
            "summary": format!("completed by {}", self.worker_id),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskmesh_core::{Capability, SubTask};
    use taskmesh_planner::MockLlmClient;

    fn request() -> ExecuteRequest {
        ExecuteRequest {
            task_id: "task_a".to_string(),
            subtask: SubTask::new(
                "profile the daily numbers",
                vec![Capability::DataAnalysis],
            ),
            upstream_context: json!({"sub_dep": {"rows": 5}}),
        }
    }

    #[tokio::test]
    async fn test_llm_executor_wraps_model_output() {
        let executor = LlmExecutor::new(
            MockLlmClient {
                response: "the mean is 4.5".to_string(),
            },
            "worker-1",
            "gpt-4o-mini",
            0.0,
        );
        let output = executor.execute(&request()).await.unwrap();
        assert_eq!(output["success"], true);
        assert_eq!(output["result"], "the mean is 4.5");
        assert_eq!(output["summary"], "completed by worker-1");
    }

    #[test]
    fn test_prompt_includes_capabilities_and_upstream() {
        let executor = LlmExecutor::new(
            MockLlmClient {
                response: String::new(),
            },
            "worker-1",
            "gpt-4o-mini",
            0.0,
        );
        let (system, user) = executor.build_prompt(&request());
        assert!(system.contains("data_analysis"));
        assert!(user.contains("profile the daily numbers"));
        assert!(user.contains("upstream"));
        assert!(user.contains("rows"));
    }

    #[tokio::test]
    async fn test_stub_executor_acknowledges() {
        let executor = StubExecutor {
            worker_id: "worker-1".to_string(),
        };
        let output = executor.execute(&request()).await.unwrap();
        assert!(output["result"]
            .as_str()
            .expect("result")
            .contains("profile the daily numbers"));
    }
}
