//! LLM-backed task decomposition.
//!
//! Builds the decomposition prompt, extracts the JSON array from the model
//! output, and parses it into raw `SubTaskSpec` records. Validation and
//! repair of the records belong to the core Decomposer, not here.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use taskmesh_core::{Capability, PlanError, Planner, SubTaskSpec};

use crate::llm::{LlmClient, LlmRequest};

const MAX_LLM_OUTPUT_LOG_CHARS: usize = 8_000;

fn truncate_for_log(input: &str, max_chars: usize) -> String {
    let char_count = input.chars().count();
    if char_count <= max_chars {
        return input.to_string();
    }
    let mut preview: String = input.chars().take(max_chars).collect();
    preview.push_str(&format!("... [truncated, total_chars={}]", char_count));
    preview
}

/// Planner config for LLM decomposition.
#[derive(Debug, Clone)]
pub struct LlmPlannerConfig {
    pub model: String,
    pub temperature: f32,
    pub timeout: Duration,
}

impl Default for LlmPlannerConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            timeout: Duration::from_secs(30),
        }
    }
}

/// LLM-based planner.
pub struct LlmPlanner<C: LlmClient> {
    pub client: C,
    pub config: LlmPlannerConfig,
}

impl<C: LlmClient> LlmPlanner<C> {
    pub fn new(client: C, config: LlmPlannerConfig) -> Self {
        Self { client, config }
    }

    fn build_prompt(&self, description: &str, vocabulary: &[Capability]) -> (String, String) {
        let caps = vocabulary
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        let mut system = String::new();
        system.push_str(
            "You are the decomposition planner of a distributed multi-agent execution system.\n",
        );
        system.push_str(
            "You break a user task into subtasks suitable for parallel execution by specialized worker agents.\n",
        );
        system.push_str("Return ONLY a JSON array, no explanation.\n");

        let mut user = String::new();
        user.push_str(&format!("Task:\n{}\n\n", description));
        user.push_str(&format!("Available agent capabilities:\n{}\n\n", caps));
        user.push_str("For each subtask, specify:\n");
        user.push_str("1. description (clear, specific, actionable)\n");
        user.push_str("2. required_capabilities (array of 1-3 capabilities from the list above)\n");
        user.push_str(
            "3. dependencies (array of 0-based subtask indices that must complete first, empty array if none)\n",
        );
        user.push_str("4. priority (0-10, higher = more urgent, default 5)\n");
        user.push_str("5. estimated_duration (estimated seconds, or null if unknown)\n\n");
        user.push_str("Example format:\n");
        user.push_str(
            r#"[
  {"description": "Fetch data from API endpoint", "required_capabilities": ["api_integration"], "dependencies": [], "priority": 7, "estimated_duration": 10},
  {"description": "Analyze fetched data statistically", "required_capabilities": ["data_analysis"], "dependencies": [0], "priority": 5, "estimated_duration": 15}
]
"#,
        );
        user.push_str("\nImportant:\n");
        user.push_str("- For simple tasks, return a single subtask\n");
        user.push_str("- Dependencies are 0-based indices into the response array\n");
        user.push_str("- Only use capabilities from the available list\n");
        user.push_str("- Respond with ONLY the JSON array\n");

        (system, user)
    }
}

#[async_trait]
impl<C: LlmClient> Planner for LlmPlanner<C> {
    async fn decompose(
        &self,
        description: &str,
        vocabulary: &[Capability],
    ) -> Result<Vec<SubTaskSpec>, PlanError> {
        let (system, user) = self.build_prompt(description, vocabulary);
        let request = LlmRequest {
            system,
            user,
            model: self.config.model.clone(),
            temperature: self.config.temperature,
        };
        info!(
            model = %self.config.model,
            description_len = description.len(),
            "decomposition request prepared"
        );

        let output = tokio::time::timeout(self.config.timeout, self.client.complete(request))
            .await
            .map_err(|_| PlanError::Timeout(self.config.timeout.as_secs()))?
            .map_err(|e| PlanError::Llm(e.to_string()))?;
        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(
                llm_output = %truncate_for_log(&output, MAX_LLM_OUTPUT_LOG_CHARS),
                "raw decomposition output"
            );
        }

        let json = extract_json_array(&output).ok_or_else(|| {
            PlanError::Generation("LLM output did not contain a JSON array".to_string())
        })?;
        let specs: Vec<SubTaskSpec> = serde_json::from_str(&json)
            .map_err(|e| PlanError::Generation(format!("invalid subtask records: {}", e)))?;

        info!(subtask_count = specs.len(), "decomposition parsed");
        Ok(specs)
    }
}

/// Fixed planner that maps every task to one subtask; used when no LLM
/// backend is configured.
pub struct SingleStepPlanner {
    pub capability: Capability,
}

impl SingleStepPlanner {
    pub fn new(capability: Capability) -> Self {
        Self { capability }
    }
}

#[async_trait]
impl Planner for SingleStepPlanner {
    async fn decompose(
        &self,
        description: &str,
        _vocabulary: &[Capability],
    ) -> Result<Vec<SubTaskSpec>, PlanError> {
        Ok(vec![SubTaskSpec::new(description, vec![self.capability])])
    }
}

/// Find the first balanced JSON array in `text`, skipping brackets inside
/// string literals. Model output often wraps the array in prose or fences.
fn extract_json_array(text: &str) -> Option<String> {
    for (start, ch) in text.char_indices() {
        if ch != '[' {
            continue;
        }
        if let Some(end) = find_array_end(text, start) {
            let candidate = &text[start..=end];
            if serde_json::from_str::<serde_json::Value>(candidate)
                .map(|v| v.is_array())
                .unwrap_or(false)
            {
                return Some(candidate.to_string());
            }
        }
    }
    None
}

fn find_array_end(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text[start..].char_indices() {
        let abs = start + idx;
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '[' => depth += 1,
            ']' => {
                if depth == 0 {
                    return None;
                }
                depth -= 1;
                if depth == 0 {
                    return Some(abs);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    fn planner_with(response: &str) -> LlmPlanner<MockLlmClient> {
        LlmPlanner::new(
            MockLlmClient {
                response: response.to_string(),
            },
            LlmPlannerConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_decompose_parses_records() {
        let planner = planner_with(
            r#"Here is the plan:
[
  {"description": "Fetch data from the source", "required_capabilities": ["web_scraping"], "dependencies": [], "priority": 7, "estimated_duration": 10},
  {"description": "Analyze the fetched data", "required_capabilities": ["data_analysis"], "dependencies": [0]}
]
Done."#,
        );
        let specs = planner
            .decompose("fetch and analyze the data", &Capability::ALL)
            .await
            .unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].priority, 7);
        assert_eq!(specs[1].dependencies, vec![0]);
        assert_eq!(specs[1].priority, 5);
    }

    #[tokio::test]
    async fn test_decompose_rejects_output_without_array()  {
        let planner = planner_with("I could not produce a plan, sorry.");
        let err = planner
            .decompose("fetch and analyze the data", &Capability::ALL)
            .await
            .unwrap_err();
        assert!(matches!(err, PlanError::Generation(_)));
    }

    #[tokio::test]
    async fn test_decompose_rejects_malformed_records() {
        let planner = planner_with(r#"[{"description": 42}]"#);
        let err = planner
            .decompose("fetch and analyze the data", &Capability::ALL)
            .await
            .unwrap_err();
        assert!(matches!(err, PlanError::Generation(_)));
    }

    #[tokio::test]
    async fn test_single_step_planner_emits_one_record() {
        let planner = SingleStepPlanner::new(Capability::CodeGeneration);
        let specs = planner
            .decompose("compute the factorial of ten", &Capability::ALL)
            .await
            .unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].required_capabilities, vec!["code_generation"]);
    }

    #[test]
    fn test_prompt_lists_the_vocabulary() {
        let planner = planner_with("[]");
        let (system, user) = planner.build_prompt("compute the factorial", &Capability::ALL);
        assert!(system.contains("JSON array"));
        assert!(user.contains("data_analysis"));
        assert!(user.contains("api_integration"));
        assert!(user.contains("0-based"));
    }

    #[test]
    fn test_extract_array_ignores_brackets_in_strings() {
        let raw = r#"noise [{"description": "keep ] this"}] trailing"#;
        let json = extract_json_array(raw).expect("array");
        assert_eq!(json, r#"[{"description": "keep ] this"}]"#);
    }

    #[test]
    fn test_extract_array_skips_non_json_brackets() {
        let raw = r#"[not json] then [1, 2, 3]"#;
        let json = extract_json_array(raw).expect("array");
        assert_eq!(json, "[1, 2, 3]");
    }

    #[test]
    fn test_extract_array_handles_nesting() {
        let raw = r#"[[1, 2], [3, [4]]]"#;
        assert_eq!(extract_json_array(raw).expect("array"), raw);
    }
}
