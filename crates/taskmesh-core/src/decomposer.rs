//! Decomposer - the stability core of task submission.
//!
//! Wraps the Planner and turns its raw records into a validated DAG of
//! subtasks: fresh ids, index dependencies rewritten to id form, priorities
//! clamped, duplicate and self dependencies dropped, unknown capabilities
//! filtered, acyclicity verified. Any defect the normalization cannot
//! repair degrades to the single-subtask fallback plan, so submission
//! itself never fails on planner trouble.

use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use crate::dag::{DagError, TaskDag};
use crate::planner::{Planner, SubTaskSpec};
use crate::types::{
    Capability, SubTask, SUBTASK_DESCRIPTION_MAX, SUBTASK_DESCRIPTION_MIN,
};

/// Capability assigned to the fallback subtask when decomposition fails.
pub const FALLBACK_CAPABILITY: Capability = Capability::CodeGeneration;

/// Normalization errors. These never surface to the submitter; they select
/// the fallback path and are logged at WARN.
#[derive(Debug, Error)]
pub enum DecomposeError {
    #[error("bad plan: {0}")]
    BadPlan(String),

    #[error("cyclic plan: {0}")]
    Cyclic(String),
}

impl From<DagError> for DecomposeError {
    fn from(err: DagError) -> Self {
        match err {
            DagError::CycleDetected(id) => DecomposeError::Cyclic(id),
            other => DecomposeError::BadPlan(other.to_string()),
        }
    }
}

/// A validated decomposition ready for persistence and dispatch.
#[derive(Debug, Clone)]
pub struct DecomposedPlan {
    pub subtasks: Vec<SubTask>,
    pub dag: TaskDag,
    /// Ids of the initial ready set, priority-descending; declaration order
    /// breaks ties (stable).
    pub initial_ready: Vec<String>,
    /// Whether the fallback plan was used.
    pub fallback: bool,
}

/// Turns a task description into a DAG of subtasks via the Planner.
pub struct Decomposer {
    planner: Arc<dyn Planner>,
}

impl Decomposer {
    pub fn new(planner: Arc<dyn Planner>) -> Self {
        Self { planner }
    }

    /// Decompose a validated task description. Infallible: planner errors
    /// and unrepairable plans degrade to the fallback plan.
    pub async fn decompose(&self, description: &str) -> DecomposedPlan {
        let specs = match self.planner.decompose(description, &Capability::ALL).await {
            Ok(specs) => specs,
            Err(err) => {
                warn!(error = %err, "planner call failed, using fallback plan");
                return fallback_plan(description);
            }
        };

        match normalize_plan(specs) {
            Ok(plan) => plan,
            Err(err) => {
                warn!(error = %err, "planner output rejected, using fallback plan");
                fallback_plan(description)
            }
        }
    }
}

/// Normalize raw planner records into a validated plan.
pub fn normalize_plan(specs: Vec<SubTaskSpec>) -> Result<DecomposedPlan, DecomposeError> {
    if specs.is_empty() {
        return Err(DecomposeError::BadPlan(
            "planner returned no subtasks".to_string(),
        ));
    }

    // First pass: validate each record independently and mint ids.
    // `index_to_id[i]` is None for dropped records.
    let mut index_to_id: Vec<Option<String>> = vec![None; specs.len()];
    let mut subtasks: Vec<(usize, SubTask)> = Vec::with_capacity(specs.len());

    for (idx, spec) in specs.iter().enumerate() {
        let capabilities = parse_capabilities(&spec.required_capabilities);
        let description = truncate_chars(spec.description.trim(), SUBTASK_DESCRIPTION_MAX);
        if capabilities.is_empty() || description.chars().count() < SUBTASK_DESCRIPTION_MIN {
            warn!(index = idx, "dropping invalid subtask record from plan");
            continue;
        }

        let subtask = SubTask {
            id: SubTask::mint_id(),
            description,
            required_capabilities: capabilities,
            dependencies: Vec::new(),
            priority: spec.priority.clamp(0, 10) as u8,
            estimated_duration_seconds: spec
                .estimated_duration
                .filter(|secs| *secs > 0)
                .map(|secs| secs.min(u32::MAX as i64) as u32),
            input_data: serde_json::Value::Object(serde_json::Map::new()),
        };
        index_to_id[idx] = Some(subtask.id.clone());
        subtasks.push((idx, subtask));
    }

    if subtasks.is_empty() {
        return Err(DecomposeError::BadPlan(
            "no valid subtask records in plan".to_string(),
        ));
    }

    // Second pass: rewrite index dependencies to id form. Out-of-range
    // indices are ignored; a dependency on a dropped record invalidates the
    // whole plan, since running the dependent without it would be wrong.
    for (idx, subtask) in subtasks.iter_mut() {
        let spec = &specs[*idx];
        let mut deps: Vec<String> = Vec::new();
        for dep_idx in &spec.dependencies {
            if *dep_idx == *idx || *dep_idx >= index_to_id.len() {
                continue;
            }
            match &index_to_id[*dep_idx] {
                Some(dep_id) => {
                    if !deps.contains(dep_id) {
                        deps.push(dep_id.clone());
                    }
                }
                None => {
                    return Err(DecomposeError::BadPlan(format!(
                        "subtask {idx} depends on dropped record {dep_idx}"
                    )));
                }
            }
        }
        subtask.dependencies = deps;
    }

    let subtasks: Vec<SubTask> = subtasks.into_iter().map(|(_, st)| st).collect();
    let dag = TaskDag::build(&subtasks)?;
    let initial_ready = order_by_priority(&subtasks, dag.initial_ready());

    Ok(DecomposedPlan {
        subtasks,
        dag,
        initial_ready,
        fallback: false,
    })
}

/// The conservative single-subtask plan used when decomposition fails.
pub fn fallback_plan(description: &str) -> DecomposedPlan {
    let subtask = SubTask::new(
        truncate_chars(description, SUBTASK_DESCRIPTION_MAX),
        vec![FALLBACK_CAPABILITY],
    );
    let dag = TaskDag::singleton(&subtask);
    let initial_ready = vec![subtask.id.clone()];
    DecomposedPlan {
        subtasks: vec![subtask],
        dag,
        initial_ready,
        fallback: true,
    }
}

fn parse_capabilities(raw: &[String]) -> Vec<Capability> {
    let mut out = Vec::new();
    for cap in raw {
        match cap.parse::<Capability>() {
            Ok(parsed) => {
                if !out.contains(&parsed) {
                    out.push(parsed);
                }
            }
            Err(err) => warn!(error = %err, "ignoring unknown capability in plan"),
        }
    }
    out
}

/// Stable sort: priority descending, declaration order as tie-break.
fn order_by_priority(subtasks: &[SubTask], ready: Vec<String>) -> Vec<String> {
    let priority_of = |id: &str| {
        subtasks
            .iter()
            .find(|st| st.id == id)
            .map(|st| st.priority)
            .unwrap_or(0)
    };
    let mut ordered = ready;
    ordered.sort_by_key(|id| std::cmp::Reverse(priority_of(id)));
    ordered
}

fn truncate_chars(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    input.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::PlanError;
    use async_trait::async_trait;

    struct ScriptedPlanner {
        response: Result<Vec<SubTaskSpec>, PlanError>,
    }

    #[async_trait]
    impl Planner for ScriptedPlanner {
        async fn decompose(
            &self,
            _description: &str,
            _vocabulary: &[Capability],
        ) -> Result<Vec<SubTaskSpec>, PlanError> {
            match &self.response {
                Ok(specs) => Ok(specs.clone()),
                Err(err) => Err(PlanError::Llm(err.to_string())),
            }
        }
    }

    fn spec(description: &str, caps: &[&str], deps: &[usize]) -> SubTaskSpec {
        SubTaskSpec {
            description: description.to_string(),
            required_capabilities: caps.iter().map(|c| c.to_string()).collect(),
            dependencies: deps.to_vec(),
            priority: 5,
            estimated_duration: None,
        }
    }

    #[tokio::test]
    async fn test_planner_error_triggers_fallback() {
        let decomposer = Decomposer::new(Arc::new(ScriptedPlanner {
            response: Err(PlanError::Llm("unreachable".to_string())),
        }));
        let plan = decomposer.decompose("compute the factorial of ten").await;
        assert!(plan.fallback);
        assert_eq!(plan.subtasks.len(), 1);
        assert_eq!(
            plan.subtasks[0].required_capabilities,
            vec![FALLBACK_CAPABILITY]
        );
        assert_eq!(plan.subtasks[0].priority, 5);
        assert!(plan.subtasks[0].dependencies.is_empty());
        assert_eq!(plan.initial_ready, vec![plan.subtasks[0].id.clone()]);
    }

    #[tokio::test]
    async fn test_two_step_chain_rewrites_index_dependencies() {
        let decomposer = Decomposer::new(Arc::new(ScriptedPlanner {
            response: Ok(vec![
                spec("fetch the source data", &["web_scraping"], &[]),
                spec("analyze the fetched data", &["data_analysis"], &[0]),
            ]),
        }));
        let plan = decomposer.decompose("fetch and analyze the data").await;
        assert!(!plan.fallback);
        assert_eq!(plan.subtasks.len(), 2);
        assert_eq!(
            plan.subtasks[1].dependencies,
            vec![plan.subtasks[0].id.clone()]
        );
        assert_eq!(plan.initial_ready, vec![plan.subtasks[0].id.clone()]);
    }

    #[test]
    fn test_empty_plan_is_rejected() {
        assert!(matches!(
            normalize_plan(Vec::new()),
            Err(DecomposeError::BadPlan(_))
        ));
    }

    #[test]
    fn test_unknown_capabilities_drop_the_record_only() {
        let plan = normalize_plan(vec![
            spec("fetch the source data", &["web_scraping"], &[]),
            spec("sing a little song", &["karaoke"], &[]),
        ])
        .expect("plan");
        assert_eq!(plan.subtasks.len(), 1);
        assert_eq!(
            plan.subtasks[0].required_capabilities,
            vec![Capability::WebScraping]
        );
    }

    #[test]
    fn test_all_records_invalid_is_rejected() {
        let err = normalize_plan(vec![spec("sing a little song", &["karaoke"], &[])])
            .unwrap_err();
        assert!(matches!(err, DecomposeError::BadPlan(_)));
    }

    #[test]
    fn test_dependency_on_dropped_record_is_rejected() {
        let err = normalize_plan(vec![
            spec("sing a little song", &["karaoke"], &[]),
            spec("analyze the fetched data", &["data_analysis"], &[0]),
        ])
        .unwrap_err();
        assert!(matches!(err, DecomposeError::BadPlan(_)));
    }

    #[test]
    fn test_self_and_duplicate_dependencies_are_dropped() {
        let plan = normalize_plan(vec![
            spec("fetch the source data", &["web_scraping"], &[]),
            spec("analyze the fetched data", &["data_analysis"], &[0, 0, 1]),
        ])
        .expect("plan");
        assert_eq!(
            plan.subtasks[1].dependencies,
            vec![plan.subtasks[0].id.clone()]
        );
    }

    #[test]
    fn test_cycle_is_rejected_as_cyclic() {
        let err = normalize_plan(vec![
            spec("step one of the pipeline", &["code_generation"], &[1]),
            spec("step two of the pipeline", &["code_generation"], &[0]),
        ])
        .unwrap_err();
        assert!(matches!(err, DecomposeError::Cyclic(_)));
    }

    #[test]
    fn test_priority_is_clamped_and_orders_ready_set() {
        let mut high = spec("gather the quarterly numbers", &["data_analysis"], &[]);
        high.priority = 99;
        let mut low = spec("format the final report", &["file_processing"], &[]);
        low.priority = -3;
        let mut mid = spec("collect the customer notes", &["web_scraping"], &[]);
        mid.priority = 7;

        let plan = normalize_plan(vec![low, high, mid]).expect("plan");
        assert_eq!(plan.subtasks[0].priority, 0);
        assert_eq!(plan.subtasks[1].priority, 10);
        assert_eq!(plan.subtasks[2].priority, 7);
        assert_eq!(
            plan.initial_ready,
            vec![
                plan.subtasks[1].id.clone(),
                plan.subtasks[2].id.clone(),
                plan.subtasks[0].id.clone(),
            ]
        );
    }

    #[test]
    fn test_nonpositive_duration_is_discarded() {
        let mut record = spec("fetch the source data", &["web_scraping"], &[]);
        record.estimated_duration = Some(0);
        let plan = normalize_plan(vec![record]).expect("plan");
        assert!(plan.subtasks[0].estimated_duration_seconds.is_none());
    }
}
