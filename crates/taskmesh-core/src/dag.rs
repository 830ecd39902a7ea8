//! Subtask dependency DAG
//!
//! Adjacency lists keyed by subtask id, with readiness derived from the set
//! of completed dependencies. Structural validation (duplicates, dangling or
//! self dependencies, cycles) happens once at build time; the result
//! processor then only asks cheap readiness and successor questions.

use std::collections::{HashMap, HashSet, VecDeque};

use thiserror::Error;

use crate::types::SubTask;

/// Structural validation errors.
#[derive(Debug, Error)]
pub enum DagError {
    #[error("plan contains no subtasks")]
    Empty,

    #[error("duplicate subtask id: {0}")]
    DuplicateSubtask(String),

    #[error("subtask '{0}' depends on itself")]
    SelfDependency(String),

    #[error("subtask '{subtask}' depends on unknown subtask '{dependency}'")]
    MissingDependency { subtask: String, dependency: String },

    #[error("dependency cycle involving subtask: {0}")]
    CycleDetected(String),
}

/// Validated dependency graph over one task's subtasks.
#[derive(Debug, Clone)]
pub struct TaskDag {
    /// Subtask ids in declaration order.
    order: Vec<String>,
    /// id → ids it depends on.
    dependencies: HashMap<String, Vec<String>>,
    /// id → ids that depend on it.
    dependents: HashMap<String, Vec<String>>,
}

impl TaskDag {
    /// Build and validate the graph. Cycle detection is Kahn's algorithm:
    /// repeatedly remove zero-in-degree nodes; anything left is cyclic.
    pub fn build(subtasks: &[SubTask]) -> Result<Self, DagError> {
        if subtasks.is_empty() {
            return Err(DagError::Empty);
        }

        let mut order = Vec::with_capacity(subtasks.len());
        let mut dependencies: HashMap<String, Vec<String>> = HashMap::new();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();

        for st in subtasks {
            if dependencies.contains_key(&st.id) {
                return Err(DagError::DuplicateSubtask(st.id.clone()));
            }
            order.push(st.id.clone());
            dependencies.insert(st.id.clone(), st.dependencies.clone());
            dependents.entry(st.id.clone()).or_default();
        }

        for st in subtasks {
            for dep in &st.dependencies {
                if *dep == st.id {
                    return Err(DagError::SelfDependency(st.id.clone()));
                }
                match dependents.get_mut(dep) {
                    Some(entry) => entry.push(st.id.clone()),
                    None => {
                        return Err(DagError::MissingDependency {
                            subtask: st.id.clone(),
                            dependency: dep.clone(),
                        });
                    }
                }
            }
        }

        let dag = Self {
            order,
            dependencies,
            dependents,
        };
        dag.check_acyclic()?;
        Ok(dag)
    }

    fn check_acyclic(&self) -> Result<(), DagError> {
        let mut in_degree: HashMap<&str, usize> = self
            .order
            .iter()
            .map(|id| (id.as_str(), self.dependencies_of(id).len()))
            .collect();

        let mut queue: VecDeque<&str> = self
            .order
            .iter()
            .filter(|id| in_degree.get(id.as_str()) == Some(&0))
            .map(String::as_str)
            .collect();

        let mut visited = 0usize;
        while let Some(id) = queue.pop_front() {
            visited += 1;
            for dependent in self.dependents_of(id) {
                if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(dependent.as_str());
                    }
                }
            }
        }

        if visited == self.order.len() {
            Ok(())
        } else {
            let stuck = self
                .order
                .iter()
                .find(|id| in_degree.get(id.as_str()).is_some_and(|d| *d > 0))
                .cloned()
                .unwrap_or_default();
            Err(DagError::CycleDetected(stuck))
        }
    }

    /// Trivial single-node graph; used by the decomposer fallback, which
    /// must not be able to fail.
    pub fn singleton(subtask: &SubTask) -> Self {
        Self {
            order: vec![subtask.id.clone()],
            dependencies: HashMap::from([(subtask.id.clone(), Vec::new())]),
            dependents: HashMap::from([(subtask.id.clone(), Vec::new())]),
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, subtask_id: &str) -> bool {
        self.dependencies.contains_key(subtask_id)
    }

    /// Subtask ids in declaration order.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn dependencies_of(&self, subtask_id: &str) -> &[String] {
        self.dependencies
            .get(subtask_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn dependents_of(&self, subtask_id: &str) -> &[String] {
        self.dependents
            .get(subtask_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Subtasks with no dependencies, in declaration order.
    pub fn initial_ready(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| self.dependencies_of(id).is_empty())
            .cloned()
            .collect()
    }

    /// Ids outside `completed` whose every dependency is in `completed`,
    /// in declaration order. Callers exclude already-dispatched ids.
    pub fn ready_given(&self, completed: &HashSet<String>) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| !completed.contains(id.as_str()))
            .filter(|id| {
                self.dependencies_of(id)
                    .iter()
                    .all(|dep| completed.contains(dep))
            })
            .cloned()
            .collect()
    }

    /// Every id reachable through dependent edges from `subtask_id`.
    pub fn transitive_successors(&self, subtask_id: &str) -> HashSet<String> {
        let mut out = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(subtask_id);
        while let Some(id) = queue.pop_front() {
            for dependent in self.dependents_of(id) {
                if out.insert(dependent.clone()) {
                    queue.push_back(dependent.as_str());
                }
            }
        }
        out
    }

    /// Whether `subtask_id` has at least one transitive successor.
    pub fn has_successors(&self, subtask_id: &str) -> bool {
        !self.dependents_of(subtask_id).is_empty()
    }
}
