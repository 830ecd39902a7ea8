//! ResultProcessor - persists outcomes and advances the task DAG.
//!
//! Long-running loop: dequeue a result, store it idempotently, then decide
//! what the result means for the task: failure propagation, completion
//! aggregation, or unlocking newly ready subtasks. Result deliveries are
//! at-least-once, so every step tolerates replays.
//!
//! Writes to one task row are serialized through a per-task async lock so
//! two results for the same task cannot interleave their read-then-write.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use taskmesh_core::{
    ActivityEntry, ActivityLog, DispatchLedger, ResultQueue, ResultStore, StoreError, SubTask,
    SubTaskResult, Task, TaskDag, TaskState, TaskStore, WorkItem, WorkQueue,
};

use crate::registry::RegistryService;

const ORCHESTRATOR_ACTOR: &str = "orchestrator";
const STORE_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ResultProcessorConfig {
    pub dequeue_timeout: Duration,
}

impl Default for ResultProcessorConfig {
    fn default() -> Self {
        Self {
            dequeue_timeout: Duration::from_secs(1),
        }
    }
}

pub struct ResultProcessor {
    result_queue: Arc<dyn ResultQueue>,
    work_queue: Arc<dyn WorkQueue>,
    task_store: Arc<dyn TaskStore>,
    result_store: Arc<dyn ResultStore>,
    ledger: Arc<dyn DispatchLedger>,
    registry: Arc<RegistryService>,
    activity_log: Arc<dyn ActivityLog>,
    task_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    config: ResultProcessorConfig,
}

impl ResultProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        result_queue: Arc<dyn ResultQueue>,
        work_queue: Arc<dyn WorkQueue>,
        task_store: Arc<dyn TaskStore>,
        result_store: Arc<dyn ResultStore>,
        ledger: Arc<dyn DispatchLedger>,
        registry: Arc<RegistryService>,
        activity_log: Arc<dyn ActivityLog>,
        config: ResultProcessorConfig,
    ) -> Self {
        Self {
            result_queue,
            work_queue,
            task_store,
            result_store,
            ledger,
            registry,
            activity_log,
            task_locks: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Run until cancellation. Poison messages are dropped; store outages
    /// are logged and retried.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("result processor started");
        while !cancel.is_cancelled() {
            let dequeued = tokio::select! {
                _ = cancel.cancelled() => break,
                dequeued = self.result_queue.dequeue(self.config.dequeue_timeout) => dequeued,
            };

            match dequeued {
                Ok(Some(result)) => {
                    if let Err(err) = self.process_result(result).await {
                        error!(error = %err, "result processing failed");
                        tokio::time::sleep(STORE_RETRY_DELAY).await;
                    }
                }
                Ok(None) => continue,
                Err(StoreError::Serialization(err)) => {
                    // Poison message: already popped, do not re-enqueue.
                    error!(error = %err, "dropping undecodable result message");
                }
                Err(err) => {
                    error!(error = %err, "result queue dequeue failed");
                    tokio::time::sleep(STORE_RETRY_DELAY).await;
                }
            }
        }
        info!("result processor stopped");
    }

    /// Ingest one result and advance the parent task.
    pub async fn process_result(&self, result: SubTaskResult) -> Result<(), StoreError> {
        let lock = self.task_lock(&result.task_id)?;
        let _guard = lock.lock().await;

        debug!(
            task_id = %result.task_id,
            subtask_id = %result.subtask_id,
            outcome = result.outcome.as_str(),
            "processing result"
        );

        let changed = self.result_store.save(&result).await?;
        if !changed {
            debug!(
                task_id = %result.task_id,
                subtask_id = %result.subtask_id,
                "duplicate result delivery"
            );
        }

        let worker_id = result.worker_id.clone();
        let advance = self.advance_task(&result).await;
        // The reporting worker is released even when advancement hits a
        // terminal or error path.
        self.registry.mark_available(&worker_id).await;
        advance
    }

    async fn advance_task(&self, result: &SubTaskResult) -> Result<(), StoreError> {
        let task = match self.task_store.load(&result.task_id).await? {
            Some(task) => task,
            None => {
                warn!(task_id = %result.task_id, "result for unknown task, ignoring");
                return Ok(());
            }
        };

        // Results for finished or cancelled tasks are persisted for audit
        // but never advance the DAG.
        if task.state.is_terminal() {
            debug!(task_id = %task.id, state = task.state.as_str(), "task already terminal");
            return Ok(());
        }

        let dag = match TaskDag::build(&task.subtasks) {
            Ok(dag) => dag,
            Err(err) => {
                error!(task_id = %task.id, error = %err, "stored subtasks do not form a DAG");
                return Ok(());
            }
        };

        let all_results = self.result_store.list_for_task(&task.id).await?;
        let completed: HashSet<String> = all_results
            .iter()
            .filter(|r| r.is_completed())
            .map(|r| r.subtask_id.clone())
            .collect();
        let failed: HashSet<String> = all_results
            .iter()
            .filter(|r| !r.is_completed())
            .map(|r| r.subtask_id.clone())
            .collect();

        if !failed.is_empty() {
            let blocks_successors = failed.iter().any(|id| dag.has_successors(id));
            let all_resolved = completed.len() + failed.len() >= dag.len();
            if blocks_successors || all_resolved {
                return self.fail_task(&task, &all_results, &failed).await;
            }
            // A failed leaf without successors: independent branches keep
            // running; the task fails once everything is resolved.
        }

        if failed.is_empty() && completed.len() >= dag.len() {
            return self.complete_task(&task, &all_results).await;
        }

        self.enqueue_ready(&task, &dag, &completed, &failed, &all_results)
            .await
    }

    async fn fail_task(
        &self,
        task: &Task,
        all_results: &[SubTaskResult],
        failed: &HashSet<String>,
    ) -> Result<(), StoreError> {
        // Name the first failed subtask in declaration order.
        let first_failed = task
            .subtasks
            .iter()
            .find(|st| failed.contains(&st.id))
            .map(|st| st.id.clone())
            .unwrap_or_default();
        let reason = all_results
            .iter()
            .find(|r| r.subtask_id == first_failed)
            .and_then(|r| r.error.clone())
            .unwrap_or_else(|| "subtask failed".to_string());
        let message = format!("subtask {} failed: {}", first_failed, reason);

        if !task.state.can_transition_to(TaskState::Failed) {
            warn!(task_id = %task.id, state = task.state.as_str(), "cannot fail task from current state");
            return Ok(());
        }

        self.task_store
            .update_state(&task.id, TaskState::Failed, None, Some(message.clone()))
            .await?;
        info!(task_id = %task.id, "task failed");
        self.log_activity(
            ActivityEntry::error(ORCHESTRATOR_ACTOR, Some(task.id.clone()), message)
                .with_metadata(json!({"failed_subtasks": failed.len()})),
        )
        .await;
        Ok(())
    }

    async fn complete_task(
        &self,
        task: &Task,
        all_results: &[SubTaskResult],
    ) -> Result<(), StoreError> {
        let aggregate = aggregate_results(all_results);

        if !task.state.can_transition_to(TaskState::Completed) {
            warn!(task_id = %task.id, state = task.state.as_str(), "cannot complete task from current state");
            return Ok(());
        }

        self.task_store
            .update_state(&task.id, TaskState::Completed, Some(aggregate), None)
            .await?;
        info!(task_id = %task.id, subtasks = all_results.len(), "task completed");
        self.log_activity(ActivityEntry::info(
            ORCHESTRATOR_ACTOR,
            Some(task.id.clone()),
            format!("task completed with {} subtask results", all_results.len()),
        ))
        .await;
        Ok(())
    }

    /// Enqueue subtasks whose dependencies just became fully completed.
    /// The dispatch ledger makes the enqueue at-most-once per subtask even
    /// across concurrent processor instances.
    async fn enqueue_ready(
        &self,
        task: &Task,
        dag: &TaskDag,
        completed: &HashSet<String>,
        failed: &HashSet<String>,
        all_results: &[SubTaskResult],
    ) -> Result<(), StoreError> {
        for subtask_id in dag.ready_given(completed) {
            if failed.contains(&subtask_id) {
                continue;
            }
            let Some(subtask) = task.subtask(&subtask_id) else {
                continue;
            };
            if !self.ledger.mark_enqueued(&task.id, &subtask_id).await? {
                continue;
            }

            let context = upstream_context_for(subtask, all_results);
            let item = WorkItem::new(task.id.clone(), subtask.clone(), context);
            self.work_queue.enqueue(&item).await?;
            info!(task_id = %task.id, subtask_id = %subtask_id, "queued dependent subtask");
        }
        Ok(())
    }

    fn task_lock(&self, task_id: &str) -> Result<Arc<tokio::sync::Mutex<()>>, StoreError> {
        let mut locks = self
            .task_locks
            .lock()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(locks
            .entry(task_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone())
    }

    async fn log_activity(&self, entry: ActivityEntry) {
        if let Err(err) = self.activity_log.append(&entry).await {
            warn!(error = %err, "activity log append failed");
        }
    }
}

/// Bundle the dependency outputs a subtask needs into its dispatch payload.
pub fn upstream_context_for(subtask: &SubTask, results: &[SubTaskResult]) -> Value {
    let mut context = serde_json::Map::new();
    for dep_id in &subtask.dependencies {
        let output = results
            .iter()
            .find(|r| r.subtask_id == *dep_id && r.is_completed())
            .and_then(|r| r.output.clone())
            .unwrap_or(Value::Null);
        context.insert(dep_id.clone(), output);
    }
    Value::Object(context)
}

fn aggregate_results(all_results: &[SubTaskResult]) -> Value {
    json!({
        "subtask_results": all_results
            .iter()
            .map(|r| {
                json!({
                    "subtask_id": r.subtask_id,
                    "worker_id": r.worker_id,
                    "outcome": r.outcome.as_str(),
                    "output": r.output,
                    "execution_time_seconds": r.execution_time_seconds,
                })
            })
            .collect::<Vec<_>>(),
        "summary": "all completed",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use taskmesh_core::Capability;

    fn subtask(id: &str, deps: &[&str]) -> SubTask {
        let mut st = SubTask::new(
            format!("do the work for {id}"),
            vec![Capability::DataAnalysis],
        );
        st.id = id.to_string();
        st.dependencies = deps.iter().map(|d| d.to_string()).collect();
        st
    }

    #[test]
    fn test_upstream_context_maps_dependency_outputs() {
        let st = subtask("sub_c", &["sub_a", "sub_b"]);
        let results = vec![
            SubTaskResult::completed("task_x", "sub_a", "worker-1", json!({"rows": 10}), 0.2),
            SubTaskResult::failed("task_x", "sub_b", "worker-2", "boom", 0.1),
        ];
        let context = upstream_context_for(&st, &results);
        assert_eq!(context["sub_a"]["rows"], 10);
        assert_eq!(context["sub_b"], Value::Null);
    }

    #[test]
    fn test_aggregate_shape() {
        let results = vec![SubTaskResult::completed(
            "task_x",
            "sub_a",
            "worker-1",
            json!({"n": 1}),
            0.3,
        )];
        let aggregate = aggregate_results(&results);
        assert_eq!(aggregate["summary"], "all completed");
        assert_eq!(aggregate["subtask_results"][0]["subtask_id"], "sub_a");
        assert_eq!(aggregate["subtask_results"][0]["output"]["n"], 1);
    }
}
