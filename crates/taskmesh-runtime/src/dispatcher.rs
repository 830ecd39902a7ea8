//! Dispatcher - binds ready subtasks to live, capable workers.
//!
//! Long-running loop: dequeue a work item, pick a worker uniformly at
//! random among the live+available+capability matches, post the execution
//! request. Anything that prevents the handoff (no candidate, worker busy,
//! transport failure) re-enqueues the item at the tail and backs off
//! exponentially; items are never dropped except for poison payloads and
//! cancelled tasks.
//!
//! Multiple dispatcher instances may run concurrently; the queue's atomic
//! handoff guarantees each item lands in exactly one of them.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use taskmesh_core::{
    ActivityEntry, ActivityLog, SelectionPolicy, TaskState, TaskStore, WorkItem, WorkQueue,
    WorkerStatus,
};

use crate::registry::RegistryService;
use crate::worker_client::{DispatchReply, ExecuteRequest, WorkerClient};

const ORCHESTRATOR_ACTOR: &str = "orchestrator";
const STORE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Dispatch loop tuning.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub dequeue_timeout: Duration,
    pub selection_policy: SelectionPolicy,
    /// First backoff after a failed handoff.
    pub backoff_base: Duration,
    /// Backoff ceiling.
    pub backoff_cap: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            dequeue_timeout: Duration::from_secs(1),
            selection_policy: SelectionPolicy::Intersects,
            backoff_base: Duration::from_millis(100),
            backoff_cap: Duration::from_secs(2),
        }
    }
}

/// What happened to one dequeued item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Handed to a worker.
    Dispatched,
    /// Put back on the queue tail; caller backs off.
    Requeued,
    /// Dropped on purpose (cancelled task or undeliverable item).
    Skipped,
}

pub struct Dispatcher {
    work_queue: Arc<dyn WorkQueue>,
    task_store: Arc<dyn TaskStore>,
    registry: Arc<RegistryService>,
    worker_client: Arc<dyn WorkerClient>,
    activity_log: Arc<dyn ActivityLog>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        work_queue: Arc<dyn WorkQueue>,
        task_store: Arc<dyn TaskStore>,
        registry: Arc<RegistryService>,
        worker_client: Arc<dyn WorkerClient>,
        activity_log: Arc<dyn ActivityLog>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            work_queue,
            task_store,
            registry,
            worker_client,
            activity_log,
            config,
        }
    }

    /// Run until cancellation. Store outages are logged and retried; the
    /// loop never exits on error.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("dispatch worker started");
        let mut backoff = self.config.backoff_base;

        while !cancel.is_cancelled() {
            let dequeued = tokio::select! {
                _ = cancel.cancelled() => break,
                dequeued = self.work_queue.dequeue(self.config.dequeue_timeout) => dequeued,
            };

            match dequeued {
                Ok(Some(item)) => match self.dispatch(item).await {
                    DispatchOutcome::Dispatched | DispatchOutcome::Skipped => {
                        backoff = self.config.backoff_base;
                    }
                    DispatchOutcome::Requeued => {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(backoff) => {}
                        }
                        backoff = (backoff * 2).min(self.config.backoff_cap);
                    }
                },
                Ok(None) => continue,
                Err(err) => {
                    error!(error = %err, "work queue dequeue failed");
                    tokio::time::sleep(STORE_RETRY_DELAY).await;
                }
            }
        }
        info!("dispatch worker stopped");
    }

    /// Try to hand one item to a worker.
    pub async fn dispatch(&self, item: WorkItem) -> DispatchOutcome {
        // Cancelled tasks stop producing dispatches; their queued leftovers
        // drain here.
        match self.task_store.load(&item.task_id).await {
            Ok(Some(task)) if task.state == TaskState::Cancelled => {
                info!(task_id = %item.task_id, subtask_id = %item.subtask.id, "dropping subtask of cancelled task");
                return DispatchOutcome::Skipped;
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                error!(task_id = %item.task_id, "work item references unknown task, dropping");
                return DispatchOutcome::Skipped;
            }
            Err(err) => {
                warn!(task_id = %item.task_id, error = %err, "task lookup failed, re-enqueueing");
                return self.requeue(item).await;
            }
        }

        let worker = match self.select_worker(&item).await {
            Ok(Some(worker)) => worker,
            Ok(None) => {
                warn!(
                    task_id = %item.task_id,
                    subtask_id = %item.subtask.id,
                    "no live available worker matches, re-enqueueing"
                );
                return self.requeue(item).await;
            }
            Err(err) => {
                warn!(error = %err, "worker snapshot failed, re-enqueueing");
                return self.requeue(item).await;
            }
        };

        let request = ExecuteRequest::from(item.clone());
        match self.worker_client.execute(&worker.endpoint, &request).await {
            Ok(DispatchReply::Accepted { worker_id }) => {
                info!(
                    task_id = %item.task_id,
                    subtask_id = %item.subtask.id,
                    worker_id = %worker_id,
                    "subtask assigned"
                );
                self.registry.mark_busy(&worker_id, &item.subtask.id).await;
                self.log_activity(
                    ActivityEntry::info(
                        ORCHESTRATOR_ACTOR,
                        Some(item.task_id.clone()),
                        format!("assigned subtask {} to {}", item.subtask.id, worker_id),
                    )
                    .with_metadata(json!({"subtask_id": item.subtask.id, "worker_id": worker_id})),
                )
                .await;
                DispatchOutcome::Dispatched
            }
            Ok(DispatchReply::Busy) => {
                warn!(
                    subtask_id = %item.subtask.id,
                    worker_id = %worker.worker_id,
                    "worker busy, re-enqueueing"
                );
                self.log_activity(ActivityEntry::warn(
                    ORCHESTRATOR_ACTOR,
                    Some(item.task_id.clone()),
                    format!(
                        "worker {} rejected subtask {} as busy",
                        worker.worker_id, item.subtask.id
                    ),
                ))
                .await;
                self.requeue(item).await
            }
            Err(err) => {
                warn!(
                    subtask_id = %item.subtask.id,
                    worker_id = %worker.worker_id,
                    error = %err,
                    "dispatch to worker failed, re-enqueueing"
                );
                self.log_activity(ActivityEntry::warn(
                    ORCHESTRATOR_ACTOR,
                    Some(item.task_id.clone()),
                    format!(
                        "dispatch of subtask {} to {} failed: {}",
                        item.subtask.id, worker.worker_id, err
                    ),
                ))
                .await;
                self.requeue(item).await
            }
        }
    }

    /// Uniform random choice among the matching workers. Deterministic
    /// first-match would hot-spot one worker whenever capability sets
    /// overlap.
    async fn select_worker(
        &self,
        item: &WorkItem,
    ) -> Result<Option<WorkerStatus>, taskmesh_core::StoreError> {
        let candidates = self
            .registry
            .available_for(
                &item.subtask.required_capabilities,
                self.config.selection_policy,
            )
            .await?;
        if candidates.is_empty() {
            return Ok(None);
        }
        let picked = rand::random_range(0..candidates.len());
        Ok(candidates.into_iter().nth(picked))
    }

    async fn requeue(&self, item: WorkItem) -> DispatchOutcome {
        if let Err(err) = self.work_queue.enqueue(&item).await {
            error!(
                task_id = %item.task_id,
                subtask_id = %item.subtask.id,
                error = %err,
                "re-enqueue failed"
            );
        }
        DispatchOutcome::Requeued
    }

    async fn log_activity(&self, entry: ActivityEntry) {
        if let Err(err) = self.activity_log.append(&entry).await {
            warn!(error = %err, "activity log append failed");
        }
    }
}
