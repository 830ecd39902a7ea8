//! Queue traits - the two coordination queues.
//!
//! Both queues are FIFO with blocking, timed dequeue and atomic handoff:
//! one dequeue call delivers an item to exactly one consumer. Delivery is
//! at-least-once across restarts, so consumers must be idempotent. Failed
//! processing re-enqueues explicitly; an item that cannot be decoded is
//! already popped and therefore dropped (the consumer logs it).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::StoreError;
use crate::types::{SubTask, SubTaskResult};

/// One dispatchable unit on the work queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub task_id: String,
    pub subtask: SubTask,
    /// Outputs of the subtask's direct dependencies, keyed by subtask id.
    #[serde(default)]
    pub upstream_context: Value,
}

impl WorkItem {
    pub fn new(task_id: impl Into<String>, subtask: SubTask, upstream_context: Value) -> Self {
        Self {
            task_id: task_id.into(),
            subtask,
            upstream_context,
        }
    }
}

/// Work queue: decomposer and result processor produce, dispatchers consume.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Push to the tail.
    async fn enqueue(&self, item: &WorkItem) -> Result<(), StoreError>;

    /// Pop from the head, blocking up to `timeout`. `None` on timeout.
    async fn dequeue(&self, timeout: Duration) -> Result<Option<WorkItem>, StoreError>;

    /// Current depth; the operator-facing backpressure signal.
    async fn len(&self) -> Result<usize, StoreError>;
}

/// Result queue: workers produce, result processors consume.
#[async_trait]
pub trait ResultQueue: Send + Sync {
    async fn enqueue(&self, result: &SubTaskResult) -> Result<(), StoreError>;

    async fn dequeue(&self, timeout: Duration) -> Result<Option<SubTaskResult>, StoreError>;

    async fn len(&self) -> Result<usize, StoreError>;
}
