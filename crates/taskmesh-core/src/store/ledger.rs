//! DispatchLedger trait - at-most-once enqueue tracking per subtask.

use async_trait::async_trait;

use super::StoreError;

/// Records which subtasks of a task have been handed to the work queue.
///
/// The result processor consults this before enqueueing newly ready
/// subtasks, so a subtask is queued at most once even when duplicate result
/// deliveries race across processor instances. The manual retry path clears
/// entries so failed subtasks can be re-queued.
#[async_trait]
pub trait DispatchLedger: Send + Sync {
    /// Mark a subtask as enqueued. Returns `false` when it was already
    /// marked; the marking must be atomic so exactly one caller wins.
    async fn mark_enqueued(&self, task_id: &str, subtask_id: &str) -> Result<bool, StoreError>;

    /// Clear entries (retry path).
    async fn clear(&self, task_id: &str, subtask_ids: &[String]) -> Result<(), StoreError>;
}
