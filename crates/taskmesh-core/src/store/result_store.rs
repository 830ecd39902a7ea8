//! ResultStore trait - durable, idempotent subtask result rows.

use async_trait::async_trait;

use super::StoreError;
use crate::types::SubTaskResult;

/// Subtask result persistence, keyed logically by `(task_id, subtask_id)`.
///
/// The queue contract is at-least-once, so `save` must be an upsert: a
/// replayed delivery is a no-op, while the manual retry path overwrites a
/// failed row with its superseding result.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Upsert the result. Returns `true` when the stored row changed
    /// (fresh insert or supersession), `false` for a duplicate delivery.
    async fn save(&self, result: &SubTaskResult) -> Result<bool, StoreError>;

    /// All results for one task, oldest first.
    async fn list_for_task(&self, task_id: &str) -> Result<Vec<SubTaskResult>, StoreError>;
}
