//! ActivityLog trait - append-only operational log.

use async_trait::async_trait;

use super::StoreError;
use crate::types::ActivityEntry;

#[async_trait]
pub trait ActivityLog: Send + Sync {
    /// Append one entry. Append-only; entries are never updated.
    async fn append(&self, entry: &ActivityEntry) -> Result<(), StoreError>;

    /// Recent entries, newest first, optionally filtered.
    async fn recent(
        &self,
        worker_id: Option<&str>,
        task_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ActivityEntry>, StoreError>;
}
