//! WorkerRegistry trait - TTL-tracked worker status hashes.

use async_trait::async_trait;

use super::StoreError;
use crate::types::WorkerStatus;

/// Worker status storage with TTL-based liveness.
///
/// The status hash is written only by the owning worker (registration and
/// heartbeat) plus the orchestrator's best-effort availability flips.
/// Readers must never observe a worker whose TTL has expired: `snapshot`
/// filters dead workers and prunes them from the active set.
#[async_trait]
pub trait WorkerRegistry: Send + Sync {
    /// Add the worker to the active set and write its status with TTL.
    async fn register(&self, status: &WorkerStatus) -> Result<(), StoreError>;

    /// Refresh the status hash and extend its TTL (heartbeat path, and the
    /// orchestrator's best-effort busy/available flips).
    async fn write_status(&self, status: &WorkerStatus) -> Result<(), StoreError>;

    /// Read one worker's status; `None` when unknown or expired.
    async fn read_status(&self, worker_id: &str) -> Result<Option<WorkerStatus>, StoreError>;

    /// All live workers.
    async fn snapshot(&self) -> Result<Vec<WorkerStatus>, StoreError>;

    /// Remove the worker explicitly (clean shutdown; TTL would expire it
    /// regardless).
    async fn deregister(&self, worker_id: &str) -> Result<(), StoreError>;
}
