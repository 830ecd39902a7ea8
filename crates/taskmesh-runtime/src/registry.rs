//! RegistryService - worker registration, heartbeat, and selection filters.

use std::sync::Arc;

use tracing::{debug, warn};

use taskmesh_core::{
    Capability, SelectionPolicy, StoreError, WorkerRegistry, WorkerStatus,
};

/// Thin service over the registry backend. Liveness is enforced by the
/// backend (TTL or timestamp window); this layer adds the availability and
/// capability filters the dispatcher selects against.
pub struct RegistryService {
    registry: Arc<dyn WorkerRegistry>,
}

impl RegistryService {
    pub fn new(registry: Arc<dyn WorkerRegistry>) -> Self {
        Self { registry }
    }

    pub async fn register(&self, status: &WorkerStatus) -> Result<(), StoreError> {
        self.registry.register(status).await
    }

    /// Heartbeat path: refresh the status hash and extend its TTL.
    pub async fn heartbeat(&self, status: &WorkerStatus) -> Result<(), StoreError> {
        self.registry.write_status(status).await
    }

    pub async fn deregister(&self, worker_id: &str) -> Result<(), StoreError> {
        self.registry.deregister(worker_id).await
    }

    /// All live workers.
    pub async fn snapshot(&self) -> Result<Vec<WorkerStatus>, StoreError> {
        self.registry.snapshot().await
    }

    /// Live, available workers matching `required` under `policy`.
    pub async fn available_for(
        &self,
        required: &[Capability],
        policy: SelectionPolicy,
    ) -> Result<Vec<WorkerStatus>, StoreError> {
        let snapshot = self.registry.snapshot().await?;
        Ok(snapshot
            .into_iter()
            .filter(|w| w.available)
            .filter(|w| required.is_empty() || w.matches(required, policy))
            .collect())
    }

    /// Best-effort busy flip after a successful dispatch; the worker
    /// self-reports on its next heartbeat regardless.
    pub async fn mark_busy(&self, worker_id: &str, subtask_id: &str) {
        match self.registry.read_status(worker_id).await {
            Ok(Some(mut status)) => {
                status.occupy(subtask_id);
                if let Err(err) = self.registry.write_status(&status).await {
                    warn!(worker_id, error = %err, "failed to mark worker busy");
                }
            }
            Ok(None) => debug!(worker_id, "worker vanished before busy flip"),
            Err(err) => warn!(worker_id, error = %err, "failed to read worker status"),
        }
    }

    /// Best-effort availability flip after a result was ingested.
    pub async fn mark_available(&self, worker_id: &str) {
        match self.registry.read_status(worker_id).await {
            Ok(Some(mut status)) => {
                status.release();
                if let Err(err) = self.registry.write_status(&status).await {
                    warn!(worker_id, error = %err, "failed to mark worker available");
                }
            }
            Ok(None) => debug!(worker_id, "worker vanished before availability flip"),
            Err(err) => warn!(worker_id, error = %err, "failed to read worker status"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use taskmesh_stores::InMemoryWorkerRegistry;

    fn service() -> RegistryService {
        RegistryService::new(Arc::new(InMemoryWorkerRegistry::new(Duration::from_secs(
            60,
        ))))
    }

    fn worker(id: &str, caps: Vec<Capability>) -> WorkerStatus {
        WorkerStatus::new(id, format!("http://127.0.0.1:9000/{id}"), caps)
    }

    #[tokio::test]
    async fn test_available_for_filters_busy_workers() {
        let service = service();
        let mut busy = worker("worker-busy", vec![Capability::DataAnalysis]);
        busy.occupy("sub_x");
        service.register(&busy).await.unwrap();
        service
            .register(&worker("worker-free", vec![Capability::DataAnalysis]))
            .await
            .unwrap();

        let matches = service
            .available_for(&[Capability::DataAnalysis], SelectionPolicy::Intersects)
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].worker_id, "worker-free");
    }

    #[tokio::test]
    async fn test_available_for_applies_policy() {
        let service = service();
        service
            .register(&worker("worker-1", vec![Capability::DataAnalysis]))
            .await
            .unwrap();

        let required = [Capability::DataAnalysis, Capability::WebScraping];
        let intersecting = service
            .available_for(&required, SelectionPolicy::Intersects)
            .await
            .unwrap();
        assert_eq!(intersecting.len(), 1);

        let covering = service
            .available_for(&required, SelectionPolicy::Covers)
            .await
            .unwrap();
        assert!(covering.is_empty());
    }

    #[tokio::test]
    async fn test_busy_and_available_flips_round_trip() {
        let service = service();
        service
            .register(&worker("worker-1", vec![Capability::DataAnalysis]))
            .await
            .unwrap();

        service.mark_busy("worker-1", "sub_a").await;
        let matches = service
            .available_for(&[Capability::DataAnalysis], SelectionPolicy::Intersects)
            .await
            .unwrap();
        assert!(matches.is_empty());

        service.mark_available("worker-1").await;
        let matches = service
            .available_for(&[Capability::DataAnalysis], SelectionPolicy::Intersects)
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert!(matches[0].current_subtask_id.is_none());
    }
}
