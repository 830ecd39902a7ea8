//! WorkerStatus - registry view of a remote worker process.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::Capability;

/// Capability matching policy used when binding a subtask to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// The worker can handle at least one of the required capabilities.
    #[default]
    Intersects,
    /// The worker's capabilities cover every required capability.
    Covers,
}

/// Self-reported status of a worker, refreshed by heartbeat.
///
/// The status hash is owned by the worker; the orchestrator only flips the
/// availability flag best-effort around dispatch and result ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub worker_id: String,
    /// Base URL the dispatcher posts execution requests to.
    pub endpoint: String,
    pub capabilities: Vec<Capability>,
    pub available: bool,
    /// Present iff `available == false`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_subtask_id: Option<String>,
    #[serde(default)]
    pub cpu_pct: f32,
    #[serde(default)]
    pub mem_pct: f32,
    #[serde(default)]
    pub completed_count: u64,
    pub last_heartbeat_at: DateTime<Utc>,
}

impl WorkerStatus {
    /// Create an initial status for a freshly registered worker.
    pub fn new(
        worker_id: impl Into<String>,
        endpoint: impl Into<String>,
        capabilities: Vec<Capability>,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            endpoint: endpoint.into(),
            capabilities,
            available: true,
            current_subtask_id: None,
            cpu_pct: 0.0,
            mem_pct: 0.0,
            completed_count: 0,
            last_heartbeat_at: Utc::now(),
        }
    }

    /// A worker is live while its last heartbeat is within the window.
    pub fn is_live(&self, now: DateTime<Utc>, liveness_window: Duration) -> bool {
        now - self.last_heartbeat_at <= liveness_window
    }

    /// Whether this worker can take a subtask with the given requirements.
    pub fn matches(&self, required: &[Capability], policy: SelectionPolicy) -> bool {
        match policy {
            SelectionPolicy::Intersects => required
                .iter()
                .any(|cap| self.capabilities.contains(cap)),
            SelectionPolicy::Covers => required
                .iter()
                .all(|cap| self.capabilities.contains(cap)),
        }
    }

    /// Mark the worker busy with a subtask.
    pub fn occupy(&mut self, subtask_id: impl Into<String>) {
        self.available = false;
        self.current_subtask_id = Some(subtask_id.into());
    }

    /// Mark the worker available again.
    pub fn release(&mut self) {
        self.available = true;
        self.current_subtask_id = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(caps: Vec<Capability>) -> WorkerStatus {
        WorkerStatus::new("worker-1", "http://127.0.0.1:8001", caps)
    }

    #[test]
    fn test_liveness_window() {
        let mut status = worker(vec![Capability::DataAnalysis]);
        let now = Utc::now();
        assert!(status.is_live(now, Duration::seconds(60)));

        status.last_heartbeat_at = now - Duration::seconds(61);
        assert!(!status.is_live(now, Duration::seconds(60)));
    }

    #[test]
    fn test_intersects_policy_needs_one_shared_capability() {
        let status = worker(vec![Capability::DataAnalysis, Capability::CodeGeneration]);
        assert!(status.matches(
            &[Capability::WebScraping, Capability::DataAnalysis],
            SelectionPolicy::Intersects
        ));
        assert!(!status.matches(&[Capability::WebScraping], SelectionPolicy::Intersects));
    }

    #[test]
    fn test_covers_policy_needs_full_superset() {
        let status = worker(vec![Capability::DataAnalysis, Capability::CodeGeneration]);
        assert!(status.matches(
            &[Capability::DataAnalysis, Capability::CodeGeneration],
            SelectionPolicy::Covers
        ));
        assert!(!status.matches(
            &[Capability::DataAnalysis, Capability::WebScraping],
            SelectionPolicy::Covers
        ));
    }

    #[test]
    fn test_occupy_and_release() {
        let mut status = worker(vec![Capability::DataAnalysis]);
        status.occupy("sub_a");
        assert!(!status.available);
        assert_eq!(status.current_subtask_id.as_deref(), Some("sub_a"));
        status.release();
        assert!(status.available);
        assert!(status.current_subtask_id.is_none());
    }
}
