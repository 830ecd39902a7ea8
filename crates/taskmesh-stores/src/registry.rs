//! WorkerRegistry implementations.
//!
//! Redis keeps one hash per worker (`<prefix>:worker:<id>`) with the
//! liveness TTL, plus an active-id set. Expiry is the liveness mechanism:
//! a worker that stops heartbeating simply disappears from `snapshot()`.
//! The in-memory variant applies the same window against the stored
//! `last_heartbeat_at` timestamp.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use redis::AsyncCommands;

use taskmesh_core::{Capability, StoreError, WorkerRegistry, WorkerStatus};

/// In-memory implementation for development and testing.
pub struct InMemoryWorkerRegistry {
    workers: RwLock<HashMap<String, WorkerStatus>>,
    liveness_window: ChronoDuration,
}

impl InMemoryWorkerRegistry {
    pub fn new(liveness_window: std::time::Duration) -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
            liveness_window: ChronoDuration::from_std(liveness_window)
                .unwrap_or_else(|_| ChronoDuration::seconds(60)),
        }
    }
}

#[async_trait]
impl WorkerRegistry for InMemoryWorkerRegistry {
    async fn register(&self, status: &WorkerStatus) -> Result<(), StoreError> {
        self.write_status(status).await
    }

    async fn write_status(&self, status: &WorkerStatus) -> Result<(), StoreError> {
        let mut workers = self
            .workers
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        workers.insert(status.worker_id.clone(), status.clone());
        Ok(())
    }

    async fn read_status(&self, worker_id: &str) -> Result<Option<WorkerStatus>, StoreError> {
        let workers = self
            .workers
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(workers
            .get(worker_id)
            .filter(|w| w.is_live(Utc::now(), self.liveness_window))
            .cloned())
    }

    async fn snapshot(&self) -> Result<Vec<WorkerStatus>, StoreError> {
        let now = Utc::now();
        let mut workers = self
            .workers
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        workers.retain(|_, w| w.is_live(now, self.liveness_window));
        let mut out: Vec<WorkerStatus> = workers.values().cloned().collect();
        out.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        Ok(out)
    }

    async fn deregister(&self, worker_id: &str) -> Result<(), StoreError> {
        let mut workers = self
            .workers
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        workers.remove(worker_id);
        Ok(())
    }
}

/// Redis implementation; the status hash TTL is the liveness window.
pub struct RedisWorkerRegistry {
    client: redis::Client,
    key_prefix: String,
    ttl_seconds: i64,
}

impl RedisWorkerRegistry {
    pub fn new(
        connection_url: &str,
        key_prefix: impl Into<String>,
        liveness_window: std::time::Duration,
    ) -> Result<Self, StoreError> {
        let client = redis::Client::open(connection_url)
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            key_prefix: key_prefix.into(),
            ttl_seconds: liveness_window.as_secs().max(1) as i64,
        })
    }

    fn active_key(&self) -> String {
        format!("{}:workers:active", self.key_prefix)
    }

    fn worker_key(&self, worker_id: &str) -> String {
        format!("{}:worker:{}", self.key_prefix, worker_id)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, StoreError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))
    }

    async fn write_hash(&self, status: &WorkerStatus) -> Result<(), StoreError> {
        let key = self.worker_key(&status.worker_id);
        let fields = status_to_fields(status);
        let mut conn = self.connection().await?;
        conn.hset_multiple::<_, _, _, ()>(&key, &fields)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        conn.expire::<_, ()>(&key, self.ttl_seconds)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(())
    }
}

fn status_to_fields(status: &WorkerStatus) -> Vec<(&'static str, String)> {
    let capabilities = status
        .capabilities
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(",");
    vec![
        ("worker_id", status.worker_id.clone()),
        ("endpoint", status.endpoint.clone()),
        ("capabilities", capabilities),
        ("available", status.available.to_string()),
        (
            "current_subtask",
            status.current_subtask_id.clone().unwrap_or_default(),
        ),
        ("cpu_pct", status.cpu_pct.to_string()),
        ("mem_pct", status.mem_pct.to_string()),
        ("completed_count", status.completed_count.to_string()),
        ("last_heartbeat", status.last_heartbeat_at.to_rfc3339()),
    ]
}

fn status_from_fields(fields: &HashMap<String, String>) -> Result<WorkerStatus, StoreError> {
    let get = |name: &str| -> Result<&String, StoreError> {
        fields
            .get(name)
            .ok_or_else(|| StoreError::Serialization(format!("missing worker field: {name}")))
    };

    let capabilities: Vec<Capability> = get("capabilities")?
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<Capability>()
                .map_err(|e| StoreError::Serialization(e.to_string()))
        })
        .collect::<Result<_, _>>()?;

    let last_heartbeat_at: DateTime<Utc> = get("last_heartbeat")?
        .parse::<DateTime<Utc>>()
        .map_err(|e| StoreError::Serialization(e.to_string()))?;

    let current_subtask = get("current_subtask")?;

    Ok(WorkerStatus {
        worker_id: get("worker_id")?.clone(),
        endpoint: get("endpoint")?.clone(),
        capabilities,
        available: get("available")? == "true",
        current_subtask_id: if current_subtask.is_empty() {
            None
        } else {
            Some(current_subtask.clone())
        },
        cpu_pct: get("cpu_pct")?.parse().unwrap_or(0.0),
        mem_pct: get("mem_pct")?.parse().unwrap_or(0.0),
        completed_count: get("completed_count")?.parse().unwrap_or(0),
        last_heartbeat_at,
    })
}

#[async_trait]
impl WorkerRegistry for RedisWorkerRegistry {
    async fn register(&self, status: &WorkerStatus) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        conn.sadd::<_, _, ()>(self.active_key(), &status.worker_id)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        drop(conn);
        self.write_hash(status).await
    }

    async fn write_status(&self, status: &WorkerStatus) -> Result<(), StoreError> {
        self.write_hash(status).await
    }

    async fn read_status(&self, worker_id: &str) -> Result<Option<WorkerStatus>, StoreError> {
        let mut conn = self.connection().await?;
        let fields: HashMap<String, String> = conn
            .hgetall(self.worker_key(worker_id))
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        if fields.is_empty() {
            return Ok(None);
        }
        status_from_fields(&fields).map(Some)
    }

    async fn snapshot(&self) -> Result<Vec<WorkerStatus>, StoreError> {
        let mut conn = self.connection().await?;
        let ids: Vec<String> = conn
            .smembers(self.active_key())
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let mut out = Vec::new();
        for worker_id in ids {
            let key = self.worker_key(&worker_id);
            let fields: HashMap<String, String> = conn
                .hgetall(&key)
                .await
                .map_err(|e| StoreError::Connection(e.to_string()))?;
            if fields.is_empty() {
                // TTL expired; prune the id from the active set.
                conn.srem::<_, _, ()>(self.active_key(), &worker_id)
                    .await
                    .map_err(|e| StoreError::Connection(e.to_string()))?;
                continue;
            }
            out.push(status_from_fields(&fields)?);
        }
        out.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        Ok(out)
    }

    async fn deregister(&self, worker_id: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        conn.srem::<_, _, ()>(self.active_key(), worker_id)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        conn.del::<_, ()>(self.worker_key(worker_id))
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn status(id: &str) -> WorkerStatus {
        WorkerStatus::new(
            id,
            format!("http://127.0.0.1:8001/{id}"),
            vec![Capability::DataAnalysis],
        )
    }

    #[tokio::test]
    async fn test_register_and_snapshot() {
        let registry = InMemoryWorkerRegistry::new(Duration::from_secs(60));
        registry.register(&status("worker-1")).await.unwrap();
        registry.register(&status("worker-2")).await.unwrap();

        let snapshot = registry.snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].worker_id, "worker-1");
    }

    #[tokio::test]
    async fn test_expired_worker_is_invisible() {
        let registry = InMemoryWorkerRegistry::new(Duration::from_secs(60));
        let mut stale = status("worker-1");
        stale.last_heartbeat_at = Utc::now() - ChronoDuration::seconds(120);
        registry.register(&stale).await.unwrap();

        assert!(registry.snapshot().await.unwrap().is_empty());
        assert!(registry.read_status("worker-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_heartbeat_revives_visibility() {
        let registry = InMemoryWorkerRegistry::new(Duration::from_secs(60));
        let mut worker = status("worker-1");
        worker.last_heartbeat_at = Utc::now() - ChronoDuration::seconds(120);
        registry.register(&worker).await.unwrap();
        assert!(registry.snapshot().await.unwrap().is_empty());

        worker.last_heartbeat_at = Utc::now();
        registry.write_status(&worker).await.unwrap();
        assert_eq!(registry.snapshot().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_deregister_removes_worker() {
        let registry = InMemoryWorkerRegistry::new(Duration::from_secs(60));
        registry.register(&status("worker-1")).await.unwrap();
        registry.deregister("worker-1").await.unwrap();
        assert!(registry.snapshot().await.unwrap().is_empty());
    }

    #[test]
    fn test_status_fields_round_trip() {
        let mut original = status("worker-1");
        original.occupy("sub_a");
        original.completed_count = 3;
        let fields: HashMap<String, String> = status_to_fields(&original)
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

        let decoded = status_from_fields(&fields).expect("decode");
        assert_eq!(decoded.worker_id, original.worker_id);
        assert_eq!(decoded.capabilities, original.capabilities);
        assert!(!decoded.available);
        assert_eq!(decoded.current_subtask_id.as_deref(), Some("sub_a"));
        assert_eq!(decoded.completed_count, 3);
    }
}
