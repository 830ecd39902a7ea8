//! DispatchLedger implementations.
//!
//! The Redis variant rides on `SADD`'s added-count so exactly one of two
//! racing result processors wins the right to enqueue a subtask.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use redis::AsyncCommands;

use taskmesh_core::{DispatchLedger, StoreError};

/// Ledger keys outlive any reasonable task run; TTL only bounds leakage.
const LEDGER_TTL_SECONDS: i64 = 7 * 24 * 3600;

/// In-memory implementation for development and testing.
pub struct InMemoryDispatchLedger {
    entries: Mutex<HashMap<String, HashSet<String>>>,
}

impl InMemoryDispatchLedger {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryDispatchLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DispatchLedger for InMemoryDispatchLedger {
    async fn mark_enqueued(&self, task_id: &str, subtask_id: &str) -> Result<bool, StoreError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(entries
            .entry(task_id.to_string())
            .or_default()
            .insert(subtask_id.to_string()))
    }

    async fn clear(&self, task_id: &str, subtask_ids: &[String]) -> Result<(), StoreError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        if let Some(marked) = entries.get_mut(task_id) {
            for subtask_id in subtask_ids {
                marked.remove(subtask_id);
            }
        }
        Ok(())
    }
}

/// Redis implementation: one set per task.
pub struct RedisDispatchLedger {
    client: redis::Client,
    key_prefix: String,
}

impl RedisDispatchLedger {
    pub fn new(connection_url: &str, key_prefix: impl Into<String>) -> Result<Self, StoreError> {
        let client = redis::Client::open(connection_url)
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            key_prefix: key_prefix.into(),
        })
    }

    fn ledger_key(&self, task_id: &str) -> String {
        format!("{}:task:{}:dispatched", self.key_prefix, task_id)
    }
}

#[async_trait]
impl DispatchLedger for RedisDispatchLedger {
    async fn mark_enqueued(&self, task_id: &str, subtask_id: &str) -> Result<bool, StoreError> {
        let key = self.ledger_key(task_id);
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        let added: i64 = conn
            .sadd(&key, subtask_id)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        conn.expire::<_, ()>(&key, LEDGER_TTL_SECONDS)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(added > 0)
    }

    async fn clear(&self, task_id: &str, subtask_ids: &[String]) -> Result<(), StoreError> {
        if subtask_ids.is_empty() {
            return Ok(());
        }
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        conn.srem::<_, _, ()>(self.ledger_key(task_id), subtask_ids)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_mark_wins_subsequent_marks_lose() {
        let ledger = InMemoryDispatchLedger::new();
        assert!(ledger.mark_enqueued("task_a", "sub_a").await.unwrap());
        assert!(!ledger.mark_enqueued("task_a", "sub_a").await.unwrap());
        assert!(ledger.mark_enqueued("task_a", "sub_b").await.unwrap());
        assert!(ledger.mark_enqueued("task_b", "sub_a").await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_allows_requeue() {
        let ledger = InMemoryDispatchLedger::new();
        assert!(ledger.mark_enqueued("task_a", "sub_a").await.unwrap());
        ledger
            .clear("task_a", &["sub_a".to_string()])
            .await
            .unwrap();
        assert!(ledger.mark_enqueued("task_a", "sub_a").await.unwrap());
    }
}
