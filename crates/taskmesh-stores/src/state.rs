//! StateStore implementations.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::time::Instant;

use taskmesh_core::{StateStore, StoreError};

/// In-memory implementation for development and testing.
pub struct InMemoryStateStore {
    values: Mutex<HashMap<String, (String, Option<Instant>)>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self {
            values: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let expires_at = ttl.map(|d| Instant::now() + d);
        let mut values = self
            .values
            .lock()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        values.insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut values = self
            .values
            .lock()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        match values.get(key) {
            Some((_, Some(expires_at))) if *expires_at <= Instant::now() => {
                values.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }
}

/// Redis implementation under `<prefix>:state:<key>`.
pub struct RedisStateStore {
    client: redis::Client,
    key_prefix: String,
}

impl RedisStateStore {
    pub fn new(connection_url: &str, key_prefix: impl Into<String>) -> Result<Self, StoreError> {
        let client = redis::Client::open(connection_url)
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            key_prefix: key_prefix.into(),
        })
    }

    fn state_key(&self, key: &str) -> String {
        format!("{}:state:{}", self.key_prefix, key)
    }
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        match ttl {
            Some(ttl) => conn
                .set_ex::<_, _, ()>(self.state_key(key), value, ttl.as_secs().max(1))
                .await
                .map_err(|e| StoreError::Connection(e.to_string())),
            None => conn
                .set::<_, _, ()>(self.state_key(key), value)
                .await
                .map_err(|e| StoreError::Connection(e.to_string())),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        conn.get(self.state_key(key))
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_round_trip() {
        let store = InMemoryStateStore::new();
        store.set("scratch", "value", None).await.unwrap();
        assert_eq!(
            store.get("scratch").await.unwrap().as_deref(),
            Some("value")
        );
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_value_is_gone() {
        let store = InMemoryStateStore::new();
        store
            .set("scratch", "value", Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(store.get("scratch").await.unwrap().is_none());
    }
}
