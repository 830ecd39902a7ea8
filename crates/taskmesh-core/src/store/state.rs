//! StateStore trait - opaque shared key/value state with TTL.
//!
//! Used only by worker-side tooling to stash scratch state between subtask
//! executions; the orchestration core does not read it.

use std::time::Duration;

use async_trait::async_trait;

use super::StoreError;

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Set a value, optionally expiring after `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Get a value; `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
}
