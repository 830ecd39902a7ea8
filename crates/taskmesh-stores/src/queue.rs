//! Queue implementations.
//!
//! Redis backs the production queues (`RPUSH`/`BLPOP`, which gives the
//! atomic single-consumer handoff for free). The in-memory variant keeps
//! the same contract with a mutex-guarded deque and a `Notify` wakeup.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;

use taskmesh_core::{ResultQueue, StoreError, SubTaskResult, WorkItem, WorkQueue};

/// Shared FIFO mechanics for both in-memory queues.
struct MemoryFifo<T> {
    items: Mutex<VecDeque<T>>,
    notify: Notify,
}

impl<T> MemoryFifo<T> {
    fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    fn push(&self, item: T) -> Result<(), StoreError> {
        let mut items = self
            .items
            .lock()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        items.push_back(item);
        drop(items);
        self.notify.notify_one();
        Ok(())
    }

    fn try_pop(&self) -> Result<Option<T>, StoreError> {
        let mut items = self
            .items
            .lock()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(items.pop_front())
    }

    fn depth(&self) -> Result<usize, StoreError> {
        let items = self
            .items
            .lock()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(items.len())
    }

    /// Blocking pop with timeout. The `notified()` future is registered
    /// before re-checking the deque, so a push between the check and the
    /// await still wakes this consumer.
    async fn pop(&self, timeout: Duration) -> Result<Option<T>, StoreError> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            if let Some(item) = self.try_pop()? {
                // Pass the wakeup on in case another item is waiting.
                self.notify.notify_one();
                return Ok(Some(item));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let _ = tokio::time::timeout(deadline - now, notified).await;
        }
    }
}

/// In-memory work queue for development and testing.
pub struct InMemoryWorkQueue {
    fifo: MemoryFifo<WorkItem>,
}

impl InMemoryWorkQueue {
    pub fn new() -> Self {
        Self {
            fifo: MemoryFifo::new(),
        }
    }
}

impl Default for InMemoryWorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkQueue for InMemoryWorkQueue {
    async fn enqueue(&self, item: &WorkItem) -> Result<(), StoreError> {
        self.fifo.push(item.clone())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<WorkItem>, StoreError> {
        self.fifo.pop(timeout).await
    }

    async fn len(&self) -> Result<usize, StoreError> {
        self.fifo.depth()
    }
}

/// In-memory result queue for development and testing.
pub struct InMemoryResultQueue {
    fifo: MemoryFifo<SubTaskResult>,
}

impl InMemoryResultQueue {
    pub fn new() -> Self {
        Self {
            fifo: MemoryFifo::new(),
        }
    }
}

impl Default for InMemoryResultQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResultQueue for InMemoryResultQueue {
    async fn enqueue(&self, result: &SubTaskResult) -> Result<(), StoreError> {
        self.fifo.push(result.clone())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<SubTaskResult>, StoreError> {
        self.fifo.pop(timeout).await
    }

    async fn len(&self) -> Result<usize, StoreError> {
        self.fifo.depth()
    }
}

/// Shared Redis list mechanics for both production queues.
struct RedisFifo {
    client: redis::Client,
    key: String,
}

impl RedisFifo {
    fn new(connection_url: &str, key: String) -> Result<Self, StoreError> {
        let client = redis::Client::open(connection_url)
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self { client, key })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, StoreError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))
    }

    async fn push<T: Serialize>(&self, item: &T) -> Result<(), StoreError> {
        let payload =
            serde_json::to_string(item).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let mut conn = self.connection().await?;
        conn.rpush::<_, _, ()>(&self.key, payload)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(())
    }

    /// `BLPOP` pops before this process decodes, so an undecodable item is
    /// dropped rather than poisoning the queue; the caller logs it.
    async fn pop<T: DeserializeOwned>(
        &self,
        timeout: Duration,
    ) -> Result<Option<T>, StoreError> {
        let mut conn = self.connection().await?;
        let popped: Option<(String, String)> = conn
            .blpop(&self.key, timeout.as_secs_f64())
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        match popped {
            Some((_, payload)) => serde_json::from_str(&payload)
                .map(Some)
                .map_err(|e| StoreError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    async fn depth(&self) -> Result<usize, StoreError> {
        let mut conn = self.connection().await?;
        conn.llen(&self.key)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))
    }
}

/// Redis-backed work queue.
pub struct RedisWorkQueue {
    fifo: RedisFifo,
}

impl RedisWorkQueue {
    pub fn new(connection_url: &str, key_prefix: impl Into<String>) -> Result<Self, StoreError> {
        let key = format!("{}:queue:work", key_prefix.into());
        Ok(Self {
            fifo: RedisFifo::new(connection_url, key)?,
        })
    }
}

#[async_trait]
impl WorkQueue for RedisWorkQueue {
    async fn enqueue(&self, item: &WorkItem) -> Result<(), StoreError> {
        self.fifo.push(item).await
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<WorkItem>, StoreError> {
        self.fifo.pop(timeout).await
    }

    async fn len(&self) -> Result<usize, StoreError> {
        self.fifo.depth().await
    }
}

/// Redis-backed result queue.
pub struct RedisResultQueue {
    fifo: RedisFifo,
}

impl RedisResultQueue {
    pub fn new(connection_url: &str, key_prefix: impl Into<String>) -> Result<Self, StoreError> {
        let key = format!("{}:queue:results", key_prefix.into());
        Ok(Self {
            fifo: RedisFifo::new(connection_url, key)?,
        })
    }
}

#[async_trait]
impl ResultQueue for RedisResultQueue {
    async fn enqueue(&self, result: &SubTaskResult) -> Result<(), StoreError> {
        self.fifo.push(result).await
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<SubTaskResult>, StoreError> {
        self.fifo.pop(timeout).await
    }

    async fn len(&self) -> Result<usize, StoreError> {
        self.fifo.depth().await
    }
}
