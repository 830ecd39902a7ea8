//! ActivityLog implementations.

use std::sync::RwLock;

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use taskmesh_core::{ActivityEntry, ActivityLog, LogLevel, StoreError};

use crate::postgres::normalize_table_prefix;

const DEFAULT_IN_MEMORY_LOG_LIMIT: usize = 20_000;

/// In-memory implementation for development and testing.
pub struct InMemoryActivityLog {
    entries: RwLock<Vec<ActivityEntry>>,
    max_entries: usize,
}

impl InMemoryActivityLog {
    pub fn new() -> Self {
        Self::with_max_entries(DEFAULT_IN_MEMORY_LOG_LIMIT)
    }

    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            max_entries: max_entries.max(1),
        }
    }
}

impl Default for InMemoryActivityLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActivityLog for InMemoryActivityLog {
    async fn append(&self, entry: &ActivityEntry) -> Result<(), StoreError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        if entries.len() >= self.max_entries {
            let overflow = entries.len() + 1 - self.max_entries;
            entries.drain(0..overflow);
        }
        entries.push(entry.clone());
        Ok(())
    }

    async fn recent(
        &self,
        worker_id: Option<&str>,
        task_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ActivityEntry>, StoreError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let mut out: Vec<ActivityEntry> = entries
            .iter()
            .filter(|e| worker_id.is_none_or(|w| e.worker_id == w))
            .filter(|e| task_id.is_none_or(|t| e.task_id.as_deref() == Some(t)))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(limit);
        Ok(out)
    }
}

/// PostgreSQL implementation backing the append-only log table.
pub struct PostgresActivityLog {
    pool: PgPool,
    table_name: String,
}

impl PostgresActivityLog {
    pub async fn new(pool: PgPool, table_prefix: impl Into<String>) -> Result<Self, StoreError> {
        let prefix = normalize_table_prefix(&table_prefix.into());
        let this = Self {
            pool,
            table_name: format!("{}_activity_logs", prefix),
        };
        this.init_schema().await?;
        Ok(this)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        let create_table = format!(
            "CREATE TABLE IF NOT EXISTS {0} (
                id BIGSERIAL PRIMARY KEY,
                worker_id TEXT NOT NULL,
                task_id TEXT NULL,
                level TEXT NOT NULL,
                message TEXT NOT NULL,
                metadata JSONB NULL,
                created_at TIMESTAMPTZ NOT NULL
            )",
            self.table_name
        );
        sqlx::query(&create_table)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let idx_task = format!(
            "CREATE INDEX IF NOT EXISTS {0}_task_idx ON {0} (task_id)",
            self.table_name
        );
        let idx_time = format!(
            "CREATE INDEX IF NOT EXISTS {0}_time_idx ON {0} (created_at DESC)",
            self.table_name
        );
        sqlx::query(&idx_task)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        sqlx::query(&idx_time)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(())
    }
}

fn parse_level(raw: &str) -> LogLevel {
    match raw {
        "debug" => LogLevel::Debug,
        "warn" => LogLevel::Warn,
        "error" => LogLevel::Error,
        _ => LogLevel::Info,
    }
}

#[async_trait]
impl ActivityLog for PostgresActivityLog {
    async fn append(&self, entry: &ActivityEntry) -> Result<(), StoreError> {
        let query = format!(
            "INSERT INTO {} (worker_id, task_id, level, message, metadata, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
            self.table_name
        );
        sqlx::query(&query)
            .bind(&entry.worker_id)
            .bind(&entry.task_id)
            .bind(entry.level.as_str())
            .bind(&entry.message)
            .bind(&entry.metadata)
            .bind(entry.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(())
    }

    async fn recent(
        &self,
        worker_id: Option<&str>,
        task_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ActivityEntry>, StoreError> {
        let query = format!(
            "SELECT * FROM {}
             WHERE ($1::text IS NULL OR worker_id = $1)
               AND ($2::text IS NULL OR task_id = $2)
             ORDER BY created_at DESC
             LIMIT $3",
            self.table_name
        );
        let rows = sqlx::query(&query)
            .bind(worker_id)
            .bind(task_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(rows
            .iter()
            .map(|row| {
                let level_str: String = row.get("level");
                ActivityEntry {
                    worker_id: row.get("worker_id"),
                    task_id: row.get("task_id"),
                    level: parse_level(&level_str),
                    message: row.get("message"),
                    metadata: row.get("metadata"),
                    created_at: row.get("created_at"),
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recent_filters_and_orders_newest_first() {
        tokio_test::block_on(async {
            let log = InMemoryActivityLog::new();
            let mut old = ActivityEntry::info("worker-1", Some("task_a".to_string()), "started");
            old.created_at -= chrono::Duration::seconds(30);
            log.append(&old).await.unwrap();
            log.append(&ActivityEntry::warn(
                "orchestrator",
                Some("task_a".to_string()),
                "requeued",
            ))
            .await
            .unwrap();
            log.append(&ActivityEntry::info("worker-2", None, "registered"))
                .await
                .unwrap();

            let all = log.recent(None, None, 10).await.unwrap();
            assert_eq!(all.len(), 3);
            assert_eq!(all[0].worker_id, "worker-2");

            let for_task = log.recent(None, Some("task_a"), 10).await.unwrap();
            assert_eq!(for_task.len(), 2);
            assert_eq!(for_task[0].message, "requeued");

            let for_worker = log.recent(Some("worker-1"), None, 10).await.unwrap();
            assert_eq!(for_worker.len(), 1);
        });
    }

    #[test]
    fn test_append_is_capped() {
        tokio_test::block_on(async {
            let log = InMemoryActivityLog::with_max_entries(2);
            for i in 0..4 {
                log.append(&ActivityEntry::info("worker-1", None, format!("entry {i}")))
                    .await
                    .unwrap();
            }
            let all = log.recent(None, None, 10).await.unwrap();
            assert_eq!(all.len(), 2);
        });
    }

    #[test]
    fn test_parse_level_defaults_to_info() {
        assert_eq!(parse_level("warn"), LogLevel::Warn);
        assert_eq!(parse_level("unknown"), LogLevel::Info);
    }
}
