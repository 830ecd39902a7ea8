//! ResultStore implementations.
//!
//! Ingestion is idempotent by `(task_id, subtask_id)`: a replayed delivery
//! leaves the row untouched, while a genuinely different result (the manual
//! retry path) supersedes the stored one.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use taskmesh_core::{ResultStore, StoreError, SubTaskOutcome, SubTaskResult};

use crate::postgres::normalize_table_prefix;

/// In-memory implementation for development and testing.
pub struct InMemoryResultStore {
    by_task: RwLock<HashMap<String, Vec<SubTaskResult>>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self {
            by_task: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryResultStore {
    fn default() -> Self {
        Self::new()
    }
}

fn is_duplicate(stored: &SubTaskResult, incoming: &SubTaskResult) -> bool {
    stored.worker_id == incoming.worker_id && stored.outcome == incoming.outcome
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn save(&self, result: &SubTaskResult) -> Result<bool, StoreError> {
        let mut by_task = self
            .by_task
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let results = by_task.entry(result.task_id.clone()).or_default();

        if let Some(pos) = results
            .iter()
            .position(|r| r.subtask_id == result.subtask_id)
        {
            if is_duplicate(&results[pos], result) {
                return Ok(false);
            }
            results.remove(pos);
        }
        results.push(result.clone());
        Ok(true)
    }

    async fn list_for_task(&self, task_id: &str) -> Result<Vec<SubTaskResult>, StoreError> {
        let by_task = self
            .by_task
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let mut out = by_task.get(task_id).cloned().unwrap_or_default();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }
}

/// PostgreSQL implementation; the `(task_id, subtask_id)` unique constraint
/// enforces idempotent ingestion at the database level.
pub struct PostgresResultStore {
    pool: PgPool,
    table_name: String,
}

impl PostgresResultStore {
    pub async fn new(pool: PgPool, table_prefix: impl Into<String>) -> Result<Self, StoreError> {
        let prefix = normalize_table_prefix(&table_prefix.into());
        let this = Self {
            pool,
            table_name: format!("{}_subtask_results", prefix),
        };
        this.init_schema().await?;
        Ok(this)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        let create_table = format!(
            "CREATE TABLE IF NOT EXISTS {0} (
                id BIGSERIAL PRIMARY KEY,
                task_id TEXT NOT NULL,
                subtask_id TEXT NOT NULL,
                worker_id TEXT NOT NULL,
                outcome TEXT NOT NULL,
                output JSONB NULL,
                error TEXT NULL,
                execution_time_seconds DOUBLE PRECISION NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                UNIQUE (task_id, subtask_id)
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
        sqlx::query(&idx_task)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl ResultStore for PostgresResultStore {
    async fn save(&self, result: &SubTaskResult) -> Result<bool, StoreError> {
        // Upsert; the WHERE clause turns duplicate deliveries into no-ops
        // while letting a superseding result (retry) replace a failed row.
        let query = format!(
            "INSERT INTO {0} (task_id, subtask_id, worker_id, outcome, output, error,
                              execution_time_seconds, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (task_id, subtask_id) DO UPDATE SET
                worker_id = EXCLUDED.worker_id,
                outcome = EXCLUDED.outcome,
                output = EXCLUDED.output,
                error = EXCLUDED.error,
                execution_time_seconds = EXCLUDED.execution_time_seconds,
                created_at = EXCLUDED.created_at
             WHERE {0}.worker_id IS DISTINCT FROM EXCLUDED.worker_id
                OR {0}.outcome IS DISTINCT FROM EXCLUDED.outcome",
            self.table_name
        );
        let outcome = sqlx::query(&query)
            .bind(&result.task_id)
            .bind(&result.subtask_id)
            .bind(&result.worker_id)
            .bind(result.outcome.as_str())
            .bind(&result.output)
            .bind(&result.error)
            .bind(result.execution_time_seconds)
            .bind(result.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(outcome.rows_affected() > 0)
    }

    async fn list_for_task(&self, task_id: &str) -> Result<Vec<SubTaskResult>, StoreError> {
        let query = format!(
            "SELECT * FROM {} WHERE task_id = $1 ORDER BY created_at ASC, id ASC",
            self.table_name
        );
        let rows = sqlx::query(&query)
            .bind(task_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        rows.iter()
            .map(|row| {
                let outcome_str: String = row.get("outcome");
                let outcome = match outcome_str.as_str() {
                    "completed" => SubTaskOutcome::Completed,
                    "failed" => SubTaskOutcome::Failed,
                    other => {
                        return Err(StoreError::Serialization(format!(
                            "unknown result outcome: {other}"
                        )))
                    }
                };
                Ok(SubTaskResult {
                    task_id: row.get("task_id"),
                    subtask_id: row.get("subtask_id"),
                    worker_id: row.get("worker_id"),
                    outcome,
                    output: row.get("output"),
                    error: row.get("error"),
                    execution_time_seconds: row.get("execution_time_seconds"),
                    created_at: row.get("created_at"),
                })
            })
            .collect()
    }
}
