//! TaskStore implementations.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};

use taskmesh_core::{StoreError, Task, TaskState, TaskStore};

use crate::postgres::normalize_table_prefix;

const DEFAULT_IN_MEMORY_TASK_LIMIT: usize = 5_000;

/// In-memory implementation for development and testing.
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<String, Task>>,
    order: RwLock<VecDeque<String>>,
    max_tasks: usize,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::with_max_tasks(DEFAULT_IN_MEMORY_TASK_LIMIT)
    }

    /// Create a store with a hard capacity limit; the oldest task row is
    /// evicted when the limit is reached.
    pub fn with_max_tasks(max_tasks: usize) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            order: RwLock::new(VecDeque::new()),
            max_tasks: max_tasks.max(1),
        }
    }

    fn touch_order(order: &mut VecDeque<String>, task_id: &str) {
        order.retain(|id| id != task_id);
        order.push_back(task_id.to_string());
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, task: &Task) -> Result<(), StoreError> {
        let mut tasks = self
            .tasks
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let mut order = self
            .order
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;

        if !tasks.contains_key(&task.id) && tasks.len() >= self.max_tasks {
            if let Some(oldest_id) = order.pop_front() {
                tasks.remove(&oldest_id);
            }
        }
        tasks.insert(task.id.clone(), task.clone());
        Self::touch_order(&mut order, &task.id);
        Ok(())
    }

    async fn load(&self, task_id: &str) -> Result<Option<Task>, StoreError> {
        let tasks = self
            .tasks
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(tasks.get(task_id).cloned())
    }

    async fn set_subtasks(&self, task: &Task) -> Result<(), StoreError> {
        let mut tasks = self
            .tasks
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        match tasks.get_mut(&task.id) {
            Some(stored) => {
                stored.subtasks = task.subtasks.clone();
                stored.updated_at = Utc::now();
                Ok(())
            }
            None => Err(StoreError::NotFound(task.id.clone())),
        }
    }

    async fn update_state(
        &self,
        task_id: &str,
        state: TaskState,
        aggregate_result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let mut tasks = self
            .tasks
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        match tasks.get_mut(task_id) {
            Some(stored) => {
                stored.state = state;
                stored.aggregate_result = aggregate_result;
                stored.error = error;
                stored.updated_at = Utc::now();
                Ok(())
            }
            None => Err(StoreError::NotFound(task_id.to_string())),
        }
    }

    async fn list_by_state(&self, state: TaskState) -> Result<Vec<Task>, StoreError> {
        let tasks = self
            .tasks
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let mut out: Vec<Task> = tasks
            .values()
            .filter(|t| t.state == state)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }
}

/// PostgreSQL implementation backing the durable task table.
pub struct PostgresTaskStore {
    pool: PgPool,
    table_name: String,
}

impl PostgresTaskStore {
    /// Create the store over a shared pool and bootstrap its schema.
    pub async fn new(pool: PgPool, table_prefix: impl Into<String>) -> Result<Self, StoreError> {
        let prefix = normalize_table_prefix(&table_prefix.into());
        let this = Self {
            pool,
            table_name: format!("{}_tasks", prefix),
        };
        this.init_schema().await?;
        Ok(this)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        let create_table = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id TEXT PRIMARY KEY,
                submitter_id TEXT NOT NULL,
                description TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                state TEXT NOT NULL,
                subtasks JSONB NOT NULL DEFAULT '[]'::jsonb,
                aggregate_result JSONB NULL,
                error TEXT NULL
            )",
            self.table_name
        );
        sqlx::query(&create_table)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let idx_state = format!(
            "CREATE INDEX IF NOT EXISTS {0}_state_idx ON {0} (state)",
            self.table_name
        );
        let idx_created = format!(
            "CREATE INDEX IF NOT EXISTS {0}_created_idx ON {0} (created_at DESC)",
            self.table_name
        );
        sqlx::query(&idx_state)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        sqlx::query(&idx_created)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(())
    }

    fn row_to_task(row: &sqlx::postgres::PgRow) -> Result<Task, StoreError> {
        let subtasks_json: serde_json::Value = row.get("subtasks");
        let subtasks = serde_json::from_value(subtasks_json)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let state_str: String = row.get("state");
        let state = state_str
            .parse::<TaskState>()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        Ok(Task {
            id: row.get("id"),
            submitter_id: row.get("submitter_id"),
            description: row.get("description"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            state,
            subtasks,
            aggregate_result: row.get("aggregate_result"),
            error: row.get("error"),
        })
    }
}

#[async_trait]
impl TaskStore for PostgresTaskStore {
    async fn create(&self, task: &Task) -> Result<(), StoreError> {
        let subtasks = serde_json::to_value(&task.subtasks)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let query = format!(
            "INSERT INTO {} (id, submitter_id, description, created_at, updated_at,
                             state, subtasks, aggregate_result, error)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            self.table_name
        );
        sqlx::query(&query)
            .bind(&task.id)
            .bind(&task.submitter_id)
            .bind(&task.description)
            .bind(task.created_at)
            .bind(task.updated_at)
            .bind(task.state.as_str())
            .bind(subtasks)
            .bind(&task.aggregate_result)
            .bind(&task.error)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(())
    }

    async fn load(&self, task_id: &str) -> Result<Option<Task>, StoreError> {
        let query = format!("SELECT * FROM {} WHERE id = $1", self.table_name);
        let row = sqlx::query(&query)
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn set_subtasks(&self, task: &Task) -> Result<(), StoreError> {
        let subtasks = serde_json::to_value(&task.subtasks)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let query = format!(
            "UPDATE {} SET subtasks = $1, updated_at = $2 WHERE id = $3",
            self.table_name
        );
        let updated = sqlx::query(&query)
            .bind(subtasks)
            .bind(Utc::now())
            .bind(&task.id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound(task.id.clone()));
        }
        Ok(())
    }

    async fn update_state(
        &self,
        task_id: &str,
        state: TaskState,
        aggregate_result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let query = format!(
            "UPDATE {} SET state = $1, aggregate_result = $2, error = $3, updated_at = $4
             WHERE id = $5",
            self.table_name
        );
        let updated = sqlx::query(&query)
            .bind(state.as_str())
            .bind(aggregate_result)
            .bind(error)
            .bind(Utc::now())
            .bind(task_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound(task_id.to_string()));
        }
        Ok(())
    }

    async fn list_by_state(&self, state: TaskState) -> Result<Vec<Task>, StoreError> {
        let query = format!(
            "SELECT * FROM {} WHERE state = $1 ORDER BY created_at DESC",
            self.table_name
        );
        let rows = sqlx::query(&query)
            .bind(state.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        rows.iter().map(Self::row_to_task).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_in_memory_create_load_round_trip() {
        tokio_test::block_on(async {
            let store = InMemoryTaskStore::new();
            let task = Task::new("user-1", "compute the factorial of ten");
            store.create(&task).await.unwrap();

            let loaded = store.load(&task.id).await.unwrap().expect("task");
            assert_eq!(loaded.id, task.id);
            assert_eq!(loaded.state, TaskState::Pending);
            assert!(store.load("task_missing").await.unwrap().is_none());
        });
    }

    #[test]
    fn test_in_memory_update_state_sets_columns() {
        tokio_test::block_on(async {
            let store = InMemoryTaskStore::new();
            let task = Task::new("user-1", "compute the factorial of ten");
            store.create(&task).await.unwrap();

            store
                .update_state(
                    &task.id,
                    TaskState::Completed,
                    Some(json!({"summary": "all completed"})),
                    None,
                )
                .await
                .unwrap();

            let loaded = store.load(&task.id).await.unwrap().expect("task");
            assert_eq!(loaded.state, TaskState::Completed);
            assert_eq!(loaded.aggregate_result, Some(json!({"summary": "all completed"})));
            assert!(loaded.updated_at >= loaded.created_at);
        });
    }

    #[test]
    fn test_in_memory_update_state_unknown_task() {
        tokio_test::block_on(async {
            let store = InMemoryTaskStore::new();
            let err = store
                .update_state("task_missing", TaskState::Running, None, None)
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::NotFound(_)));
        });
    }

    #[test]
    fn test_in_memory_capacity_limit_evicts_oldest() {
        tokio_test::block_on(async {
            let store = InMemoryTaskStore::with_max_tasks(2);
            let first = Task::new("user-1", "first of the capped tasks");
            let second = Task::new("user-1", "second of the capped tasks");
            let third = Task::new("user-1", "third of the capped tasks");
            store.create(&first).await.unwrap();
            store.create(&second).await.unwrap();
            store.create(&third).await.unwrap();

            assert!(store.load(&first.id).await.unwrap().is_none());
            assert!(store.load(&third.id).await.unwrap().is_some());
        });
    }

    #[test]
    fn test_list_by_state_filters() {
        tokio_test::block_on(async {
            let store = InMemoryTaskStore::new();
            let mut running = Task::new("user-1", "task that will be running");
            running.start_running();
            let pending = Task::new("user-1", "task that stays pending");
            store.create(&running).await.unwrap();
            store.create(&pending).await.unwrap();

            let listed = store.list_by_state(TaskState::Running).await.unwrap();
            assert_eq!(listed.len(), 1);
            assert_eq!(listed[0].id, running.id);
        });
    }

}
