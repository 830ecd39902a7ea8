//! Shared PostgreSQL pool construction.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use taskmesh_core::StoreError;

/// Build the shared connection pool for the durable store.
pub async fn connect_pool(
    connection_url: &str,
    min_connections: u32,
    max_connections: u32,
) -> Result<PgPool, StoreError> {
    PgPoolOptions::new()
        .min_connections(min_connections)
        .max_connections(max_connections.max(1))
        .connect(connection_url)
        .await
        .map_err(|e| StoreError::Connection(e.to_string()))
}

/// Keep generated table names safe for interpolation.
pub(crate) fn normalize_table_prefix(prefix: &str) -> String {
    let cleaned: String = prefix
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "taskmesh".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_table_prefix_strips_unsafe_chars() {
        assert_eq!(normalize_table_prefix("Task-Mesh.1"), "task_mesh_1");
        assert_eq!(normalize_table_prefix(""), "taskmesh");
        assert_eq!(normalize_table_prefix("prod"), "prod");
    }
}
