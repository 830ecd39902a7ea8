//! Store traits
//!
//! Two families of backends sit behind these traits:
//! - the durable store (tasks, subtask results, activity logs) - the source
//!   of truth for history and recovery;
//! - the coordination store (work/result queues, worker registry, dispatch
//!   ledger, shared state) - ephemeral, TTL-driven.
//!
//! Implementations live in `taskmesh-stores`.

mod activity_log;
mod ledger;
mod queue;
mod registry;
mod result_store;
mod state;
mod task_store;

pub use activity_log::ActivityLog;
pub use ledger::DispatchLedger;
pub use queue::{ResultQueue, WorkItem, WorkQueue};
pub use registry::WorkerRegistry;
pub use result_store::ResultStore;
pub use state::StateStore;
pub use task_store::TaskStore;

use thiserror::Error;

/// Errors from any store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Item not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
