//! # Taskmesh Stores
//!
//! Backend implementations of the `taskmesh-core` store traits:
//! - In-memory: development and testing.
//! - PostgreSQL (`sqlx`): the durable store - tasks, subtask results,
//!   activity logs.
//! - Redis: the coordination store - queues, worker registry, dispatch
//!   ledger, shared state.

mod activity_log;
mod ledger;
mod postgres;
mod queue;
mod registry;
mod result_store;
mod state;
mod task_store;

pub use activity_log::{InMemoryActivityLog, PostgresActivityLog};
pub use ledger::{InMemoryDispatchLedger, RedisDispatchLedger};
pub use postgres::connect_pool;
pub use queue::{
    InMemoryResultQueue, InMemoryWorkQueue, RedisResultQueue, RedisWorkQueue,
};
pub use registry::{InMemoryWorkerRegistry, RedisWorkerRegistry};
pub use result_store::{InMemoryResultStore, PostgresResultStore};
pub use state::{InMemoryStateStore, RedisStateStore};
pub use task_store::{InMemoryTaskStore, PostgresTaskStore};
