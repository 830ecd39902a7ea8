//! # Taskmesh Core
//!
//! Core abstractions and deterministic logic for the taskmesh orchestrator.
//!
//! This crate contains:
//! - Task / SubTask / SubTaskResult / WorkerStatus definitions
//! - The capability vocabulary
//! - Subtask DAG construction and readiness tracking
//! - Planner abstraction and the Decomposer
//! - Store traits for the durable and coordination backends
//!
//! This crate does NOT care about:
//! - Which database or queue backs the store traits
//! - Which LLM produces the decomposition
//! - How results are transported over the network

pub mod dag;
pub mod decomposer;
pub mod planner;
pub mod store;
pub mod types;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::dag::{DagError, TaskDag};
    pub use crate::decomposer::{DecomposedPlan, Decomposer};
    pub use crate::planner::{PlanError, Planner, SubTaskSpec};
    pub use crate::store::{
        ActivityLog, DispatchLedger, ResultQueue, ResultStore, StateStore, StoreError, TaskStore,
        WorkItem, WorkQueue, WorkerRegistry,
    };
    pub use crate::types::{
        ActivityEntry, Capability, LogLevel, SelectionPolicy, SubTask, SubTaskOutcome,
        SubTaskResult, Task, TaskState, UnknownCapability, UnknownTaskState, WorkerStatus,
        SUBTASK_DESCRIPTION_MAX, SUBTASK_DESCRIPTION_MIN, TASK_DESCRIPTION_MAX,
        TASK_DESCRIPTION_MIN,
    };
}

pub use dag::{DagError, TaskDag};
pub use decomposer::{DecomposedPlan, Decomposer};
pub use planner::{PlanError, Planner, SubTaskSpec};
pub use store::{
    ActivityLog, DispatchLedger, ResultQueue, ResultStore, StateStore, StoreError, TaskStore,
    WorkItem, WorkQueue, WorkerRegistry,
};
pub use types::{
    ActivityEntry, Capability, LogLevel, SelectionPolicy, SubTask, SubTaskOutcome, SubTaskResult,
    Task, TaskState, UnknownCapability, UnknownTaskState, WorkerStatus, SUBTASK_DESCRIPTION_MAX,
    SUBTASK_DESCRIPTION_MIN, TASK_DESCRIPTION_MAX, TASK_DESCRIPTION_MIN,
};
