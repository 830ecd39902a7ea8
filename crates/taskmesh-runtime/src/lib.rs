//! # Taskmesh Runtime
//!
//! The orchestration engine: long-running dispatch and result-processing
//! loops, the worker registry service, the task API service, and the
//! bootstrap wiring that assembles everything from configuration.
//!
//! All components take their collaborators through constructor injection;
//! there is no process-wide mutable state.

mod bootstrap;
mod dispatcher;
mod registry;
mod result_processor;
mod service;
mod worker_client;

pub use bootstrap::{
    build_coord_backends, build_durable_backends, build_planner, parse_selection_policy,
    BootstrapError, CoordBackends, DurableBackends, RuntimeApp,
};
pub use dispatcher::{Dispatcher, DispatcherConfig, DispatchOutcome};
pub use registry::RegistryService;
pub use result_processor::{upstream_context_for, ResultProcessor, ResultProcessorConfig};
pub use service::{
    ApiError, RetryReceipt, SubmitReceipt, TaskDetails, TaskService,
};
pub use worker_client::{
    DispatchError, DispatchReply, ExecuteRequest, HttpWorkerClient, WorkerClient,
};
