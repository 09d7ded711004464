//! Service layer: lifecycle capability, readiness protocol and workers.
//!
//! [`ManagedService`] is the uniform lifecycle every component exposes.
//! [`ServiceRunner`] executes a [`WorkerDefinition`] on a shared broker
//! connection and raises its [`ReadySignal`] once the worker's own startup
//! has completed; [`ServicePool`] drives a group of runners together.

pub mod capability;
pub mod pool;
pub mod readiness;
pub mod runner;
pub mod worker;

pub use capability::{ManagedService, wait_all_ready};
pub use pool::ServicePool;
pub use readiness::ReadySignal;
pub use runner::{RunnerInfo, RunnerState, ServiceRunner};
pub use worker::{
    Binding, MessageHandler, StartupHook, WorkerContext, WorkerDefinition, handler_fn,
};
