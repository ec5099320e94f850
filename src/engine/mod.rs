// src/engine/mod.rs

//! Distribution engine.
//!
//! This module ties together:
//! - chunk assignment ([`assignment`]) over the run's temp layout ([`layout`])
//! - the bounded worker pool ([`pool`])
//! - the per-machine pipelines: workflows ([`workflow`]) and builds ([`build`])
//! - fan-in of per-machine outputs ([`aggregate`])
//! - the per-invocation orchestration ([`runtime`])
//!
//! Per-machine failures live in [`MachineResult`]s; only run-level failures
//! come back as `Err`.

pub mod aggregate;
pub mod assignment;
pub mod build;
pub mod layout;
pub mod outcome;
pub mod pool;
pub mod progress;
pub mod runtime;
pub mod summary;
pub mod workflow;

pub use aggregate::aggregate;
pub use assignment::ChunkAssignment;
pub use build::{BuildRunner, BuildSwitches};
pub use layout::{RemoteLayout, RunLayout};
pub use outcome::{MachineResult, StepResult};
pub use pool::{WorkerPool, DEFAULT_BUILD_CONCURRENCY};
pub use progress::{ChannelProgress, ProgressEvent, ProgressSink, TracingProgress};
pub use runtime::{
    run_build, run_scan, run_workflow, teardown, BuildOptions, Collaborators, WorkflowOptions,
};
pub use summary::RunSummary;
pub use workflow::{effective_scale_mode, ExecutionContext, WorkflowRunner};

use crate::errors::{ErrorKind, FleexError};

/// Attribute a failed `connect` to `machine`.
pub(crate) fn connect_error(machine: &str, err: FleexError) -> FleexError {
    match err.kind() {
        ErrorKind::Connect => err,
        _ => FleexError::ConnectFailure {
            machine: machine.to_string(),
            message: err.to_string(),
        },
    }
}

/// Attribute a failed transfer to `machine`, keeping timeouts as they are.
pub(crate) fn transfer_error(machine: &str, err: FleexError) -> FleexError {
    match err.kind() {
        ErrorKind::Transfer | ErrorKind::Connect | ErrorKind::Timeout => err,
        _ => FleexError::TransferFailure {
            machine: machine.to_string(),
            message: err.to_string(),
        },
    }
}
