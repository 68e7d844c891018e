//! Host side of the decoder protocol.
//!
//! Splits batches of shots into independent decoding invocations, runs them
//! on a worker pool either in-process or in killable subprocesses, owns the
//! scratch directory of every invocation, and reassembles the predictions.

/// Synthetic grid workloads.
pub mod generator;

/// Invocation state machine, scoped scratch directories, and forced termination.
pub mod lifecycle;

/// Batch splitting, retries, and reassembly.
pub mod orchestrator;

/// Orchestrator settings.
pub mod config;

/// Parallel execution of independent invocations.
pub mod worker;

/// Throughput benchmarks.
pub mod bench;

pub mod stats;

#[cfg(unix)]
mod pipe;

pub use config::{ExecutionMode, InputMode, OrchestratorConfig};
pub use lifecycle::{CancelToken, Invocation, InvocationOutcome, InvocationState, ScopedDir};
pub use orchestrator::Orchestrator;
pub use worker::{WorkerJob, WorkerPool, run_worker_job};
