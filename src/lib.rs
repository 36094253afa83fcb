//! Conductor: a task-coordination engine.
//!
//! Conductor decomposes a goal into a dependency-ordered set of subtasks,
//! dispatches them to isolated workers with bounded concurrency, persists
//! progress through a checkpointable state store, and recovers from partial
//! failures. Plan generation and task execution are external collaborators
//! behind the [`Planner`] and [`Worker`] traits; the engine sequences,
//! dispatches, persists, and recovers regardless of what produces or
//! performs the work.

pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod monitor;
pub mod orchestration;
pub mod state;

pub use config::Config;
pub use core::{
    ErrorInfo, FailureKind, FailureOutcome, GraphSnapshot, Task, TaskGraph, TaskId, TaskSpec,
    TaskStatus,
};
pub use error::{Error, Result};
pub use monitor::{ExecutionMonitor, RunMetrics};
pub use orchestration::{
    Assignment, ExecuteResult, FailureSummary, Orchestrator, Phase, Planner, ReportOutcome,
    RunReport, RunStatus, Scheduler, SchedulerConfig, SchedulerEvent, Settled, StaticPlanner,
    Worker, WorkerFailure, WorkerHandle, WorkerId, WorkerReport, WorkerState,
};
pub use state::{ContextHandle, StateStore, StoreOptions};
