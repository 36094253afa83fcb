//! Core data model: task records and the dependency graph.

pub mod graph;
pub mod task;

pub use graph::{FailureOutcome, GraphSnapshot, TaskGraph};
pub use task::{ErrorInfo, FailureKind, Task, TaskId, TaskSpec, TaskStatus};
