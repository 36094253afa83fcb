//! Task data model for the coordination graph.
//!
//! Tasks are the atomic units of work dispatched to workers. Each task
//! tracks its status, dependencies, worker assignment, attempts, and result.

use crate::orchestration::pool::WorkerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Unique identifier for a task.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new unique task identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Classification of a task failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The worker reported the attempt as failed.
    WorkerFailure,
    /// The worker never reported back within the configured timeout.
    WorkerTimeout,
    /// The worker was deregistered while the attempt was in flight.
    WorkerLost,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::WorkerFailure => write!(f, "worker_failure"),
            FailureKind::WorkerTimeout => write!(f, "worker_timeout"),
            FailureKind::WorkerLost => write!(f, "worker_lost"),
        }
    }
}

/// What went wrong with a task attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Failure classification.
    pub kind: FailureKind,
    /// Human-readable failure detail.
    pub message: String,
}

impl ErrorInfo {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::WorkerFailure,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::WorkerTimeout,
            message: message.into(),
        }
    }

    pub fn lost(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::WorkerLost,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Task status in its lifecycle.
///
/// Transitions are monotonic except for explicit retry (Failed -> Pending)
/// and cancellation (any non-terminal -> Cancelled).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskStatus {
    /// Task registered but at least one dependency is incomplete.
    Pending,
    /// All dependencies satisfied, eligible for dispatch.
    Ready,
    /// Task is currently held by a worker.
    Running,
    /// Task completed successfully.
    Completed,
    /// Task failed and its retry budget is spent.
    Failed {
        /// What the last attempt died of.
        error: ErrorInfo,
    },
    /// Task was cancelled, directly or by cascade.
    Cancelled,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Ready => write!(f, "ready"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed { error } => write!(f, "failed: {}", error),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Planner-facing description of a task to register.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Explicit identifier; generated when absent.
    pub id: Option<TaskId>,
    /// Human-readable title.
    pub title: String,
    /// Detailed description of what the task should accomplish.
    pub description: String,
    /// Higher priority dispatches first; ties break on creation order.
    pub priority: i32,
    /// Tasks that must complete before this one becomes Ready.
    pub depends_on: Vec<TaskId>,
    /// Specialization tag used for worker matching.
    pub tag: Option<String>,
    /// When set, exhausting this task's retries aborts the whole run.
    pub fatal: bool,
}

impl TaskSpec {
    /// Create a spec with default priority and no dependencies.
    pub fn new(title: &str, description: &str) -> Self {
        Self {
            id: None,
            title: title.to_string(),
            description: description.to_string(),
            priority: 0,
            depends_on: Vec::new(),
            tag: None,
            fatal: false,
        }
    }

    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependency(mut self, dep: TaskId) -> Self {
        self.depends_on.push(dep);
        self
    }

    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = TaskId>) -> Self {
        self.depends_on.extend(deps);
        self
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tag = Some(tag.to_string());
        self
    }

    pub fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }
}

/// A single task record in the coordination graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier for this task.
    pub id: TaskId,
    /// Human-readable title.
    pub title: String,
    /// Detailed description of what the task should accomplish.
    pub description: String,
    /// Dispatch priority, higher first.
    pub priority: i32,
    /// Dependency task identifiers.
    pub depends_on: Vec<TaskId>,
    /// Specialization tag used for worker matching.
    pub tag: Option<String>,
    /// When set, exhausting this task's retries aborts the whole run.
    pub fatal: bool,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Worker currently holding the task, if any.
    pub worker: Option<WorkerId>,
    /// Opaque result payload from the successful attempt.
    pub result: Option<Value>,
    /// Number of attempts made so far.
    pub attempts: u32,
    /// Registration order, the priority tie-breaker.
    pub seq: u64,
    /// When the task was registered.
    pub created_at: DateTime<Utc>,
    /// When the latest attempt started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal or failed state.
    pub finished_at: Option<DateTime<Utc>>,
    /// Last recorded attempt failure, kept across retries for reporting.
    pub last_error: Option<ErrorInfo>,
}

impl Task {
    /// Materialize a spec into a task record.
    ///
    /// The task starts Pending with the given registration sequence number;
    /// readiness is the graph's call, not the task's.
    pub fn from_spec(spec: TaskSpec, seq: u64) -> Self {
        Self {
            id: spec.id.unwrap_or_default(),
            title: spec.title,
            description: spec.description,
            priority: spec.priority,
            depends_on: spec.depends_on,
            tag: spec.tag,
            fatal: spec.fatal,
            status: TaskStatus::Pending,
            worker: None,
            result: None,
            attempts: 0,
            seq,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            last_error: None,
        }
    }

    /// Check if the task is in a terminal state (Completed or Cancelled).
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Check if the task is settled: terminal, or Failed with retries spent.
    pub fn is_settled(&self) -> bool {
        self.is_terminal() || matches!(self.status, TaskStatus::Failed { .. })
    }

    /// Duration of the last attempt, when both timestamps are recorded.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}
