//! Worker pool for bounded-concurrency dispatch.
//!
//! The pool tracks worker handles and their lifecycle. Workers are external
//! executors behind the `Worker` trait: each runs one task at a time and
//! reports exactly one terminal outcome per assignment. Parallelism comes
//! from pool size, never from per-handle concurrency.

use crate::core::task::{Task, TaskId};
use crate::error::{Error, Result};
use crate::state::context::ContextHandle;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Unique identifier for a worker handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub Uuid);

impl WorkerId {
    /// Create a new unique worker identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Worker lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerState {
    /// Available for an assignment.
    Idle,
    /// Holding exactly one task.
    Busy {
        /// The task this worker is executing.
        task_id: TaskId,
    },
    /// Removed from the pool; never reused.
    Terminated,
}

/// A handle to a worker in the pool.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    /// Unique identifier for this worker.
    pub id: WorkerId,
    /// Domain of competence used for task matching, if any.
    pub specialization: Option<String>,
    /// Current lifecycle state.
    pub state: WorkerState,
}

impl WorkerHandle {
    fn new(id: WorkerId, specialization: Option<String>) -> Self {
        Self {
            id,
            specialization,
            state: WorkerState::Idle,
        }
    }

    /// The task this worker currently holds, if Busy.
    pub fn task_id(&self) -> Option<TaskId> {
        match self.state {
            WorkerState::Busy { task_id } => Some(task_id),
            _ => None,
        }
    }
}

/// The task package handed to a worker.
#[derive(Debug, Clone)]
pub struct Assignment {
    /// The task being executed.
    pub task_id: TaskId,
    /// Attempt number, starting at 1. Workers must be idempotent-safe
    /// to re-invoke on retry.
    pub attempt: u32,
    /// Task title.
    pub title: String,
    /// Task description.
    pub description: String,
    /// Specialization tag the task was matched on, if any.
    pub tag: Option<String>,
    /// Cancelled when the engine abandons this attempt; cooperative.
    pub cancel: CancellationToken,
}

impl Assignment {
    /// Build an assignment from a task record for a given attempt.
    pub fn for_task(task: &Task, attempt: u32, cancel: CancellationToken) -> Self {
        Self {
            task_id: task.id,
            attempt,
            title: task.title.clone(),
            description: task.description.clone(),
            tag: task.tag.clone(),
            cancel,
        }
    }
}

/// What a worker reports back for one assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerFailure {
    /// Human-readable failure detail.
    pub message: String,
}

impl WorkerFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A worker's terminal outcome: a result payload or a failure.
pub type ExecuteResult = std::result::Result<Value, WorkerFailure>;

/// External executor abstraction.
///
/// Implementations may be backed by any tool, model call, or computation.
/// They never touch the graph or store directly; context access goes
/// through the handle they are given.
pub trait Worker: Send + Sync {
    fn execute(
        &self,
        assignment: Assignment,
        context: ContextHandle,
    ) -> BoxFuture<'static, ExecuteResult>;
}

struct WorkerSlot {
    handle: WorkerHandle,
    worker: Arc<dyn Worker>,
}

/// Manages pool membership and idle/busy bookkeeping.
///
/// Pool size bounds concurrency; registration past capacity is rejected.
/// Registration order is preserved so matching is deterministic.
pub struct WorkerPool {
    slots: HashMap<WorkerId, WorkerSlot>,
    order: Vec<WorkerId>,
    capacity: usize,
}

impl WorkerPool {
    /// Create an empty pool bounded at `capacity` workers.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: HashMap::new(),
            order: Vec::new(),
            capacity,
        }
    }

    /// Add a worker to the pool.
    ///
    /// # Errors
    /// `PoolFull` when the pool is at capacity.
    pub fn register(
        &mut self,
        specialization: Option<String>,
        worker: Arc<dyn Worker>,
    ) -> Result<WorkerId> {
        if !self.has_capacity() {
            return Err(Error::PoolFull { max: self.capacity });
        }
        let id = WorkerId::new();
        self.slots.insert(
            id,
            WorkerSlot {
                handle: WorkerHandle::new(id, specialization),
                worker,
            },
        );
        self.order.push(id);
        Ok(id)
    }

    /// Check if another worker can be registered.
    pub fn has_capacity(&self) -> bool {
        self.slots.len() < self.capacity
    }

    /// Maximum number of workers allowed.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Remove a worker from the pool.
    ///
    /// Returns the task the worker was holding, if any, so the caller can
    /// fail it as lost and make it retry-eligible.
    pub fn deregister(&mut self, id: &WorkerId) -> Result<Option<TaskId>> {
        let slot = self
            .slots
            .remove(id)
            .ok_or(Error::WorkerNotFound { id: *id })?;
        self.order.retain(|w| w != id);
        Ok(slot.handle.task_id())
    }

    /// Get a worker's handle by ID.
    pub fn get(&self, id: &WorkerId) -> Option<&WorkerHandle> {
        self.slots.get(id).map(|s| &s.handle)
    }

    /// Get the executor behind a handle.
    pub fn worker(&self, id: &WorkerId) -> Option<Arc<dyn Worker>> {
        self.slots.get(id).map(|s| Arc::clone(&s.worker))
    }

    /// Number of registered workers.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Check if the pool has no workers.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of idle workers.
    pub fn idle_count(&self) -> usize {
        self.slots
            .values()
            .filter(|s| s.handle.state == WorkerState::Idle)
            .count()
    }

    /// Find an idle worker for a task tag.
    ///
    /// A tagged task goes to a matching specialist first, falling back to
    /// an untagged generalist; an untagged task takes any idle worker.
    pub fn idle_worker_for(&self, tag: Option<&str>) -> Option<WorkerId> {
        let idle: Vec<WorkerId> = self
            .order
            .iter()
            .copied()
            .filter(|id| {
                self.slots
                    .get(id)
                    .map_or(false, |s| s.handle.state == WorkerState::Idle)
            })
            .collect();
        match tag {
            Some(tag) => idle
                .iter()
                .copied()
                .find(|id| self.slots[id].handle.specialization.as_deref() == Some(tag))
                .or_else(|| {
                    idle.iter()
                        .copied()
                        .find(|id| self.slots[id].handle.specialization.is_none())
                }),
            None => idle.first().copied(),
        }
    }

    /// Mark a worker Busy with a task.
    pub fn mark_busy(&mut self, id: &WorkerId, task_id: TaskId) -> Result<()> {
        let slot = self
            .slots
            .get_mut(id)
            .ok_or(Error::WorkerNotFound { id: *id })?;
        slot.handle.state = WorkerState::Busy { task_id };
        Ok(())
    }

    /// Return a worker to Idle.
    pub fn mark_idle(&mut self, id: &WorkerId) -> Result<()> {
        let slot = self
            .slots
            .get_mut(id)
            .ok_or(Error::WorkerNotFound { id: *id })?;
        slot.handle.state = WorkerState::Idle;
        Ok(())
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.slots.len())
            .field("idle", &self.idle_count())
            .finish()
    }
}
