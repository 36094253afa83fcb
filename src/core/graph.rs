//! Task dependency graph for dependency-ordered scheduling.
//!
//! `TaskGraph` keeps tasks in a petgraph `DiGraph` with dependency edges
//! pointing from a task to its dependents. Readiness is recomputed
//! incrementally: completing a task re-evaluates only its direct dependents.

use crate::core::task::{ErrorInfo, Task, TaskId, TaskSpec, TaskStatus};
use crate::error::{Error, Result};
use crate::orchestration::pool::WorkerId;
use chrono::Utc;
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Outcome of recording a task failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// The task was reset to Pending/Ready for another attempt.
    Retrying {
        /// Attempts made so far, including the failed one.
        attempts: u32,
    },
    /// The retry budget is spent; the task stays Failed.
    Exhausted,
}

/// Serializable flat view of the graph, sufficient to rebuild it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSnapshot {
    /// Every task record, in registration order.
    pub tasks: Vec<Task>,
    /// Registration sequence counter at snapshot time.
    pub next_seq: u64,
}

/// The task dependency graph.
///
/// Nodes are task records; an edge A -> B means B depends on A. The graph
/// is kept acyclic at all times: an insert that would introduce a cycle is
/// rolled back before any reader can observe it.
pub struct TaskGraph {
    graph: DiGraph<Task, ()>,
    index: HashMap<TaskId, NodeIndex>,
    next_seq: u64,
}

impl TaskGraph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Register a task from its spec.
    ///
    /// # Errors
    /// - `DuplicateId` if the identifier is already registered
    /// - `TaskNotFound` if a declared dependency is unknown
    /// - `Cycle` if the dependency edges would create a cycle; the graph
    ///   is left unchanged
    pub fn add_task(&mut self, mut spec: TaskSpec) -> Result<TaskId> {
        let id = spec.id.unwrap_or_default();
        if self.index.contains_key(&id) {
            return Err(Error::DuplicateId { id });
        }
        spec.id = Some(id);

        let deps = spec.depends_on.clone();
        let task = Task::from_spec(spec, self.next_seq);
        let node = self.graph.add_node(task);
        self.index.insert(id, node);

        // Resolve dependencies after inserting the node so a self-dependency
        // resolves to the new node and trips the cycle check.
        for dep in &deps {
            let dep_node = match self.index.get(dep) {
                Some(&n) => n,
                None => {
                    self.remove_last(node, &id);
                    return Err(Error::TaskNotFound { id: *dep });
                }
            };
            self.graph.add_edge(dep_node, node, ());
        }

        if is_cyclic_directed(&self.graph) {
            self.remove_last(node, &id);
            return Err(Error::Cycle { task: id });
        }

        self.next_seq += 1;
        self.refresh_ready(node);
        Ok(id)
    }

    /// Remove the node added last in `add_task`. Safe because petgraph's
    /// swap-removal only shifts the final node index.
    fn remove_last(&mut self, node: NodeIndex, id: &TaskId) {
        self.graph.remove_node(node);
        self.index.remove(id);
    }

    /// Promote a Pending task to Ready when every dependency is Completed.
    fn refresh_ready(&mut self, node: NodeIndex) {
        let pending = matches!(self.graph[node].status, TaskStatus::Pending);
        if !pending {
            return;
        }
        let deps_satisfied = self
            .graph
            .neighbors_directed(node, Direction::Incoming)
            .all(|dep| matches!(self.graph[dep].status, TaskStatus::Completed));
        if deps_satisfied {
            self.graph[node].status = TaskStatus::Ready;
        }
    }

    /// Get a reference to a task by its ID.
    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.index.get(id).map(|&n| &self.graph[n])
    }

    fn node(&self, id: &TaskId) -> Result<NodeIndex> {
        self.index
            .get(id)
            .copied()
            .ok_or(Error::TaskNotFound { id: *id })
    }

    /// Check if the graph contains a task.
    pub fn contains(&self, id: &TaskId) -> bool {
        self.index.contains_key(id)
    }

    /// Number of registered tasks.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Check if the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// All task records, in registration order.
    pub fn tasks(&self) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self.graph.node_weights().collect();
        tasks.sort_by_key(|t| t.seq);
        tasks
    }

    /// IDs of the tasks the given task depends on.
    pub fn dependencies(&self, id: &TaskId) -> Vec<TaskId> {
        match self.index.get(id) {
            Some(&n) => self
                .graph
                .neighbors_directed(n, Direction::Incoming)
                .map(|d| self.graph[d].id)
                .collect(),
            None => Vec::new(),
        }
    }

    /// IDs of the tasks that depend on the given task.
    pub fn dependents(&self, id: &TaskId) -> Vec<TaskId> {
        match self.index.get(id) {
            Some(&n) => self
                .graph
                .neighbors_directed(n, Direction::Outgoing)
                .map(|d| self.graph[d].id)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Ready tasks ordered by priority descending, then registration order
    /// ascending, truncated to `limit`.
    pub fn ready_tasks(&self, limit: usize) -> Vec<Task> {
        let mut ready: Vec<&Task> = self
            .graph
            .node_weights()
            .filter(|t| matches!(t.status, TaskStatus::Ready))
            .collect();
        ready.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
        ready.into_iter().take(limit).cloned().collect()
    }

    /// Count of tasks still eligible for or undergoing execution.
    pub fn unsettled_count(&self) -> usize {
        self.graph
            .node_weights()
            .filter(|t| !t.is_settled())
            .count()
    }

    /// Tasks left Failed with their retry budget spent.
    pub fn failed_tasks(&self) -> Vec<&Task> {
        let mut failed: Vec<&Task> = self
            .graph
            .node_weights()
            .filter(|t| matches!(t.status, TaskStatus::Failed { .. }))
            .collect();
        failed.sort_by_key(|t| t.seq);
        failed
    }

    /// Transition Ready -> Running and record the worker assignment.
    ///
    /// # Errors
    /// - `AlreadyAssigned` if the task is Running under another assignment
    /// - `InvalidTransition` if the task is not Ready
    pub fn mark_started(&mut self, id: &TaskId, worker: WorkerId) -> Result<()> {
        let node = self.node(id)?;
        let task = &mut self.graph[node];
        match task.status {
            TaskStatus::Ready => {
                task.status = TaskStatus::Running;
                task.worker = Some(worker);
                task.started_at = Some(Utc::now());
                task.finished_at = None;
                Ok(())
            }
            TaskStatus::Running => Err(Error::AlreadyAssigned {
                id: *id,
                worker: task.worker.unwrap_or(worker),
            }),
            ref status => Err(Error::InvalidTransition {
                id: *id,
                from: status.to_string(),
                to: "running".to_string(),
            }),
        }
    }

    /// Transition Running -> Completed, store the result, and re-evaluate
    /// only the direct dependents. Returns the IDs that became Ready.
    ///
    /// Delivering an identical result for an already Completed task is a
    /// no-op (duplicate delivery); a different result is a `Conflict`.
    pub fn mark_completed(&mut self, id: &TaskId, result: Value) -> Result<Vec<TaskId>> {
        let node = self.node(id)?;
        let task = &mut self.graph[node];
        match task.status {
            TaskStatus::Running => {
                task.status = TaskStatus::Completed;
                task.result = Some(result);
                task.worker = None;
                task.finished_at = Some(Utc::now());
            }
            TaskStatus::Completed => {
                if task.result.as_ref() == Some(&result) {
                    return Ok(Vec::new());
                }
                return Err(Error::Conflict { id: *id });
            }
            ref status => {
                return Err(Error::InvalidTransition {
                    id: *id,
                    from: status.to_string(),
                    to: "completed".to_string(),
                })
            }
        }

        let dependents: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(node, Direction::Outgoing)
            .collect();
        let mut newly_ready = Vec::new();
        for dep in dependents {
            self.refresh_ready(dep);
            if matches!(self.graph[dep].status, TaskStatus::Ready) {
                newly_ready.push(self.graph[dep].id);
            }
        }
        Ok(newly_ready)
    }

    /// Record a failed attempt.
    ///
    /// Increments the attempt count; below `retry_limit` the task resets to
    /// Pending (then Ready if its dependencies remain satisfied), otherwise
    /// it stays Failed for the orchestrator to evaluate.
    pub fn mark_failed(
        &mut self,
        id: &TaskId,
        error: ErrorInfo,
        retry_limit: u32,
    ) -> Result<FailureOutcome> {
        let node = self.node(id)?;
        let task = &mut self.graph[node];
        if !matches!(task.status, TaskStatus::Running) {
            return Err(Error::InvalidTransition {
                id: *id,
                from: task.status.to_string(),
                to: "failed".to_string(),
            });
        }

        task.attempts += 1;
        task.worker = None;
        task.finished_at = Some(Utc::now());
        task.last_error = Some(error.clone());

        if task.attempts < retry_limit {
            task.status = TaskStatus::Pending;
            task.started_at = None;
            let attempts = task.attempts;
            self.refresh_ready(node);
            Ok(FailureOutcome::Retrying { attempts })
        } else {
            task.status = TaskStatus::Failed { error };
            Ok(FailureOutcome::Exhausted)
        }
    }

    /// Cancel a task and cascade to every transitive dependent.
    ///
    /// Each non-terminal task in the dependent closure becomes Cancelled;
    /// Completed dependents already consumed their dependency and are left
    /// alone. Returns every task that was cancelled, root first.
    ///
    /// # Errors
    /// `InvalidTransition` if the root task is already terminal.
    pub fn cancel(&mut self, id: &TaskId) -> Result<Vec<TaskId>> {
        let root = self.node(id)?;
        if self.graph[root].is_terminal() {
            return Err(Error::InvalidTransition {
                id: *id,
                from: self.graph[root].status.to_string(),
                to: "cancelled".to_string(),
            });
        }

        let mut cancelled = Vec::new();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if self.graph[node].is_terminal() {
                continue;
            }
            let task = &mut self.graph[node];
            task.status = TaskStatus::Cancelled;
            task.worker = None;
            task.finished_at = Some(Utc::now());
            cancelled.push(task.id);
            stack.extend(self.graph.neighbors_directed(node, Direction::Outgoing));
        }
        Ok(cancelled)
    }

    /// Capture a serializable snapshot of the whole graph.
    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            tasks: self.tasks().into_iter().cloned().collect(),
            next_seq: self.next_seq,
        }
    }

    /// Rebuild a graph from a snapshot.
    ///
    /// Tasks that were Running at snapshot time are demoted to Ready with
    /// their worker assignment cleared; a snapshot cannot capture in-flight
    /// attempts, so those tasks re-run from scratch.
    pub fn from_snapshot(snapshot: GraphSnapshot) -> Result<Self> {
        let mut graph = Self::new();
        for mut task in snapshot.tasks {
            if matches!(task.status, TaskStatus::Running) {
                task.status = TaskStatus::Ready;
                task.worker = None;
                task.started_at = None;
            }
            let id = task.id;
            let node = graph.graph.add_node(task);
            graph.index.insert(id, node);
        }
        // Edges second pass: every dependency must be present in the snapshot.
        let nodes: Vec<NodeIndex> = graph.graph.node_indices().collect();
        for node in nodes {
            let deps = graph.graph[node].depends_on.clone();
            for dep in deps {
                let dep_node = graph.node(&dep)?;
                graph.graph.add_edge(dep_node, node, ());
            }
        }
        graph.next_seq = snapshot.next_seq;
        Ok(graph)
    }
}

impl Default for TaskGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("tasks", &self.graph.node_count())
            .field("edges", &self.graph.edge_count())
            .finish()
    }
}
