//! Scheduler for bounded-concurrency task dispatch.
//!
//! The Scheduler pulls ready tasks from the graph, assigns each to an idle
//! worker, and collects exactly one terminal outcome per assignment. All
//! graph and store mutations funnel through it, so per-task updates are
//! serialized; worker executions run on spawned tokio tasks and report back
//! over a single channel.

use crate::core::graph::{FailureOutcome, TaskGraph};
use crate::core::task::{ErrorInfo, FailureKind, Task, TaskId, TaskSpec, TaskStatus};
use crate::error::Result;
use crate::orchestration::pool::{Assignment, Worker, WorkerId, WorkerPool};
use crate::state::context::ContextHandle;
use crate::state::store::StateStore;
use crate::{clog_debug, clog_error, clog_warn};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

/// Events emitted by the scheduler for task lifecycle changes.
///
/// These let external components observe the run without polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// A task has been assigned to a worker and started.
    TaskStarted {
        task_id: TaskId,
        worker_id: WorkerId,
    },
    /// A task completed successfully.
    TaskCompleted { task_id: TaskId },
    /// A task attempt failed.
    TaskFailed {
        task_id: TaskId,
        /// Failure classification for the attempt.
        kind: FailureKind,
        /// Attempts made so far.
        attempts: u32,
        /// Whether the task was reset for another attempt.
        will_retry: bool,
    },
    /// A task was cancelled, directly or by cascade.
    TaskCancelled { task_id: TaskId },
    /// A report arrived for an assignment that is no longer live.
    DuplicateReport {
        task_id: TaskId,
        worker_id: WorkerId,
    },
    /// A busy worker left the pool; its task follows the retry path.
    WorkerLost {
        worker_id: WorkerId,
        task_id: TaskId,
    },
}

/// A worker's reported outcome for one assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    /// The worker finished with a result payload.
    Completed(Value),
    /// The worker reported the attempt as failed.
    Failed { message: String },
    /// No report arrived within the configured timeout.
    TimedOut,
}

/// One terminal report from the worker abstraction.
///
/// The attempt number identifies the assignment: a report whose
/// (worker, attempt) pair does not match the live assignment is a
/// protocol violation and is discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker_id: WorkerId,
    pub task_id: TaskId,
    pub attempt: u32,
    pub outcome: ReportOutcome,
}

/// How a processed report settled, for the orchestrator's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settled {
    Completed {
        task_id: TaskId,
    },
    Failed {
        task_id: TaskId,
        kind: FailureKind,
        attempts: u32,
        will_retry: bool,
    },
}

/// Scheduler tuning knobs.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum number of workers in the pool.
    pub pool_size: usize,
    /// Maximum attempts per task before it is left Failed.
    pub retry_limit: u32,
    /// How long a worker may stay silent before the attempt is lost.
    pub worker_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            retry_limit: 3,
            worker_timeout: Duration::from_secs(300),
        }
    }
}

struct ActiveAssignment {
    worker_id: WorkerId,
    attempt: u32,
    token: CancellationToken,
}

/// Bounded-concurrency dispatcher and result collector.
pub struct Scheduler {
    graph: Arc<RwLock<TaskGraph>>,
    store: Arc<RwLock<StateStore>>,
    pool: WorkerPool,
    config: SchedulerConfig,
    event_tx: mpsc::Sender<SchedulerEvent>,
    report_tx: mpsc::Sender<WorkerReport>,
    report_rx: mpsc::Receiver<WorkerReport>,
    /// Live assignments, keyed by task. At most one per task.
    active: HashMap<TaskId, ActiveAssignment>,
    /// Set when a fatal task exhausts its retries; aborts the run.
    fatal: Option<TaskId>,
}

impl Scheduler {
    /// Create a scheduler over shared graph and store handles.
    pub fn new(
        graph: Arc<RwLock<TaskGraph>>,
        store: Arc<RwLock<StateStore>>,
        config: SchedulerConfig,
        event_tx: mpsc::Sender<SchedulerEvent>,
    ) -> Self {
        let (report_tx, report_rx) = mpsc::channel(64);
        let pool = WorkerPool::new(config.pool_size);
        Self {
            graph,
            store,
            pool,
            config,
            event_tx,
            report_tx,
            report_rx,
            active: HashMap::new(),
            fatal: None,
        }
    }

    /// Add a worker to the pool.
    ///
    /// # Errors
    /// `PoolFull` when the configured pool size is reached.
    pub fn register_worker(
        &mut self,
        specialization: Option<String>,
        worker: Arc<dyn Worker>,
    ) -> Result<WorkerId> {
        self.pool.register(specialization, worker)
    }

    /// Remove a worker from the pool.
    ///
    /// If the worker held a task, the in-flight attempt is abandoned and
    /// the task fails as lost, following the normal retry path.
    pub async fn deregister_worker(&mut self, id: &WorkerId) -> Result<Option<Settled>> {
        let in_flight = self.pool.deregister(id)?;
        let task_id = match in_flight {
            Some(task_id) => task_id,
            None => return Ok(None),
        };
        if let Some(assignment) = self.active.remove(&task_id) {
            assignment.token.cancel();
        }
        clog_warn!(
            "Worker {} deregistered while holding task {}",
            id.short(),
            task_id.short()
        );
        let _ = self
            .event_tx
            .send(SchedulerEvent::WorkerLost {
                worker_id: *id,
                task_id,
            })
            .await;
        self.fail(task_id, ErrorInfo::lost(format!("worker {} deregistered", id.short())))
            .await
            .map(Some)
    }

    /// Register a task and persist its record. Never blocks on execution.
    pub async fn submit(&self, spec: TaskSpec) -> Result<TaskId> {
        let id = {
            let mut graph = self.graph.write().await;
            graph.add_task(spec)?
        };
        self.persist_task(&id).await?;
        clog_debug!("Task {} submitted", id.short());
        Ok(id)
    }

    /// Number of live assignments.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Number of registered workers.
    pub fn worker_count(&self) -> usize {
        self.pool.len()
    }

    /// The fatal task that tripped the run, if any.
    pub fn fatal_task(&self) -> Option<TaskId> {
        self.fatal
    }

    /// Dispatch up to (idle worker count) ready tasks.
    ///
    /// Returns the number of tasks handed out. A ready task with no
    /// matching idle worker is left Ready for a later pass.
    pub async fn dispatch_ready(&mut self) -> Result<usize> {
        let idle = self.pool.idle_count();
        if idle == 0 {
            return Ok(0);
        }
        let ready = {
            let graph = self.graph.read().await;
            graph.ready_tasks(idle)
        };

        let mut dispatched = 0;
        for task in ready {
            let worker_id = match self.pool.idle_worker_for(task.tag.as_deref()) {
                Some(id) => id,
                None => continue,
            };
            {
                let mut graph = self.graph.write().await;
                graph.mark_started(&task.id, worker_id)?;
            }
            self.pool.mark_busy(&worker_id, task.id)?;

            let token = CancellationToken::new();
            let attempt = task.attempts + 1;
            self.active.insert(
                task.id,
                ActiveAssignment {
                    worker_id,
                    attempt,
                    token: token.clone(),
                },
            );
            self.spawn_execution(&task, worker_id, attempt, token);
            self.persist_task(&task.id).await?;

            clog_debug!(
                "Dispatched task {} to worker {} (attempt {})",
                task.id.short(),
                worker_id.short(),
                attempt
            );
            let _ = self
                .event_tx
                .send(SchedulerEvent::TaskStarted {
                    task_id: task.id,
                    worker_id,
                })
                .await;
            dispatched += 1;
        }
        Ok(dispatched)
    }

    /// Run one worker execution on a spawned task, bounded by the worker
    /// timeout and raced against the cancellation token.
    fn spawn_execution(
        &self,
        task: &Task,
        worker_id: WorkerId,
        attempt: u32,
        token: CancellationToken,
    ) {
        let worker = match self.pool.worker(&worker_id) {
            Some(worker) => worker,
            None => return,
        };
        let assignment = Assignment::for_task(task, attempt, token.clone());
        let context = ContextHandle::new(Arc::clone(&self.store));
        let timeout = self.config.worker_timeout;
        let report_tx = self.report_tx.clone();
        let task_id = task.id;

        let fut = worker.execute(assignment, context);
        tokio::spawn(async move {
            let outcome = tokio::select! {
                // Abandoned attempt: the worker may still finish, but its
                // report is never sent.
                _ = token.cancelled() => return,
                res = tokio::time::timeout(timeout, fut) => match res {
                    Ok(Ok(value)) => ReportOutcome::Completed(value),
                    Ok(Err(failure)) => ReportOutcome::Failed {
                        message: failure.message,
                    },
                    Err(_) => ReportOutcome::TimedOut,
                },
            };
            let _ = report_tx
                .send(WorkerReport {
                    worker_id,
                    task_id,
                    attempt,
                    outcome,
                })
                .await;
        });
    }

    /// Wait for the next worker report; `None` when nothing is in flight.
    pub async fn await_report(&mut self) -> Option<WorkerReport> {
        if self.active.is_empty() {
            return None;
        }
        self.report_rx.recv().await
    }

    /// Apply one worker report to the graph and store.
    ///
    /// Returns how the task settled, or `None` when the report did not
    /// match a live assignment: a late result for a cancelled task is
    /// silently dropped; anything else is a `DuplicateReport` protocol
    /// violation, logged and discarded without touching task state.
    pub async fn process(&mut self, report: WorkerReport) -> Result<Option<Settled>> {
        let is_live = self.active.get(&report.task_id).map_or(false, |a| {
            a.worker_id == report.worker_id && a.attempt == report.attempt
        });
        if !is_live {
            let cancelled = {
                let graph = self.graph.read().await;
                matches!(
                    graph.get(&report.task_id).map(|t| &t.status),
                    Some(TaskStatus::Cancelled)
                )
            };
            if !cancelled {
                clog_warn!(
                    "Duplicate report for task {} from worker {} discarded",
                    report.task_id.short(),
                    report.worker_id.short()
                );
                let _ = self
                    .event_tx
                    .send(SchedulerEvent::DuplicateReport {
                        task_id: report.task_id,
                        worker_id: report.worker_id,
                    })
                    .await;
            }
            return Ok(None);
        }

        self.active.remove(&report.task_id);
        self.pool.mark_idle(&report.worker_id)?;

        match report.outcome {
            ReportOutcome::Completed(value) if payload_is_valid(&value) => {
                let newly_ready = {
                    let mut graph = self.graph.write().await;
                    graph.mark_completed(&report.task_id, value.clone())?
                };
                {
                    let mut store = self.store.write().await;
                    store.put(&format!("results/{}", report.task_id), value)?;
                }
                self.persist_task(&report.task_id).await?;
                clog_debug!(
                    "Task {} completed, {} dependents now ready",
                    report.task_id.short(),
                    newly_ready.len()
                );
                let _ = self
                    .event_tx
                    .send(SchedulerEvent::TaskCompleted {
                        task_id: report.task_id,
                    })
                    .await;
                Ok(Some(Settled::Completed {
                    task_id: report.task_id,
                }))
            }
            ReportOutcome::Completed(_) => {
                // Empty payloads do not count as completions.
                self.fail(
                    report.task_id,
                    ErrorInfo::failure("result validation failed: empty payload"),
                )
                .await
                .map(Some)
            }
            ReportOutcome::Failed { message } => self
                .fail(report.task_id, ErrorInfo::failure(message))
                .await
                .map(Some),
            ReportOutcome::TimedOut => self
                .fail(
                    report.task_id,
                    ErrorInfo::timeout(format!(
                        "no report within {:?}",
                        self.config.worker_timeout
                    )),
                )
                .await
                .map(Some),
        }
    }

    /// Record a failed attempt and decide retry vs escalation.
    async fn fail(&mut self, task_id: TaskId, error: ErrorInfo) -> Result<Settled> {
        let kind = error.kind;
        let outcome = {
            let mut graph = self.graph.write().await;
            graph.mark_failed(&task_id, error, self.config.retry_limit)?
        };
        self.persist_task(&task_id).await?;

        let (attempts, will_retry) = match outcome {
            FailureOutcome::Retrying { attempts } => (attempts, true),
            FailureOutcome::Exhausted => {
                let graph = self.graph.read().await;
                let task = graph.get(&task_id);
                let attempts = task.map_or(0, |t| t.attempts);
                if task.map_or(false, |t| t.fatal) {
                    clog_error!("Fatal task {} exhausted retries", task_id.short());
                    self.fatal = Some(task_id);
                }
                (attempts, false)
            }
        };

        clog_warn!(
            "Task {} attempt {} failed ({}), retry={}",
            task_id.short(),
            attempts,
            kind,
            will_retry
        );
        let _ = self
            .event_tx
            .send(SchedulerEvent::TaskFailed {
                task_id,
                kind,
                attempts,
                will_retry,
            })
            .await;
        Ok(Settled::Failed {
            task_id,
            kind,
            attempts,
            will_retry,
        })
    }

    /// Cancel a task and its dependent closure.
    ///
    /// Live assignments in the closure are signalled to abandon their
    /// attempt; a worker that completes anyway has its report dropped.
    pub async fn cancel(&mut self, id: &TaskId) -> Result<Vec<TaskId>> {
        let cancelled = {
            let mut graph = self.graph.write().await;
            graph.cancel(id)?
        };
        for task_id in &cancelled {
            if let Some(assignment) = self.active.remove(task_id) {
                assignment.token.cancel();
                self.pool.mark_idle(&assignment.worker_id)?;
            }
            self.persist_task(task_id).await?;
            let _ = self
                .event_tx
                .send(SchedulerEvent::TaskCancelled { task_id: *task_id })
                .await;
        }
        clog_debug!("Cancelled {} tasks from root {}", cancelled.len(), id.short());
        Ok(cancelled)
    }

    /// Cancel every task that is still runnable. Used when a fatal task
    /// aborts the run; Failed records are left alone as evidence.
    pub async fn abort_remaining(&mut self) -> Result<()> {
        let ids: Vec<TaskId> = {
            let graph = self.graph.read().await;
            graph
                .tasks()
                .iter()
                .filter(|t| !t.is_settled())
                .map(|t| t.id)
                .collect()
        };
        for id in ids {
            let settled = {
                let graph = self.graph.read().await;
                graph.get(&id).map_or(true, |t| t.is_settled())
            };
            if !settled {
                self.cancel(&id).await?;
            }
        }
        Ok(())
    }

    /// Drive dispatch and result collection until no Ready or Running
    /// work remains, or a fatal task aborts the run.
    pub async fn run_until_settled(&mut self) -> Result<()> {
        loop {
            if let Some(fatal) = self.fatal {
                clog_error!("Aborting run: fatal task {}", fatal.short());
                self.abort_remaining().await?;
                break;
            }
            self.dispatch_ready().await?;
            if self.active.is_empty() {
                // Nothing in flight and nothing dispatchable: the graph is
                // settled or stalled on failed/cancelled dependencies.
                break;
            }
            match self.report_rx.recv().await {
                Some(report) => {
                    self.process(report).await?;
                }
                None => break,
            }
        }
        Ok(())
    }

    async fn persist_task(&self, id: &TaskId) -> Result<()> {
        let task = {
            let graph = self.graph.read().await;
            graph.get(id).cloned()
        };
        if let Some(task) = task {
            let mut store = self.store.write().await;
            store.put(&format!("tasks/{}", id), serde_json::to_value(&task)?)?;
        }
        Ok(())
    }
}

/// A completion payload must carry data; null and `{}` are rejected and
/// follow the failure path instead.
fn payload_is_valid(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}
