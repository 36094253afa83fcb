//! Top-level control loop driving planning-to-execution cycles.
//!
//! The Orchestrator owns the scheduler, triggers checkpoints on a cadence,
//! and decides replanning and termination. Phases follow
//! Planning -> Executing -> Checkpointing -> Evaluating -> {Executing,
//! Replanning, Terminated}.

use crate::config::Config;
use crate::core::graph::TaskGraph;
use crate::core::task::{FailureKind, Task, TaskId};
use crate::error::{Error, Result};
use crate::monitor::{ExecutionMonitor, RunMetrics};
use crate::orchestration::planner::Planner;
use crate::orchestration::pool::{Worker, WorkerId};
use crate::orchestration::scheduler::{Scheduler, SchedulerConfig, SchedulerEvent, Settled};
use crate::state::store::{StateStore, StoreOptions};
use crate::{clog, clog_debug, clog_error, clog_warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};

/// Checkpoint write attempts before the run degrades to Incomplete.
const CHECKPOINT_ATTEMPTS: u32 = 3;
/// Initial backoff between checkpoint attempts; doubles each retry.
const CHECKPOINT_BACKOFF: Duration = Duration::from_millis(100);

/// Phases of the orchestration control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Requesting the initial task set from the planner.
    Planning,
    /// Driving dispatch until the graph settles or a budget runs out.
    Executing,
    /// Writing a checkpoint.
    Checkpointing,
    /// Inspecting terminal states to decide what happens next.
    Evaluating,
    /// Asking the planner for corrective tasks.
    Replanning,
    /// The run is over.
    Terminated,
}

impl Phase {
    /// Legal phase transitions; everything else is a bug.
    pub fn can_transition(self, next: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            (Planning, Executing)
                | (Planning, Terminated)
                | (Executing, Checkpointing)
                | (Executing, Evaluating)
                | (Executing, Terminated)
                | (Checkpointing, Executing)
                | (Checkpointing, Evaluating)
                | (Checkpointing, Terminated)
                | (Evaluating, Executing)
                | (Evaluating, Replanning)
                | (Evaluating, Terminated)
                | (Replanning, Executing)
                | (Replanning, Terminated)
        )
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Planning => write!(f, "planning"),
            Phase::Executing => write!(f, "executing"),
            Phase::Checkpointing => write!(f, "checkpointing"),
            Phase::Evaluating => write!(f, "evaluating"),
            Phase::Replanning => write!(f, "replanning"),
            Phase::Terminated => write!(f, "terminated"),
        }
    }
}

/// Final status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every task is terminal and none failed.
    Success,
    /// Some branch of the goal was not achieved.
    PartialFailure,
    /// A budget ran out or checkpointing degraded; resumable from the
    /// last checkpoint.
    Incomplete,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Success => write!(f, "success"),
            RunStatus::PartialFailure => write!(f, "partial_failure"),
            RunStatus::Incomplete => write!(f, "incomplete"),
        }
    }
}

/// One Failed task in the final report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureSummary {
    pub task_id: TaskId,
    pub title: String,
    /// Classification of the last failed attempt.
    pub kind: FailureKind,
    /// Attempts made before giving up.
    pub attempts: u32,
}

/// What a completed run yields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub status: RunStatus,
    /// Every task record at termination, in registration order.
    pub tasks: Vec<Task>,
    /// Every Failed task, so no unachieved branch is hidden.
    pub failed: Vec<FailureSummary>,
    /// The final checkpoint sequence number, if any was written.
    pub checkpoint: Option<u64>,
    pub metrics: RunMetrics,
}

/// Top-level coordination engine.
pub struct Orchestrator {
    graph: Arc<RwLock<TaskGraph>>,
    store: Arc<RwLock<StateStore>>,
    scheduler: Scheduler,
    planner: Arc<dyn Planner>,
    config: Config,
    monitor: ExecutionMonitor,
    phase: Phase,
    events: Option<mpsc::Receiver<SchedulerEvent>>,
}

impl Orchestrator {
    /// Create an orchestrator with the store at the configured location.
    pub fn new(planner: Arc<dyn Planner>, config: Config) -> Result<Self> {
        let state_dir = config.state_path()?;
        Self::with_state_dir(planner, config, &state_dir)
    }

    /// Create an orchestrator with the store rooted at an explicit path.
    pub fn with_state_dir(
        planner: Arc<dyn Planner>,
        config: Config,
        state_dir: &Path,
    ) -> Result<Self> {
        config.validate()?;
        let store = StateStore::open(
            state_dir,
            StoreOptions {
                retain: config.checkpoint_retain,
                archive_threshold: Some(config.archive_threshold_bytes),
            },
        )?;
        let graph = Arc::new(RwLock::new(TaskGraph::new()));
        let store = Arc::new(RwLock::new(store));
        let (event_tx, event_rx) = mpsc::channel(256);
        let scheduler = Scheduler::new(
            Arc::clone(&graph),
            Arc::clone(&store),
            SchedulerConfig {
                pool_size: config.pool_size,
                retry_limit: config.retry_limit,
                worker_timeout: config.worker_timeout(),
            },
            event_tx,
        );
        Ok(Self {
            graph,
            store,
            scheduler,
            planner,
            config,
            monitor: ExecutionMonitor::new(),
            phase: Phase::Planning,
            events: Some(event_rx),
        })
    }

    /// Add a worker to the pool.
    ///
    /// # Errors
    /// `PoolFull` when `pool_size` workers are already registered.
    pub fn register_worker(
        &mut self,
        specialization: Option<String>,
        worker: Arc<dyn Worker>,
    ) -> Result<WorkerId> {
        self.scheduler.register_worker(specialization, worker)
    }

    /// Remove a worker; an in-flight task fails as lost and retries.
    pub async fn deregister_worker(&mut self, id: &WorkerId) -> Result<()> {
        self.scheduler.deregister_worker(id).await?;
        Ok(())
    }

    /// Take the scheduler event stream for external observation.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<SchedulerEvent>> {
        self.events.take()
    }

    /// Current control loop phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Shared graph handle, for inspection.
    pub fn graph(&self) -> Arc<RwLock<TaskGraph>> {
        Arc::clone(&self.graph)
    }

    /// Shared store handle, for inspection.
    pub fn store(&self) -> Arc<RwLock<StateStore>> {
        Arc::clone(&self.store)
    }

    fn enter(&mut self, next: Phase) -> Result<()> {
        if !self.phase.can_transition(next) {
            return Err(Error::InvalidPhaseTransition {
                from: self.phase.to_string(),
                to: next.to_string(),
            });
        }
        clog_debug!("Phase {} -> {}", self.phase, next);
        self.phase = next;
        Ok(())
    }

    /// Run a goal from scratch: plan, execute, checkpoint, evaluate.
    pub async fn run(&mut self, goal: &str) -> Result<RunReport> {
        clog!("Run started: {}", goal);
        let snapshot = {
            let graph = self.graph.read().await;
            graph.snapshot()
        };
        let specs = self.planner.propose_tasks(goal, snapshot).await;
        clog!("Planner proposed {} tasks", specs.len());
        for spec in specs {
            self.scheduler.submit(spec).await?;
        }
        self.execute_loop(goal).await
    }

    /// Resume a run from a stored checkpoint.
    ///
    /// Tasks completed after the checkpoint are recomputed; Planning is
    /// skipped because the graph carries the plan.
    pub async fn resume(&mut self, goal: &str, seq: u64) -> Result<RunReport> {
        let restored = {
            let store = self.store.read().await;
            store.restore(seq)?
        };
        clog!("Resumed {} tasks from checkpoint {}", restored.len(), seq);
        {
            let mut graph = self.graph.write().await;
            *graph = restored;
        }
        self.execute_loop(goal).await
    }

    async fn execute_loop(&mut self, goal: &str) -> Result<RunReport> {
        let deadline = self.config.time_budget().map(|d| Instant::now() + d);
        let mut steps: u64 = 0;
        let mut completions_since_checkpoint: u64 = 0;
        let mut last_checkpoint = Instant::now();
        let mut replans: u32 = 0;

        'run: loop {
            self.enter(Phase::Executing)?;
            loop {
                if let Some(fatal) = self.scheduler.fatal_task() {
                    clog_error!("Fatal task {} tripped the run", fatal.short());
                    self.scheduler.abort_remaining().await?;
                    break;
                }
                if self.budget_spent(steps, deadline) {
                    clog_warn!("Budget exhausted after {} steps", steps);
                    let _ = self.checkpoint_with_retry().await;
                    self.enter(Phase::Terminated)?;
                    return self.report(RunStatus::Incomplete).await;
                }

                self.scheduler.dispatch_ready().await?;
                let report = match self.scheduler.await_report().await {
                    Some(report) => report,
                    None => break,
                };
                if let Some(settled) = self.scheduler.process(report).await? {
                    steps += 1;
                    match settled {
                        Settled::Completed { task_id } => {
                            let duration = {
                                let graph = self.graph.read().await;
                                graph.get(&task_id).and_then(|t| t.duration())
                            };
                            self.monitor.log_completion(
                                duration
                                    .and_then(|d| d.to_std().ok())
                                    .unwrap_or_default(),
                            );
                            completions_since_checkpoint += 1;
                        }
                        Settled::Failed { will_retry, .. } => {
                            if !will_retry {
                                self.monitor.log_failure();
                            }
                        }
                    }
                }

                if completions_since_checkpoint >= self.config.checkpoint_every_completions
                    || last_checkpoint.elapsed() >= self.config.checkpoint_interval()
                {
                    self.enter(Phase::Checkpointing)?;
                    match self.checkpoint_with_retry().await {
                        Ok(seq) => {
                            clog!("Checkpoint {} taken", seq);
                            completions_since_checkpoint = 0;
                            last_checkpoint = Instant::now();
                            self.enter(Phase::Executing)?;
                        }
                        Err(err) => {
                            clog_error!("Checkpointing degraded the run: {}", err);
                            self.enter(Phase::Terminated)?;
                            return self.report(RunStatus::Incomplete).await;
                        }
                    }
                }
            }

            self.enter(Phase::Evaluating)?;
            let failed_count = {
                let graph = self.graph.read().await;
                graph.failed_tasks().len()
            };
            if failed_count > 0
                && self.scheduler.fatal_task().is_none()
                && replans < self.config.replan_limit
            {
                self.enter(Phase::Replanning)?;
                replans += 1;
                let snapshot = {
                    let graph = self.graph.read().await;
                    graph.snapshot()
                };
                let specs = self.planner.propose_tasks(goal, snapshot).await;
                if !specs.is_empty() {
                    clog!("Replanning added {} corrective tasks", specs.len());
                    for spec in specs {
                        self.scheduler.submit(spec).await?;
                    }
                    continue 'run;
                }
                clog!("Planner proposed no corrective tasks");
            }
            break;
        }

        // Final checkpoint; a write failure here degrades the run but
        // keeps the last good checkpoint for resumption.
        let degraded = match self.checkpoint_with_retry().await {
            Ok(seq) => {
                clog!("Final checkpoint {}", seq);
                false
            }
            Err(err) => {
                clog_error!("Final checkpoint failed: {}", err);
                true
            }
        };
        self.enter(Phase::Terminated)?;
        let status = if degraded {
            RunStatus::Incomplete
        } else {
            self.final_status().await
        };
        clog!("Run terminated: {}", status);
        self.report(status).await
    }

    fn budget_spent(&self, steps: u64, deadline: Option<Instant>) -> bool {
        if let Some(budget) = self.config.step_budget {
            if steps >= budget {
                return true;
            }
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return true;
            }
        }
        false
    }

    async fn checkpoint_with_retry(&mut self) -> Result<u64> {
        let mut delay = CHECKPOINT_BACKOFF;
        let mut last_err = Error::Checkpoint("no attempts made".to_string());
        for attempt in 1..=CHECKPOINT_ATTEMPTS {
            let result = {
                let graph = self.graph.read().await;
                let mut store = self.store.write().await;
                store.checkpoint(&graph)
            };
            match result {
                Ok(seq) => return Ok(seq),
                Err(err) => {
                    clog_warn!("Checkpoint attempt {} failed: {}", attempt, err);
                    last_err = err;
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
        Err(last_err)
    }

    async fn final_status(&self) -> RunStatus {
        let graph = self.graph.read().await;
        let all_clean = graph.tasks().iter().all(|t| t.is_terminal());
        if all_clean {
            RunStatus::Success
        } else {
            RunStatus::PartialFailure
        }
    }

    async fn report(&self, status: RunStatus) -> Result<RunReport> {
        let graph = self.graph.read().await;
        let tasks: Vec<Task> = graph.tasks().into_iter().cloned().collect();
        let failed = graph
            .failed_tasks()
            .iter()
            .map(|t| FailureSummary {
                task_id: t.id,
                title: t.title.clone(),
                kind: t
                    .last_error
                    .as_ref()
                    .map(|e| e.kind)
                    .unwrap_or(FailureKind::WorkerFailure),
                attempts: t.attempts,
            })
            .collect();
        let checkpoint = {
            let store = self.store.read().await;
            store.latest_checkpoint()
        };
        Ok(RunReport {
            status,
            tasks,
            failed,
            checkpoint,
            metrics: self.monitor.report(),
        })
    }
}
