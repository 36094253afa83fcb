//! Test fixtures for integration tests.
//!
//! Provides stub workers with scripted behavior, a simple engine harness
//! over a temporary state directory, and a fast test configuration.

use conductor::state::ContextHandle;
use conductor::{
    Assignment, Config, ExecuteResult, Orchestrator, Planner, Worker, WorkerFailure,
};
use futures::future::BoxFuture;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Configuration tuned for fast test runs.
pub fn fast_config() -> Config {
    Config {
        pool_size: 4,
        retry_limit: 2,
        worker_timeout_secs: 5,
        checkpoint_every_completions: 100,
        checkpoint_every_secs: 3600,
        ..Default::default()
    }
}

/// An orchestrator over a temporary state directory.
pub struct TestEngine {
    pub orchestrator: Orchestrator,
    pub dir: TempDir,
}

pub fn engine(planner: Arc<dyn Planner>, config: Config) -> TestEngine {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let orchestrator =
        Orchestrator::with_state_dir(planner, config, dir.path()).expect("Failed to build engine");
    TestEngine { orchestrator, dir }
}

/// Completes immediately, echoing the task title.
pub struct EchoWorker;

impl Worker for EchoWorker {
    fn execute(
        &self,
        assignment: Assignment,
        _context: ContextHandle,
    ) -> BoxFuture<'static, ExecuteResult> {
        Box::pin(async move { Ok(json!({ "task": assignment.title })) })
    }
}

/// Fails every attempt.
pub struct FailingWorker;

impl Worker for FailingWorker {
    fn execute(
        &self,
        _assignment: Assignment,
        _context: ContextHandle,
    ) -> BoxFuture<'static, ExecuteResult> {
        Box::pin(async { Err(WorkerFailure::new("scripted failure")) })
    }
}

/// Never reports back; exercises the worker timeout path.
pub struct SilentWorker;

impl Worker for SilentWorker {
    fn execute(
        &self,
        _assignment: Assignment,
        _context: ContextHandle,
    ) -> BoxFuture<'static, ExecuteResult> {
        Box::pin(futures::future::pending())
    }
}

/// Tracks how many executions overlap, for concurrency-bound assertions.
pub struct CountingWorker {
    pub active: Arc<AtomicUsize>,
    pub peak: Arc<AtomicUsize>,
    pub hold: Duration,
}

impl CountingWorker {
    pub fn new(active: Arc<AtomicUsize>, peak: Arc<AtomicUsize>, hold: Duration) -> Self {
        Self { active, peak, hold }
    }
}

impl Worker for CountingWorker {
    fn execute(
        &self,
        _assignment: Assignment,
        _context: ContextHandle,
    ) -> BoxFuture<'static, ExecuteResult> {
        let active = Arc::clone(&self.active);
        let peak = Arc::clone(&self.peak);
        let hold = self.hold;
        Box::pin(async move {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(hold).await;
            active.fetch_sub(1, Ordering::SeqCst);
            Ok(json!("counted"))
        })
    }
}

/// Produces or consumes working context depending on the task title.
///
/// A "produce" task writes its findings; a "consume" task reads them back
/// and returns them, exercising the context handle end to end.
pub struct ContextWorker;

impl Worker for ContextWorker {
    fn execute(
        &self,
        assignment: Assignment,
        context: ContextHandle,
    ) -> BoxFuture<'static, ExecuteResult> {
        Box::pin(async move {
            if assignment.title.starts_with("produce") {
                context
                    .write("findings/primary", "three competitors identified")
                    .await
                    .map_err(|e| WorkerFailure::new(e.to_string()))?;
                Ok(json!("produced"))
            } else {
                let findings = context
                    .read("findings/primary")
                    .await
                    .map_err(|e| WorkerFailure::new(e.to_string()))?;
                Ok(json!({ "findings": findings }))
            }
        })
    }
}
