//! Cascade cancellation and run aborts.

use crate::fixtures::{FailingWorker, SilentWorker};
use conductor::state::{StateStore, StoreOptions};
use conductor::{
    ReportOutcome, Scheduler, SchedulerConfig, TaskGraph, TaskSpec, TaskStatus, WorkerReport,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};

struct SchedulerUnderTest {
    scheduler: Scheduler,
    graph: Arc<RwLock<TaskGraph>>,
    _dir: tempfile::TempDir,
}

fn scheduler(pool_size: usize, retry_limit: u32) -> SchedulerUnderTest {
    let dir = tempfile::TempDir::new().unwrap();
    let graph = Arc::new(RwLock::new(TaskGraph::new()));
    let store = Arc::new(RwLock::new(
        StateStore::open(dir.path(), StoreOptions::default()).unwrap(),
    ));
    let (event_tx, _events) = mpsc::channel(64);
    let scheduler = Scheduler::new(
        Arc::clone(&graph),
        Arc::clone(&store),
        SchedulerConfig {
            pool_size,
            retry_limit,
            worker_timeout: Duration::from_secs(5),
        },
        event_tx,
    );
    SchedulerUnderTest {
        scheduler,
        graph,
        _dir: dir,
    }
}

/// Test: cancelling a root cancels its whole dependent closure and
/// nothing else
#[tokio::test]
async fn test_cascade_cancellation_scope() {
    let mut t = scheduler(2, 3);
    t.scheduler
        .register_worker(None, Arc::new(SilentWorker))
        .unwrap();

    let root = t
        .scheduler
        .submit(TaskSpec::new("root", "will be cancelled"))
        .await
        .unwrap();
    let child = t
        .scheduler
        .submit(TaskSpec::new("child", "depends on root").with_dependency(root))
        .await
        .unwrap();
    let grandchild = t
        .scheduler
        .submit(TaskSpec::new("grandchild", "depends on child").with_dependency(child))
        .await
        .unwrap();
    let bystander = t
        .scheduler
        .submit(TaskSpec::new("bystander", "independent"))
        .await
        .unwrap();

    let cancelled = t.scheduler.cancel(&root).await.unwrap();

    assert_eq!(cancelled.len(), 3);
    let graph = t.graph.read().await;
    assert_eq!(graph.get(&root).unwrap().status, TaskStatus::Cancelled);
    assert_eq!(graph.get(&child).unwrap().status, TaskStatus::Cancelled);
    assert_eq!(
        graph.get(&grandchild).unwrap().status,
        TaskStatus::Cancelled
    );
    assert_eq!(graph.get(&bystander).unwrap().status, TaskStatus::Ready);
}

/// Test: a running task's late result after cancellation is a no-op
#[tokio::test]
async fn test_late_result_after_cancel_discarded() {
    let mut t = scheduler(1, 3);
    t.scheduler
        .register_worker(None, Arc::new(SilentWorker))
        .unwrap();
    let id = t
        .scheduler
        .submit(TaskSpec::new("slow", "in flight"))
        .await
        .unwrap();
    t.scheduler.dispatch_ready().await.unwrap();

    let worker_id = {
        let graph = t.graph.read().await;
        graph.get(&id).unwrap().worker.unwrap()
    };
    t.scheduler.cancel(&id).await.unwrap();

    // The abandoned worker "finishes" anyway.
    let settled = t
        .scheduler
        .process(WorkerReport {
            worker_id,
            task_id: id,
            attempt: 1,
            outcome: ReportOutcome::Completed(serde_json::json!("late")),
        })
        .await
        .unwrap();

    assert!(settled.is_none());
    let graph = t.graph.read().await;
    let task = graph.get(&id).unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert!(task.result.is_none());
}

/// Test: a fatal task exhausting retries aborts the whole run
/// Given a fatal failing task and an unrelated in-flight task
/// Then the run stops, the bystander is cancelled, and the fatal task
/// stays Failed as the record of what happened
#[tokio::test]
async fn test_fatal_task_aborts_run() {
    let mut t = scheduler(2, 1);
    t.scheduler
        .register_worker(Some("broken".to_string()), Arc::new(FailingWorker))
        .unwrap();
    t.scheduler
        .register_worker(Some("slow".to_string()), Arc::new(SilentWorker))
        .unwrap();

    let doomed = t
        .scheduler
        .submit(
            TaskSpec::new("critical", "must not fail")
                .with_tag("broken")
                .fatal(),
        )
        .await
        .unwrap();
    let bystander = t
        .scheduler
        .submit(TaskSpec::new("bystander", "collateral").with_tag("slow"))
        .await
        .unwrap();

    t.scheduler.run_until_settled().await.unwrap();

    assert_eq!(t.scheduler.fatal_task(), Some(doomed));
    let graph = t.graph.read().await;
    assert!(matches!(
        graph.get(&doomed).unwrap().status,
        TaskStatus::Failed { .. }
    ));
    assert_eq!(
        graph.get(&bystander).unwrap().status,
        TaskStatus::Cancelled
    );
}

/// Test: cancellation while queued prevents dispatch entirely
#[tokio::test]
async fn test_cancelled_before_dispatch_never_runs() {
    let mut t = scheduler(1, 3);
    t.scheduler
        .register_worker(None, Arc::new(SilentWorker))
        .unwrap();
    let id = t
        .scheduler
        .submit(TaskSpec::new("queued", "not yet started"))
        .await
        .unwrap();

    t.scheduler.cancel(&id).await.unwrap();
    t.scheduler.run_until_settled().await.unwrap();

    let graph = t.graph.read().await;
    let task = graph.get(&id).unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert_eq!(task.attempts, 0);
    assert!(task.started_at.is_none());
}
