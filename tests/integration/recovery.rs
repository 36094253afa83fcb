//! Checkpoint/restore, timeouts, and lost workers.

use crate::fixtures::{engine, fast_config, EchoWorker, SilentWorker};
use conductor::state::{StateStore, StoreOptions};
use conductor::{
    Config, FailureKind, RunStatus, StaticPlanner, TaskGraph, TaskSpec, TaskStatus,
};
use std::sync::Arc;

/// Test: checkpoint then restore reproduces identical task state
#[tokio::test]
async fn test_checkpoint_restore_roundtrip() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut store = StateStore::open(dir.path(), StoreOptions::default()).unwrap();

    let mut graph = TaskGraph::new();
    let a = graph
        .add_task(TaskSpec::new("task-a", "root"))
        .unwrap();
    graph
        .add_task(TaskSpec::new("task-b", "leaf").with_dependency(a))
        .unwrap();

    let seq = store.checkpoint(&graph).unwrap();
    let restored = store.restore(seq).unwrap();

    assert_eq!(restored.len(), 2);
    for task in graph.tasks() {
        let restored_task = restored.get(&task.id).unwrap();
        assert_eq!(restored_task.status, task.status);
        assert_eq!(restored_task.result, task.result);
        assert_eq!(restored_task.depends_on, task.depends_on);
    }
}

/// Test: a run cut off by its budget resumes from the checkpoint
/// Given a 3-task plan and a step budget of 1
/// When a second engine resumes from the reported checkpoint
/// Then the remaining tasks complete and the run ends Success
#[tokio::test]
async fn test_interrupted_run_resumes() {
    let specs = vec![
        TaskSpec::new("step-1", "work"),
        TaskSpec::new("step-2", "work"),
        TaskSpec::new("step-3", "work"),
    ];

    let dir = tempfile::TempDir::new().unwrap();
    let seq = {
        let config = Config {
            step_budget: Some(1),
            pool_size: 1,
            ..fast_config()
        };
        let planner = Arc::new(StaticPlanner::new(specs));
        let mut orchestrator =
            conductor::Orchestrator::with_state_dir(planner, config, dir.path()).unwrap();
        orchestrator
            .register_worker(None, Arc::new(EchoWorker))
            .unwrap();
        let report = orchestrator.run("goal").await.unwrap();
        assert_eq!(report.status, RunStatus::Incomplete);
        report.checkpoint.expect("checkpoint preserved for resumption")
    };

    let planner = Arc::new(StaticPlanner::new(Vec::new()));
    let mut orchestrator =
        conductor::Orchestrator::with_state_dir(planner, fast_config(), dir.path()).unwrap();
    orchestrator
        .register_worker(None, Arc::new(EchoWorker))
        .unwrap();

    let report = orchestrator.resume("goal", seq).await.unwrap();

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.tasks.len(), 3);
    assert!(report
        .tasks
        .iter()
        .all(|t| t.status == TaskStatus::Completed));
}

/// Test: a worker that never reports is timed out and retried
/// Given the worker timeout is short and the retry limit is 2
/// Then the task ends Failed with WorkerTimeout after 2 attempts
#[tokio::test]
async fn test_silent_worker_times_out_and_exhausts() {
    let planner = Arc::new(StaticPlanner::new(vec![TaskSpec::new(
        "stuck",
        "never finishes",
    )]));
    let config = Config {
        pool_size: 1,
        retry_limit: 2,
        worker_timeout_secs: 1,
        ..fast_config()
    };
    let mut e = engine(planner, config);
    e.orchestrator
        .register_worker(None, Arc::new(SilentWorker))
        .unwrap();

    let report = e.orchestrator.run("goal").await.unwrap();

    assert_eq!(report.status, RunStatus::PartialFailure);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].kind, FailureKind::WorkerTimeout);
    assert_eq!(report.failed[0].attempts, 2);
}

/// Test: deregistering a busy worker reroutes its task
/// Given a silent worker holding a task
/// When it is deregistered and a healthy worker registered
/// Then the task retries elsewhere and completes
#[tokio::test]
async fn test_lost_worker_task_is_rerouted() {
    use conductor::{Scheduler, SchedulerConfig, TaskStatus};
    use tokio::sync::{mpsc, RwLock};

    let dir = tempfile::TempDir::new().unwrap();
    let graph = Arc::new(RwLock::new(TaskGraph::new()));
    let store = Arc::new(RwLock::new(
        StateStore::open(dir.path(), StoreOptions::default()).unwrap(),
    ));
    let (event_tx, _events) = mpsc::channel(64);
    let mut scheduler = Scheduler::new(
        Arc::clone(&graph),
        Arc::clone(&store),
        SchedulerConfig {
            pool_size: 2,
            retry_limit: 3,
            worker_timeout: std::time::Duration::from_secs(5),
        },
        event_tx,
    );

    let silent = scheduler
        .register_worker(None, Arc::new(SilentWorker))
        .unwrap();
    let id = scheduler
        .submit(TaskSpec::new("travelling", "work"))
        .await
        .unwrap();
    scheduler.dispatch_ready().await.unwrap();

    scheduler.deregister_worker(&silent).await.unwrap();
    scheduler
        .register_worker(None, Arc::new(EchoWorker))
        .unwrap();
    scheduler.run_until_settled().await.unwrap();

    let graph = graph.read().await;
    let task = graph.get(&id).unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(
        task.last_error.as_ref().unwrap().kind,
        FailureKind::WorkerLost
    );
}

/// Test: store state survives process restart
#[tokio::test]
async fn test_store_durable_across_reopen() {
    let dir = tempfile::TempDir::new().unwrap();
    let seq = {
        let mut store = StateStore::open(dir.path(), StoreOptions::default()).unwrap();
        store
            .put("tasks/alpha", serde_json::json!({"title": "alpha"}))
            .unwrap();
        store.put_context("notes/a", "remember this").unwrap();
        store.checkpoint(&TaskGraph::new()).unwrap()
    };

    let mut store = StateStore::open(dir.path(), StoreOptions::default()).unwrap();
    assert!(store.get("tasks/alpha").is_ok());
    assert_eq!(store.read_context("notes/a").unwrap(), "remember this");
    assert_eq!(store.latest_checkpoint(), Some(seq));
    assert!(store.restore(seq).is_ok());
}
