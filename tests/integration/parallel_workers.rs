//! Bounded concurrency and worker matching.

use crate::fixtures::{engine, fast_config, CountingWorker, EchoWorker};
use conductor::{Config, RunStatus, StaticPlanner, TaskSpec};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Test: overlap never exceeds the pool size
/// Given 6 independent tasks and 2 workers that hold their slot briefly
/// Then at most 2 executions ever overlap and all 6 complete
#[tokio::test]
async fn test_concurrency_bounded_by_pool() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let specs = (0..6)
        .map(|i| TaskSpec::new(&format!("task-{}", i), "independent work"))
        .collect();
    let planner = Arc::new(StaticPlanner::new(specs));
    let config = Config {
        pool_size: 2,
        ..fast_config()
    };
    let mut e = engine(planner, config);
    for _ in 0..2 {
        e.orchestrator
            .register_worker(
                None,
                Arc::new(CountingWorker::new(
                    Arc::clone(&active),
                    Arc::clone(&peak),
                    Duration::from_millis(20),
                )),
            )
            .unwrap();
    }

    let report = e.orchestrator.run("goal").await.unwrap();

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.metrics.completed, 6);
    assert!(
        peak.load(Ordering::SeqCst) <= 2,
        "peak overlap {} exceeded pool size",
        peak.load(Ordering::SeqCst)
    );
}

/// Test: registration past pool_size is rejected
#[tokio::test]
async fn test_pool_size_enforced_at_registration() {
    let planner = Arc::new(StaticPlanner::new(Vec::new()));
    let config = Config {
        pool_size: 1,
        ..fast_config()
    };
    let mut e = engine(planner, config);
    e.orchestrator
        .register_worker(None, Arc::new(EchoWorker))
        .unwrap();

    let result = e.orchestrator.register_worker(None, Arc::new(EchoWorker));
    assert!(matches!(
        result,
        Err(conductor::Error::PoolFull { max: 1 })
    ));
}

/// Test: higher priority tasks dispatch first
/// Given one worker and three tasks with distinct priorities
/// Then start order follows priority descending
#[tokio::test]
async fn test_priority_dispatch_order() {
    let planner = Arc::new(StaticPlanner::new(vec![
        TaskSpec::new("low", "least urgent").with_priority(1),
        TaskSpec::new("high", "most urgent").with_priority(9),
        TaskSpec::new("mid", "in between").with_priority(5),
    ]));
    let config = Config {
        pool_size: 1,
        ..fast_config()
    };
    let mut e = engine(planner, config);
    e.orchestrator
        .register_worker(None, Arc::new(EchoWorker))
        .unwrap();

    let report = e.orchestrator.run("goal").await.unwrap();

    assert_eq!(report.status, RunStatus::Success);
    let mut started: Vec<_> = report.tasks.clone();
    started.sort_by_key(|t| t.started_at);
    let titles: Vec<&str> = started.iter().map(|t| t.title.as_str()).collect();
    assert_eq!(titles, vec!["high", "mid", "low"]);
}

/// Test: tagged tasks land on matching specialists
#[tokio::test]
async fn test_specialist_matching() {
    let dig = conductor::TaskId::new();
    let crunch = conductor::TaskId::new();
    let planner = Arc::new(StaticPlanner::new(vec![
        TaskSpec::new("dig", "collect data")
            .with_id(dig)
            .with_tag("research"),
        TaskSpec::new("crunch", "process data")
            .with_id(crunch)
            .with_tag("analysis"),
    ]));
    let mut e = engine(planner, fast_config());
    let researcher = e
        .orchestrator
        .register_worker(Some("research".to_string()), Arc::new(EchoWorker))
        .unwrap();
    let analyst = e
        .orchestrator
        .register_worker(Some("analysis".to_string()), Arc::new(EchoWorker))
        .unwrap();
    let mut events = e.orchestrator.take_events().unwrap();

    let report = e.orchestrator.run("goal").await.unwrap();
    assert_eq!(report.status, RunStatus::Success);

    let mut assignments = std::collections::HashMap::new();
    while let Ok(event) = events.try_recv() {
        if let conductor::SchedulerEvent::TaskStarted { task_id, worker_id } = event {
            assignments.insert(task_id, worker_id);
        }
    }
    assert_eq!(assignments.get(&dig), Some(&researcher));
    assert_eq!(assignments.get(&crunch), Some(&analyst));
}
