//! Run-level execution metrics.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Aggregated metrics for one run, part of the final report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    /// Tasks that reached a counted terminal outcome.
    pub total_tasks: u64,
    /// Tasks completed successfully.
    pub completed: u64,
    /// Tasks left Failed after exhausting retries.
    pub failed: u64,
    /// completed / total, 0.0 for an empty run.
    pub success_rate: f64,
    /// Mean duration of successful tasks, in seconds.
    pub avg_task_duration_secs: f64,
    /// Accumulated execution time of successful tasks, in seconds.
    pub total_execution_secs: f64,
}

/// Tracks task outcomes and durations during a run.
#[derive(Debug, Default)]
pub struct ExecutionMonitor {
    completed: u64,
    failed: u64,
    execution: Duration,
}

impl ExecutionMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful task and its attempt duration.
    pub fn log_completion(&mut self, duration: Duration) {
        self.completed += 1;
        self.execution += duration;
    }

    /// Record a task that exhausted its retries.
    pub fn log_failure(&mut self) {
        self.failed += 1;
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }

    /// Produce the metrics summary.
    pub fn report(&self) -> RunMetrics {
        let total = self.completed + self.failed;
        let success_rate = if total > 0 {
            self.completed as f64 / total as f64
        } else {
            0.0
        };
        let avg = if self.completed > 0 {
            self.execution.as_secs_f64() / self.completed as f64
        } else {
            0.0
        };
        RunMetrics {
            total_tasks: total,
            completed: self.completed,
            failed: self.failed,
            success_rate,
            avg_task_duration_secs: avg,
            total_execution_secs: self.execution.as_secs_f64(),
        }
    }
}
