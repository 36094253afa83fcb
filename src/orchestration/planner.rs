//! Planner collaborator interface.
//!
//! The planner is external to the engine: it proposes task specs at the
//! Planning transition and may propose corrective tasks at Replanning.
//! What generates the specs (a model, a template, a human) is out of scope.

use crate::core::graph::GraphSnapshot;
use crate::core::task::TaskSpec;
use futures::future::BoxFuture;
use std::sync::Mutex;

/// Proposes tasks for a goal.
///
/// Called with the current graph snapshot so Replanning can see which
/// branches failed. Returning an empty list means the planner has nothing
/// further to propose.
pub trait Planner: Send + Sync {
    fn propose_tasks(
        &self,
        goal: &str,
        snapshot: GraphSnapshot,
    ) -> BoxFuture<'static, Vec<TaskSpec>>;
}

/// Planner with a fixed initial task set and no corrective proposals.
///
/// The first call drains the spec list; every later call returns nothing.
pub struct StaticPlanner {
    specs: Mutex<Vec<TaskSpec>>,
}

impl StaticPlanner {
    pub fn new(specs: Vec<TaskSpec>) -> Self {
        Self {
            specs: Mutex::new(specs),
        }
    }
}

impl Planner for StaticPlanner {
    fn propose_tasks(
        &self,
        _goal: &str,
        _snapshot: GraphSnapshot,
    ) -> BoxFuture<'static, Vec<TaskSpec>> {
        let specs = std::mem::take(&mut *self.specs.lock().unwrap());
        Box::pin(async move { specs })
    }
}
