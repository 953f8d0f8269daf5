//! Registry of every runnable in a run.

use crate::runnable::Runnable;
use dagtest_core::{RunResult, RunnableId, RunnableKind};
use serde::{Deserialize, Serialize};
use std::ops::{Index, IndexMut};
use std::time::Duration;

/// Flat table of runnables in registration order.
#[derive(Debug, Default)]
pub struct Registry {
    runnables: Vec<Runnable>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Id the next registered runnable will get.
    pub(crate) fn next_id(&self) -> RunnableId {
        RunnableId::new(self.runnables.len())
    }

    pub(crate) fn push(&mut self, runnable: Runnable) -> RunnableId {
        let id = runnable.id;
        debug_assert_eq!(id, self.next_id());
        self.runnables.push(runnable);
        id
    }

    /// Add an ordering edge. Duplicate edges are ignored.
    pub(crate) fn link(&mut self, prior: RunnableId, next: RunnableId) {
        if self[next].prior.contains(&prior) {
            return;
        }
        self[next].prior.push(prior);
        self[prior].next.push(next);
    }

    /// Number of registered runnables.
    pub fn len(&self) -> usize {
        self.runnables.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.runnables.is_empty()
    }

    /// Look up a runnable.
    pub fn get(&self, id: RunnableId) -> Option<&Runnable> {
        self.runnables.get(id.index())
    }

    /// All runnables in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Runnable> {
        self.runnables.iter()
    }

    /// Last registered runnable.
    pub fn last_id(&self) -> Option<RunnableId> {
        self.runnables.last().map(|r| r.id)
    }

    /// Every registered runnable that nothing waits on yet.
    pub fn open_edges(&self) -> Vec<RunnableId> {
        self.runnables
            .iter()
            .filter(|r| r.next.is_empty())
            .map(|r| r.id)
            .collect()
    }

    /// First success precondition of `id` that failed or timed out.
    pub(crate) fn failed_dependency(&self, id: RunnableId) -> Option<RunnableId> {
        self[id]
            .dependencies
            .iter()
            .copied()
            .find(|dep| self[*dep].result.is_some_and(RunResult::fails_dependants))
    }

    /// Per-result counts over tests.
    pub fn summary(&self, duration: Duration) -> RunSummary {
        let mut summary = RunSummary {
            duration,
            ..Default::default()
        };

        for runnable in self.runnables.iter().filter(|r| r.kind == RunnableKind::Test) {
            summary.tests += 1;
            match runnable.result {
                Some(RunResult::Success) => summary.passes += 1,
                Some(RunResult::Failure) => summary.failures += 1,
                Some(RunResult::Timeout) => summary.timeouts += 1,
                Some(RunResult::HookFailure) => summary.hook_failures += 1,
                Some(RunResult::Skipped) => summary.skipped += 1,
                None => {}
            }
        }

        summary
    }
}

impl Index<RunnableId> for Registry {
    type Output = Runnable;

    fn index(&self, id: RunnableId) -> &Runnable {
        &self.runnables[id.index()]
    }
}

impl IndexMut<RunnableId> for Registry {
    fn index_mut(&mut self, id: RunnableId) -> &mut Runnable {
        &mut self.runnables[id.index()]
    }
}

/// Aggregated outcome of a run, counted over tests only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Tests registered
    pub tests: usize,

    /// Tests that succeeded
    pub passes: usize,

    /// Tests that failed
    pub failures: usize,

    /// Tests that timed out
    pub timeouts: usize,

    /// Tests short-circuited by a failed hook
    pub hook_failures: usize,

    /// Tests skipped
    pub skipped: usize,

    /// Wall-clock duration of the run
    pub duration: Duration,
}

impl RunSummary {
    /// Whether no test failed, timed out, or lost its hooks.
    pub fn is_success(&self) -> bool {
        self.failures == 0 && self.timeouts == 0 && self.hook_failures == 0
    }
}
