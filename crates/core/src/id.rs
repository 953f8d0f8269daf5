//! Identifiers for graph entities.

use serde::{Deserialize, Serialize};

/// Identifier for a registered runnable.
///
/// Ids are handed out by the orchestrator at registration time, in strictly
/// increasing order, and double as the runnable's index in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunnableId(usize);

impl RunnableId {
    /// Create an id from a registry index.
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    /// Registry index of this id.
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for RunnableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier for a suite in the suite tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SuiteId(usize);

impl SuiteId {
    /// The root suite always has index zero.
    pub const ROOT: SuiteId = SuiteId(0);

    /// Create an id from a suite table index.
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    /// Suite table index of this id.
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for SuiteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
