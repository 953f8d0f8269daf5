//! Execution context shared by the runnables of a suite.

use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Flat key/value store handed to every body.
///
/// Cloning the handle shares the store. A child suite gets a new store via
/// [`ExecutionContext::derive`], which copies the parent's bindings at that
/// moment, so writes in one branch never leak into a sibling branch.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    values: Arc<RwLock<Map<String, Value>>>,
}

impl ExecutionContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context holding the given bindings.
    pub fn from_map(values: Map<String, Value>) -> Self {
        Self {
            values: Arc::new(RwLock::new(values)),
        }
    }

    /// Shallow copy of `self` with `overrides` applied on top.
    pub fn derive(&self, overrides: &Map<String, Value>) -> Self {
        let mut values = self.values.read().clone();
        for (key, value) in overrides {
            values.insert(key.clone(), value.clone());
        }
        Self::from_map(values)
    }

    /// Get a binding.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    /// Set a binding, returning the previous value.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.write().insert(key.into(), value.into())
    }

    /// Remove a binding.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.values.write().remove(key)
    }

    /// Whether a binding exists.
    pub fn contains(&self, key: &str) -> bool {
        self.values.read().contains_key(key)
    }

    /// Copy of every binding.
    pub fn snapshot(&self) -> Map<String, Value> {
        self.values.read().clone()
    }

    /// Whether two handles share one store.
    pub fn same_store(&self, other: &ExecutionContext) -> bool {
        Arc::ptr_eq(&self.values, &other.values)
    }
}
