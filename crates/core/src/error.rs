//! Error taxonomy.

use crate::id::SuiteId;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Error recorded on a runnable.
///
/// Everything a body can do wrong (return an error, panic, never finish,
/// finish twice) is normalized into one of these before the state machine
/// looks at it.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RunError {
    /// The body reported an error
    #[error("{0}")]
    Failed(String),

    /// The body panicked
    #[error("body panicked: {0}")]
    Panicked(String),

    /// No completion before the deadline
    #[error("timeout of {}ms exceeded", .0.as_millis())]
    TimedOut(Duration),

    /// A hook this runnable depends on failed; carries its full title
    #[error("{0} dependency failed")]
    DependencyFailed(String),

    /// Every done handle was dropped without a completion
    #[error("done() handle dropped without completing")]
    DoneDropped,

    /// A completion arrived after the result was set
    #[error("done() called multiple times")]
    MultipleCompletions,
}

impl RunError {
    /// Wrap a panic payload. Payloads that are not strings are described
    /// rather than dropped.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        if let Some(s) = payload.downcast_ref::<&str>() {
            RunError::Panicked((*s).to_string())
        } else if let Some(s) = payload.downcast_ref::<String>() {
            RunError::Panicked(s.clone())
        } else {
            RunError::Panicked("non-string panic payload".to_string())
        }
    }
}

/// Structural errors raised by the orchestrator itself.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No suite with this id
    #[error("Suite not found: {0}")]
    SuiteNotFound(SuiteId),

    /// Declarations are frozen once the graph is built
    #[error("Cannot declare into suite {0} after it was prepared")]
    AlreadyPrepared(SuiteId),

    /// An orchestrator runs once
    #[error("Run already executed")]
    AlreadyRan,

    /// Only tests and hooks can be declared
    #[error("Runnables of kind {0} cannot be declared")]
    UndeclarableKind(String),
}
