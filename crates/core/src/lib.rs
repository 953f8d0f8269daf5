//! dagtest core data models.
//!
//! Vocabulary shared by the scheduler and anything that observes it:
//! identities, run states and results, the error taxonomy, and the
//! execution context handed to test bodies.

#![warn(missing_docs)]

mod id;
mod status;
mod error;
mod context;

pub use id::{RunnableId, SuiteId};
pub use status::{Exclusivity, RunState, RunResult, RunnableKind};
pub use error::{RunError, EngineError};
pub use context::ExecutionContext;

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
