//! Execution layer - graph building, scheduling, and the runnable state machine.
//!
//! Declare a suite tree on an [`Orchestrator`], then [`Orchestrator::run`] it:
//! ```text
//! Declare → Prepare (resolve skip/only, build the DAG) → Run (drain the DAG)
//! ```

#![warn(missing_docs)]

pub mod body;
pub mod config;
pub mod listener;
pub mod orchestrator;
mod planner;
pub mod registry;
pub mod runnable;
pub mod suite;

pub use body::{Body, Done, TestFn};
pub use config::{RunConfig, DEFAULT_TIMEOUT};
pub use listener::{EventKind, EventListener, EventRecord, RecordingListener, RunEvent, TracingListener};
pub use orchestrator::Orchestrator;
pub use registry::{Registry, RunSummary};
pub use runnable::{Runnable, RunnableSpec};
pub use suite::Suite;
