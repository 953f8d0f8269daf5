//! Fixed vocabularies shared by the scheduler and its reporters.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a runnable or suite may overlap with its neighbours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Exclusivity {
    /// May run concurrently with siblings.
    #[default]
    None,
    /// Waits for pending siblings, then blocks later siblings until it finishes.
    Local,
    /// Mutually exclusive with every other runnable in the run.
    Global,
}

impl Exclusivity {
    /// Whether this level fences anything at all.
    pub fn is_exclusive(self) -> bool {
        !matches!(self, Exclusivity::None)
    }
}

impl fmt::Display for Exclusivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exclusivity::None => write!(f, "none"),
            Exclusivity::Local => write!(f, "local"),
            Exclusivity::Global => write!(f, "global"),
        }
    }
}

/// Run state of a runnable. Transitions are one-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Not started; waiting on priors.
    #[default]
    Waiting,
    /// Body is in flight.
    Running,
    /// Terminal.
    Completed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Waiting => write!(f, "waiting"),
            RunState::Running => write!(f, "running"),
            RunState::Completed => write!(f, "completed"),
        }
    }
}

/// Outcome of a completed runnable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunResult {
    /// Body completed without error.
    Success,
    /// Body failed, panicked, or signalled an error.
    Failure,
    /// Wall-clock timeout elapsed first.
    Timeout,
    /// A success precondition failed; the body never ran.
    HookFailure,
    /// Skipped; the body never ran.
    Skipped,
}

impl RunResult {
    /// Whether dependants guarded by this result must short-circuit.
    pub fn fails_dependants(self) -> bool {
        matches!(self, RunResult::Failure | RunResult::Timeout)
    }
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunResult::Success => write!(f, "success"),
            RunResult::Failure => write!(f, "failure"),
            RunResult::Timeout => write!(f, "timeout"),
            RunResult::HookFailure => write!(f, "hook failure"),
            RunResult::Skipped => write!(f, "skipped"),
        }
    }
}

/// What a runnable is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnableKind {
    /// An actual test.
    Test,
    /// Runs once before everything else in its suite.
    BeforeAll,
    /// Runs once after everything else in its suite.
    AfterAll,
    /// Cloned in front of every test in its suite and descendant suites.
    BeforeEach,
    /// Cloned behind every test in its suite and descendant suites.
    AfterEach,
    /// Synthetic, bodiless join or fence node.
    Barrier,
}

impl RunnableKind {
    /// Hooks are every kind except tests and barriers.
    pub fn is_hook(self) -> bool {
        matches!(
            self,
            RunnableKind::BeforeAll
                | RunnableKind::AfterAll
                | RunnableKind::BeforeEach
                | RunnableKind::AfterEach
        )
    }
}

impl fmt::Display for RunnableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnableKind::Test => write!(f, "test"),
            RunnableKind::BeforeAll => write!(f, "beforeAll"),
            RunnableKind::AfterAll => write!(f, "afterAll"),
            RunnableKind::BeforeEach => write!(f, "beforeEach"),
            RunnableKind::AfterEach => write!(f, "afterEach"),
            RunnableKind::Barrier => write!(f, "barrier"),
        }
    }
}
