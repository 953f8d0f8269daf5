//! Runnables: declarations and registered graph nodes.
//!
//! A [`RunnableSpec`] is what the declaration layer hands in. Once the graph
//! is built every spec that takes part in the run has been registered as a
//! [`Runnable`] with its own id, resolved settings, and edges. Each-hooks are
//! registered once per test they wrap, so one spec can produce many nodes.

use crate::body::Body;
use dagtest_core::{
    Exclusivity, RunError, RunResult, RunState, RunnableId, RunnableKind, SuiteId, Time,
};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Declaration of a test or hook.
#[derive(Debug, Clone)]
pub struct RunnableSpec {
    /// Title
    pub title: String,

    /// Kind
    pub kind: RunnableKind,

    /// Body; `None` marks a pending runnable, which is always skipped
    pub body: Option<Body>,

    /// Own exclusivity, if set
    pub exclusivity: Option<Exclusivity>,

    /// Skip flag
    pub skip: bool,

    /// Only flag
    pub only: bool,

    /// Own timeout, if set
    pub timeout: Option<Duration>,
}

impl RunnableSpec {
    /// Create a spec of the given kind.
    pub fn new(kind: RunnableKind, title: impl Into<String>, body: Body) -> Self {
        Self {
            title: title.into(),
            kind,
            body: Some(body),
            exclusivity: None,
            skip: false,
            only: false,
            timeout: None,
        }
    }

    /// A test.
    pub fn test(title: impl Into<String>, body: Body) -> Self {
        Self::new(RunnableKind::Test, title, body)
    }

    /// A test without a body. It is reported as skipped.
    pub fn pending(title: impl Into<String>) -> Self {
        Self {
            body: None,
            skip: true,
            ..Self::test(title, Body::sync(|_| Ok(())))
        }
    }

    /// A beforeAll hook.
    pub fn before_all(title: impl Into<String>, body: Body) -> Self {
        Self::new(RunnableKind::BeforeAll, title, body)
    }

    /// An afterAll hook.
    pub fn after_all(title: impl Into<String>, body: Body) -> Self {
        Self::new(RunnableKind::AfterAll, title, body)
    }

    /// A beforeEach hook.
    pub fn before_each(title: impl Into<String>, body: Body) -> Self {
        Self::new(RunnableKind::BeforeEach, title, body)
    }

    /// An afterEach hook.
    pub fn after_each(title: impl Into<String>, body: Body) -> Self {
        Self::new(RunnableKind::AfterEach, title, body)
    }

    /// Nothing else in the run may execute concurrently.
    pub fn globally_exclusive(mut self) -> Self {
        self.exclusivity = Some(Exclusivity::Global);
        self
    }

    /// No sibling may execute concurrently.
    pub fn locally_exclusive(mut self) -> Self {
        self.exclusivity = Some(Exclusivity::Local);
        self
    }

    /// May execute alongside non-exclusive siblings.
    pub fn non_exclusive(mut self) -> Self {
        self.exclusivity = Some(Exclusivity::None);
        self
    }

    /// Mark as the only thing to run.
    pub fn only(mut self) -> Self {
        self.only = true;
        self
    }

    /// Mark as skipped.
    pub fn skip(mut self) -> Self {
        self.skip = true;
        self
    }

    /// Set the timeout. `Duration::ZERO` disables the timer.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Outcome of handing a completion to a runnable.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Completion {
    /// The runnable reached its terminal state.
    Finished,
    /// Late signal after a timeout; dropped.
    Ignored,
    /// Late signal after any other terminal result; kept as an extra error.
    Extra(RunError),
}

/// A registered node of the execution graph.
#[derive(Debug)]
pub struct Runnable {
    pub(crate) id: RunnableId,
    pub(crate) title: String,
    pub(crate) title_path: Vec<String>,
    pub(crate) kind: RunnableKind,
    pub(crate) exclusivity: Exclusivity,
    pub(crate) skip: bool,
    pub(crate) only: bool,
    pub(crate) timeout: Option<Duration>,
    pub(crate) body: Option<Body>,
    pub(crate) suite: SuiteId,

    pub(crate) state: RunState,
    pub(crate) result: Option<RunResult>,
    pub(crate) error: Option<RunError>,
    pub(crate) extra_errors: Vec<RunError>,
    pub(crate) started_at: Option<Time>,
    pub(crate) duration: Option<Duration>,

    pub(crate) prior: Vec<RunnableId>,
    pub(crate) next: Vec<RunnableId>,
    pub(crate) dependencies: Vec<RunnableId>,
    pub(crate) completed_priors: usize,

    started: Option<Instant>,
    pub(crate) timer: Option<JoinHandle<()>>,
}

impl Runnable {
    pub(crate) fn from_spec(
        id: RunnableId,
        suite: SuiteId,
        spec: RunnableSpec,
        exclusivity: Exclusivity,
        timeout: Option<Duration>,
        title_path: Vec<String>,
    ) -> Self {
        Self {
            id,
            title: spec.title,
            title_path,
            kind: spec.kind,
            exclusivity,
            skip: spec.skip || spec.body.is_none(),
            only: spec.only,
            timeout,
            body: spec.body,
            suite,
            state: RunState::Waiting,
            result: None,
            error: None,
            extra_errors: Vec::new(),
            started_at: None,
            duration: None,
            prior: Vec::new(),
            next: Vec::new(),
            dependencies: Vec::new(),
            completed_priors: 0,
            started: None,
            timer: None,
        }
    }

    pub(crate) fn barrier(
        id: RunnableId,
        suite: SuiteId,
        title: impl Into<String>,
        exclusivity: Exclusivity,
        title_path: Vec<String>,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            title_path,
            kind: RunnableKind::Barrier,
            exclusivity,
            skip: false,
            only: false,
            timeout: None,
            body: None,
            suite,
            state: RunState::Waiting,
            result: None,
            error: None,
            extra_errors: Vec::new(),
            started_at: None,
            duration: None,
            prior: Vec::new(),
            next: Vec::new(),
            dependencies: Vec::new(),
            completed_priors: 0,
            started: None,
            timer: None,
        }
    }

    /// Id assigned at registration.
    pub fn id(&self) -> RunnableId {
        self.id
    }

    /// Own title.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Title chain from the root, joined by `separator`.
    pub fn full_title(&self, separator: &str) -> String {
        self.title_path
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.title.as_str()))
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(separator)
    }

    /// Kind.
    pub fn kind(&self) -> RunnableKind {
        self.kind
    }

    /// Resolved exclusivity.
    pub fn exclusivity(&self) -> Exclusivity {
        self.exclusivity
    }

    /// Whether the body will be bypassed.
    pub fn is_skipped(&self) -> bool {
        self.skip
    }

    /// Whether this was marked only.
    pub fn is_only(&self) -> bool {
        self.only
    }

    /// Resolved timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Owning suite.
    pub fn suite(&self) -> SuiteId {
        self.suite
    }

    /// Current state.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Result, once completed.
    pub fn result(&self) -> Option<RunResult> {
        self.result
    }

    /// Error that decided the result, if any.
    pub fn error(&self) -> Option<&RunError> {
        self.error.as_ref()
    }

    /// Errors from completion signals that arrived after the result was set.
    pub fn extra_errors(&self) -> &[RunError] {
        &self.extra_errors
    }

    /// Wall-clock time the runnable entered RUNNING.
    pub fn started_at(&self) -> Option<Time> {
        self.started_at
    }

    /// Time spent running, once completed.
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    /// Runnables that must complete before this one starts.
    pub fn prior_runnables(&self) -> &[RunnableId] {
        &self.prior
    }

    /// Runnables waiting on this one.
    pub fn next_runnables(&self) -> &[RunnableId] {
        &self.next
    }

    /// Runnables that must not fail for this one to run its body.
    pub fn dependencies(&self) -> &[RunnableId] {
        &self.dependencies
    }

    /// Whether the terminal state was reached.
    pub fn is_completed(&self) -> bool {
        self.state == RunState::Completed
    }

    /// Waiting, and every prior has completed.
    pub(crate) fn is_ready(&self) -> bool {
        self.state == RunState::Waiting && self.completed_priors >= self.prior.len()
    }

    pub(crate) fn mark_running(&mut self) {
        self.state = RunState::Running;
        self.started_at = Some(chrono::Utc::now());
        self.started = Some(Instant::now());
    }

    /// Apply a completion. Only the first one sets the result.
    pub(crate) fn finish(&mut self, error: Option<RunError>, result: Option<RunResult>) -> Completion {
        if self.state == RunState::Completed {
            if self.result == Some(RunResult::Timeout) || result == Some(RunResult::Timeout) {
                return Completion::Ignored;
            }

            let extra = error.unwrap_or(RunError::MultipleCompletions);
            self.extra_errors.push(extra.clone());
            return Completion::Extra(extra);
        }

        let result = match (result, &error) {
            (Some(result), _) => result,
            (None, Some(_)) => RunResult::Failure,
            (None, None) => RunResult::Success,
        };

        self.result = Some(result);
        self.error = error;
        self.state = RunState::Completed;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.duration = Some(self.started.map(|s| s.elapsed()).unwrap_or_default());

        Completion::Finished
    }
}
