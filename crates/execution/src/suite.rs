//! Suites: hierarchical containers of runnables.

use crate::runnable::RunnableSpec;
use dagtest_core::{Exclusivity, ExecutionContext, RunnableId, RunnableKind, SuiteId};
use serde_json::{Map, Value};
use std::time::Duration;

/// A named container of runnables and child suites.
///
/// Suites live in the orchestrator's suite table; `parent` and `children`
/// are ids into that table. Runnable declarations sit in five buckets that
/// always run in the same order: beforeAll, beforeEach, tests, afterEach,
/// afterAll.
#[derive(Debug, Clone, Default)]
pub struct Suite {
    pub(crate) title: String,
    pub(crate) parent: Option<SuiteId>,
    pub(crate) children: Vec<SuiteId>,
    pub(crate) containers: Vec<SuiteId>,

    pub(crate) before_all: Vec<RunnableSpec>,
    pub(crate) before_each: Vec<RunnableSpec>,
    pub(crate) tests: Vec<RunnableSpec>,
    pub(crate) after_each: Vec<RunnableSpec>,
    pub(crate) after_all: Vec<RunnableSpec>,

    pub(crate) exclusivity: Exclusivity,
    pub(crate) test_exclusivity: Option<Exclusivity>,
    pub(crate) skip: bool,
    pub(crate) only: bool,
    pub(crate) timeout: Option<Duration>,

    pub(crate) context_overrides: Map<String, Value>,
    pub(crate) context: Option<ExecutionContext>,

    pub(crate) test_container: bool,
    pub(crate) prepared: bool,
    pub(crate) registered: Vec<RunnableId>,
    pub(crate) exit: Vec<RunnableId>,
}

impl Suite {
    /// Create an empty suite.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Wrap `test` with private copies of `before_each` and `after_each`.
    pub(crate) fn test_container(
        parent: SuiteId,
        parent_test_exclusivity: Option<Exclusivity>,
        mut test: RunnableSpec,
        before_each: &[RunnableSpec],
        after_each: &[RunnableSpec],
    ) -> Self {
        let exclusivity = test
            .exclusivity
            .or(parent_test_exclusivity)
            .unwrap_or_default();
        test.exclusivity = Some(exclusivity);

        let clone_hooks = |hooks: &[RunnableSpec]| {
            hooks
                .iter()
                .cloned()
                .map(|mut hook| {
                    hook.skip |= test.skip;
                    hook
                })
                .collect::<Vec<_>>()
        };

        Self {
            title: format!("{} Container", test.title),
            parent: Some(parent),
            before_all: clone_hooks(before_each),
            after_all: clone_hooks(after_each),
            exclusivity,
            test_exclusivity: parent_test_exclusivity,
            skip: test.skip,
            only: test.only,
            test_container: true,
            tests: vec![test],
            ..Default::default()
        }
    }

    /// Nothing else in the run may execute while this suite runs.
    pub fn globally_exclusive(mut self) -> Self {
        self.exclusivity = Exclusivity::Global;
        self
    }

    /// No sibling may execute while this suite runs.
    pub fn locally_exclusive(mut self) -> Self {
        self.exclusivity = Exclusivity::Local;
        self
    }

    /// Runnables below default to global exclusivity.
    pub fn globally_exclusive_tests(mut self) -> Self {
        self.test_exclusivity = Some(Exclusivity::Global);
        self
    }

    /// Runnables below default to local exclusivity.
    pub fn locally_exclusive_tests(mut self) -> Self {
        self.test_exclusivity = Some(Exclusivity::Local);
        self
    }

    /// Runnables below default to no exclusivity.
    pub fn non_exclusive_tests(mut self) -> Self {
        self.test_exclusivity = Some(Exclusivity::None);
        self
    }

    /// Mark this suite as the only thing to run.
    pub fn only(mut self) -> Self {
        self.only = true;
        self
    }

    /// Skip everything in this suite.
    pub fn skip(mut self) -> Self {
        self.skip = true;
        self
    }

    /// Default timeout for runnables below. `Duration::ZERO` disables timers.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Bind a context value for runnables in this suite and below.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context_overrides.insert(key.into(), value.into());
        self
    }

    /// Bind a context value on an existing suite.
    pub fn set_context(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.context_overrides.insert(key.into(), value.into());
    }

    /// Set suite exclusivity.
    pub fn set_exclusivity(&mut self, exclusivity: Exclusivity) {
        self.exclusivity = exclusivity;
    }

    /// Set the default exclusivity for runnables below.
    pub fn set_test_exclusivity(&mut self, exclusivity: Option<Exclusivity>) {
        self.test_exclusivity = exclusivity;
    }

    /// Set the only flag.
    pub fn set_only(&mut self, only: bool) {
        self.only = only;
    }

    /// Set the skip flag.
    pub fn set_skip(&mut self, skip: bool) {
        self.skip = skip;
    }

    /// Set the default timeout.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// File a declaration into the bucket matching its kind.
    pub(crate) fn push(&mut self, spec: RunnableSpec) {
        match spec.kind {
            RunnableKind::BeforeAll => self.before_all.push(spec),
            RunnableKind::BeforeEach => self.before_each.push(spec),
            RunnableKind::AfterEach => self.after_each.push(spec),
            RunnableKind::AfterAll => self.after_all.push(spec),
            RunnableKind::Test | RunnableKind::Barrier => self.tests.push(spec),
        }
    }

    /// Title.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Parent suite.
    pub fn parent(&self) -> Option<SuiteId> {
        self.parent
    }

    /// Declared child suites, in order.
    pub fn children(&self) -> &[SuiteId] {
        &self.children
    }

    /// Synthetic containers created around this suite's tests.
    pub fn containers(&self) -> &[SuiteId] {
        &self.containers
    }

    /// Declared tests.
    pub fn tests(&self) -> &[RunnableSpec] {
        &self.tests
    }

    /// beforeAll hooks.
    pub fn before_all(&self) -> &[RunnableSpec] {
        &self.before_all
    }

    /// beforeEach hooks, ancestors' first once prepared.
    pub fn before_each(&self) -> &[RunnableSpec] {
        &self.before_each
    }

    /// afterEach hooks, ancestors' last once prepared.
    pub fn after_each(&self) -> &[RunnableSpec] {
        &self.after_each
    }

    /// afterAll hooks.
    pub fn after_all(&self) -> &[RunnableSpec] {
        &self.after_all
    }

    /// Suite exclusivity.
    pub fn exclusivity(&self) -> Exclusivity {
        self.exclusivity
    }

    /// Default exclusivity for runnables below.
    pub fn test_exclusivity(&self) -> Option<Exclusivity> {
        self.test_exclusivity
    }

    /// Skip flag.
    pub fn is_skipped(&self) -> bool {
        self.skip
    }

    /// Only flag.
    pub fn is_only(&self) -> bool {
        self.only
    }

    /// Own timeout.
    pub fn timeout_value(&self) -> Option<Duration> {
        self.timeout
    }

    /// Whether this suite was synthesized around a single test.
    pub fn is_test_container(&self) -> bool {
        self.test_container
    }

    /// Whether the graph for this suite has been built.
    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// Runnables registered directly in this suite.
    pub fn registered(&self) -> &[RunnableId] {
        &self.registered
    }

    /// Frontier this suite left behind once prepared.
    pub fn exit(&self) -> &[RunnableId] {
        &self.exit
    }

    pub(crate) fn specs_mut(&mut self) -> impl Iterator<Item = &mut RunnableSpec> {
        self.before_all
            .iter_mut()
            .chain(self.before_each.iter_mut())
            .chain(self.tests.iter_mut())
            .chain(self.after_each.iter_mut())
            .chain(self.after_all.iter_mut())
    }
}
