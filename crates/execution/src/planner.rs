//! Graph builder: turns the suite tree into a DAG of runnables.
//!
//! Each suite is planned once, top-down, in a fixed order: entry fence,
//! beforeAll hooks, tests (wrapped in containers when each-hooks apply),
//! child suites, afterAll hooks, exit fence. While a suite is being planned
//! it keeps a frame with its frontier (what the next exclusive placement
//! waits on), the set of pending non-exclusive nodes, and the hooks whose
//! success everything later in the scope depends on.

use crate::registry::Registry;
use crate::runnable::{Runnable, RunnableSpec};
use crate::suite::Suite;
use dagtest_core::{Exclusivity, RunnableId, SuiteId};
use std::time::Duration;
use tracing::{debug, trace};

struct Frame {
    suite: SuiteId,
    frontier: Vec<RunnableId>,
    pending: Vec<RunnableId>,
    guards: Vec<RunnableId>,
}

impl Frame {
    fn new(suite: SuiteId, frontier: Vec<RunnableId>, guards: Vec<RunnableId>) -> Self {
        Self {
            suite,
            frontier,
            pending: Vec::new(),
            guards,
        }
    }
}

pub(crate) struct Planner<'a> {
    suites: &'a mut Vec<Suite>,
    registry: &'a mut Registry,
    default_timeout: Option<Duration>,
    /// Scope currently being planned.
    frame: Frame,
    /// Enclosing scopes, innermost last.
    outer: Vec<Frame>,
}

impl<'a> Planner<'a> {
    pub(crate) fn new(
        suites: &'a mut Vec<Suite>,
        registry: &'a mut Registry,
        default_timeout: Option<Duration>,
    ) -> Self {
        Self {
            suites,
            registry,
            default_timeout,
            frame: Frame::new(SuiteId::ROOT, Vec::new(), Vec::new()),
            outer: Vec::new(),
        }
    }

    /// Register a bodiless node. Barriers carry no success preconditions.
    pub(crate) fn register_barrier(
        &mut self,
        suite: SuiteId,
        title: &str,
        exclusivity: Exclusivity,
    ) -> RunnableId {
        let id = self.registry.next_id();
        let path = self.title_path(suite);
        self.registry
            .push(Runnable::barrier(id, suite, title, exclusivity, path));
        self.suites[suite.index()].registered.push(id);
        id
    }

    /// `id` waits on every open edge in the run, and every scope currently
    /// being planned restarts from it.
    pub(crate) fn place_global(&mut self, id: RunnableId) {
        let edges: Vec<_> = self
            .registry
            .open_edges()
            .into_iter()
            .filter(|edge| *edge != id)
            .collect();

        debug!(
            "Global fence {} ({}) after {} open edges",
            id,
            self.registry[id].full_title("/"),
            edges.len()
        );

        for edge in edges {
            self.registry.link(edge, id);
        }

        for frame in std::iter::once(&mut self.frame).chain(self.outer.iter_mut()) {
            frame.frontier = vec![id];
            frame.pending.clear();
        }
    }

    /// Plan `suite` starting from `root`. Returns the frontier it leaves
    /// behind. Planning an already planned suite returns the stored frontier.
    pub(crate) fn prepare_suite(
        &mut self,
        suite: SuiteId,
        root: Vec<RunnableId>,
        guards: Vec<RunnableId>,
    ) -> Vec<RunnableId> {
        if self.suites[suite.index()].prepared {
            return self.suites[suite.index()].exit.clone();
        }

        let enclosing = std::mem::replace(&mut self.frame, Frame::new(suite, root, guards));
        self.outer.push(enclosing);

        let exclusivity = self.suites[suite.index()].exclusivity;
        if exclusivity == Exclusivity::Global {
            let start = self.register_barrier(suite, "Global exclusive start", Exclusivity::Global);
            self.place_global(start);
        }

        let before_all = self.suites[suite.index()].before_all.clone();
        for hook in before_all {
            self.place_hook(suite, hook);
        }
        self.close_pending();

        self.place_tests(suite);
        self.close_pending();

        let children = self.suites[suite.index()].children.clone();
        for child in children {
            self.inherit(suite, child);
            self.place_suite(child);
        }
        self.close_pending();

        let after_all = self.suites[suite.index()].after_all.clone();
        for hook in after_all {
            self.place_hook(suite, hook);
        }
        self.close_pending();

        if exclusivity == Exclusivity::Global {
            let finish = self.register_barrier(suite, "Global exclusive finish", Exclusivity::Global);
            self.place_global(finish);
        }

        let enclosing = self
            .outer
            .pop()
            .unwrap_or_else(|| Frame::new(suite, Vec::new(), Vec::new()));
        let frontier = std::mem::replace(&mut self.frame, enclosing).frontier;

        let planned = &mut self.suites[suite.index()];
        planned.prepared = true;
        planned.exit = frontier.clone();
        frontier
    }

    fn place_tests(&mut self, suite: SuiteId) {
        let planned = &self.suites[suite.index()];
        let tests = planned.tests.clone();
        let before_each = planned.before_each.clone();
        let after_each = planned.after_each.clone();
        let test_exclusivity = planned.test_exclusivity;
        let wrap = !before_each.is_empty() || !after_each.is_empty();

        for test in tests {
            if wrap {
                let container = Suite::test_container(
                    suite,
                    test_exclusivity,
                    test,
                    &before_each,
                    &after_each,
                );
                let id = SuiteId::new(self.suites.len());
                self.suites.push(container);
                self.suites[suite.index()].containers.push(id);
                self.place_suite(id);
            } else {
                let exclusivity = test.exclusivity.or(test_exclusivity).unwrap_or_default();
                self.add(suite, test, exclusivity);
            }
        }
    }

    /// Hooks chain one after another and guard everything planned after them.
    fn place_hook(&mut self, suite: SuiteId, hook: RunnableSpec) {
        let exclusivity = match hook.exclusivity {
            Some(Exclusivity::Global) => Exclusivity::Global,
            _ => Exclusivity::Local,
        };
        let id = self.add(suite, hook, exclusivity);
        self.frame.guards.push(id);
    }

    /// Register `spec` and link it into the current scope.
    fn add(&mut self, suite: SuiteId, spec: RunnableSpec, exclusivity: Exclusivity) -> RunnableId {
        // Joins must exist before the node that waits on them.
        if exclusivity == Exclusivity::Local {
            self.close_pending();
        }

        let id = self.register(suite, spec, exclusivity);
        match exclusivity {
            Exclusivity::None => {
                self.wait_on_frontier(id);
                self.frame.pending.push(id);
            }
            Exclusivity::Local => {
                self.wait_on_frontier(id);
                self.frame.frontier = vec![id];
            }
            Exclusivity::Global => self.place_global(id),
        }
        id
    }

    /// Plan a child suite and place it as a single unit.
    fn place_suite(&mut self, child: SuiteId) {
        let exclusivity = self.suites[child.index()].exclusivity;
        if exclusivity.is_exclusive() {
            self.close_pending();
        }

        let root = self.frame.frontier.clone();
        let guards = self.frame.guards.clone();

        let registered_before = self.registry.len();
        let exit = self.prepare_suite(child, root, guards);
        if self.registry.len() == registered_before {
            return;
        }

        let frame = &mut self.frame;
        match exclusivity {
            Exclusivity::None => {
                for id in exit {
                    if !frame.pending.contains(&id) {
                        frame.pending.push(id);
                    }
                }
            }
            Exclusivity::Local | Exclusivity::Global => {
                frame.frontier = exit;
                frame.pending.clear();
            }
        }
    }

    /// Join pending non-exclusive nodes into a single frontier.
    fn close_pending(&mut self) {
        let frame = &mut self.frame;
        match frame.pending.len() {
            0 => {}
            1 => frame.frontier = std::mem::take(&mut frame.pending),
            _ => {
                let pending = std::mem::take(&mut frame.pending);
                let suite = frame.suite;
                let barrier = self.register_barrier(suite, "Non exclusives end", Exclusivity::Local);
                trace!("Joining {} pending runnables at {}", pending.len(), barrier);
                for id in pending {
                    self.registry.link(id, barrier);
                }
                self.frame.frontier = vec![barrier];
            }
        }
    }

    /// Push the parent's defaults and each-hooks down into `child`.
    fn inherit(&mut self, parent: SuiteId, child: SuiteId) {
        let from = &self.suites[parent.index()];
        let test_exclusivity = from.test_exclusivity;
        let skip = from.skip;
        let before_each = from.before_each.clone();
        let after_each = from.after_each.clone();

        let to = &mut self.suites[child.index()];
        if to.test_exclusivity.is_none() {
            to.test_exclusivity = test_exclusivity;
        }
        to.skip |= skip;

        let own_before = std::mem::replace(&mut to.before_each, before_each);
        to.before_each.extend(own_before);
        to.after_each.extend(after_each);
    }

    fn register(
        &mut self,
        suite: SuiteId,
        spec: RunnableSpec,
        exclusivity: Exclusivity,
    ) -> RunnableId {
        let id = self.registry.next_id();
        let timeout = self.resolve_timeout(suite, spec.timeout);
        let path = self.title_path(suite);

        let mut runnable = Runnable::from_spec(id, suite, spec, exclusivity, timeout, path);
        runnable.dependencies = self.frame.guards.clone();

        self.registry.push(runnable);
        self.suites[suite.index()].registered.push(id);
        id
    }

    fn wait_on_frontier(&mut self, id: RunnableId) {
        let frontier = self.frame.frontier.clone();
        for prior in frontier {
            self.registry.link(prior, id);
        }
    }

    fn resolve_timeout(&self, suite: SuiteId, own: Option<Duration>) -> Option<Duration> {
        let mut timeout = own;
        let mut cursor = Some(suite);
        while timeout.is_none() {
            let Some(id) = cursor else { break };
            timeout = self.suites[id.index()].timeout;
            cursor = self.suites[id.index()].parent;
        }

        timeout
            .or(self.default_timeout)
            .filter(|timeout| !timeout.is_zero())
    }

    /// Ancestor titles, root first. Containers are transparent.
    fn title_path(&self, suite: SuiteId) -> Vec<String> {
        let mut path = Vec::new();
        let mut cursor = Some(suite);
        while let Some(id) = cursor {
            let suite = &self.suites[id.index()];
            if !suite.test_container && !suite.title.is_empty() {
                path.push(suite.title.clone());
            }
            cursor = suite.parent;
        }
        path.reverse();
        path
    }
}

/// Apply only/skip filtering to the whole tree before anything is planned.
///
/// A suite whose subtree holds an `only` marker keeps its hooks; every test
/// and child suite next to that marker that carries none is skipped. A
/// skipped suite skips everything below it.
pub(crate) fn resolve_focus(suites: &mut [Suite]) {
    let mut has_only = vec![false; suites.len()];
    for index in (0..suites.len()).rev() {
        let suite = &suites[index];
        let marked = suite.only
            || suite.tests.iter().any(|t| t.only)
            || suite.children.iter().any(|c| has_only[c.index()]);
        has_only[index] = marked;
    }

    if !suites.is_empty() {
        apply_focus(suites, SuiteId::ROOT, false, &has_only);
    }
}

fn apply_focus(suites: &mut [Suite], id: SuiteId, forced: bool, has_only: &[bool]) {
    let suite = &mut suites[id.index()];
    suite.skip |= forced;
    let skip = suite.skip;
    let focused = suite.tests.iter().any(|t| t.only)
        || suite.children.iter().any(|c| has_only[c.index()]);

    if skip {
        suite.specs_mut().for_each(|spec| spec.skip = true);
    } else if focused {
        suite
            .tests
            .iter_mut()
            .filter(|t| !t.only)
            .for_each(|t| t.skip = true);
    }

    let children = suite.children.clone();
    for child in children {
        let forced = skip || (focused && !has_only[child.index()]);
        apply_focus(suites, child, forced, has_only);
    }
}
