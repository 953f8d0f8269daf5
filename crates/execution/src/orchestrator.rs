//! The orchestrator - owns the suite tree and the runnable graph, and runs it.
//!
//! A run goes through three phases:
//! ```text
//! Declare suites/runnables → Prepare (build the graph) → Run (drain it)
//! ```
//! The run loop is the only place runnable state changes. Bodies execute on
//! the tokio runtime and report back over a channel; the loop applies each
//! completion, then starts whatever became ready.

use crate::body::Signal;
use crate::config::RunConfig;
use crate::listener::{EventListener, RunEvent};
use crate::planner::{self, Planner};
use crate::registry::{Registry, RunSummary};
use crate::runnable::{Completion, Runnable, RunnableSpec};
use crate::suite::Suite;
use dagtest_core::{
    EngineError, Exclusivity, ExecutionContext, RunError, RunResult, RunnableId, RunnableKind,
    SuiteId,
};
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Instant;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, info, warn};

/// Builds and runs the runnable graph for a suite tree.
pub struct Orchestrator {
    config: RunConfig,
    suites: Vec<Suite>,
    registry: Registry,
    listeners: Vec<Box<dyn EventListener>>,
    prepared: bool,
    ran: bool,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Orchestrator {
    /// Create an orchestrator with an empty root suite.
    pub fn new() -> Self {
        let config = RunConfig::default();
        Self {
            suites: vec![Suite::new(config.root_title.clone())],
            config,
            registry: Registry::new(),
            listeners: Vec::new(),
            prepared: false,
            ran: false,
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: RunConfig) -> Self {
        self.suites[SuiteId::ROOT.index()].title = config.root_title.clone();
        self.config = config;
        self
    }

    /// Register a listener.
    pub fn with_listener(mut self, listener: impl EventListener + 'static) -> Self {
        self.add_listener(listener);
        self
    }

    /// Bind a context value visible to every runnable.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.suites[SuiteId::ROOT.index()].set_context(key, value);
        self
    }

    /// Register a listener.
    pub fn add_listener(&mut self, listener: impl EventListener + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Id of the root suite.
    pub fn root(&self) -> SuiteId {
        SuiteId::ROOT
    }

    /// Configuration in use.
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Attach `suite` as the last child of `parent`.
    pub fn add_suite(&mut self, parent: SuiteId, mut suite: Suite) -> Result<SuiteId, EngineError> {
        self.declarable(parent)?;

        let id = SuiteId::new(self.suites.len());
        suite.parent = Some(parent);
        suite.children.clear();
        self.suites.push(suite);
        self.suites[parent.index()].children.push(id);

        debug!("Added suite {} under {}", id, parent);
        Ok(id)
    }

    /// Add a test or hook to `suite`. Declaration order is run order within a bucket.
    pub fn add_runnable(&mut self, suite: SuiteId, spec: RunnableSpec) -> Result<(), EngineError> {
        self.declarable(suite)?;
        if spec.kind == RunnableKind::Barrier {
            return Err(EngineError::UndeclarableKind(spec.kind.to_string()));
        }
        self.suites[suite.index()].push(spec);
        Ok(())
    }

    /// Look up a suite.
    pub fn suite(&self, id: SuiteId) -> Option<&Suite> {
        self.suites.get(id.index())
    }

    /// Mutable access to a suite that has not been prepared.
    pub fn suite_mut(&mut self, id: SuiteId) -> Result<&mut Suite, EngineError> {
        self.declarable(id)?;
        Ok(&mut self.suites[id.index()])
    }

    /// Every suite, test containers included, in creation order.
    pub fn suites(&self) -> &[Suite] {
        &self.suites
    }

    fn declarable(&self, id: SuiteId) -> Result<(), EngineError> {
        let suite = self.suites.get(id.index()).ok_or(EngineError::SuiteNotFound(id))?;
        if self.prepared || suite.prepared {
            return Err(EngineError::AlreadyPrepared(id));
        }
        Ok(())
    }

    /// Resolve skip/only, then build the graph. Runs once; later calls do nothing.
    pub fn prepare(&mut self) {
        if self.prepared {
            return;
        }
        self.prepared = true;

        let root = &mut self.suites[SuiteId::ROOT.index()];
        if root.test_exclusivity.is_none() {
            root.test_exclusivity = self.config.default_test_exclusivity;
        }

        planner::resolve_focus(&mut self.suites);

        let mut planner = Planner::new(
            &mut self.suites,
            &mut self.registry,
            self.config.effective_timeout(),
        );
        let start = planner.register_barrier(SuiteId::ROOT, "start", Exclusivity::Global);
        planner.prepare_suite(SuiteId::ROOT, vec![start], Vec::new());
        let finish = planner.register_barrier(SuiteId::ROOT, "finish", Exclusivity::Global);
        planner.place_global(finish);

        info!(
            "Prepared {} runnables across {} suites",
            self.registry.len(),
            self.suites.len()
        );
    }

    /// Every registered runnable that nothing waits on yet.
    pub fn open_edges(&self) -> Vec<RunnableId> {
        self.registry.open_edges()
    }

    /// Registered runnables in id order.
    pub fn runnables(&self) -> impl Iterator<Item = &Runnable> {
        self.registry.iter()
    }

    /// Look up a registered runnable.
    pub fn runnable(&self, id: RunnableId) -> Option<&Runnable> {
        self.registry.get(id)
    }

    /// First registered runnable whose space-separated full title matches.
    pub fn find(&self, full_title: &str) -> Option<&Runnable> {
        self.registry.iter().find(|r| r.full_title(" ") == full_title)
    }

    /// The runnable table.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Prepare if needed, then run every runnable to completion.
    ///
    /// Body failures never abort the run; they are reflected in the
    /// returned summary and in each runnable's result.
    pub async fn run(&mut self) -> Result<RunSummary, EngineError> {
        if self.ran {
            return Err(EngineError::AlreadyRan);
        }
        self.ran = true;
        self.prepare();

        let Some(last) = self.registry.last_id() else {
            return Ok(RunSummary::default());
        };

        info!("Running {} runnables", self.registry.len());
        let started = Instant::now();
        let (tx, mut rx) = mpsc::unbounded_channel();
        emit(&self.listeners, &RunEvent::Start);

        let mut ready = VecDeque::from([RunnableId::new(0)]);
        self.drain(&mut ready, &tx);

        while !self.registry[last].is_completed() {
            // `tx` lives until the loop ends, so the channel stays open.
            let Some(signal) = rx.recv().await else {
                break;
            };

            match signal {
                // A hung body that dropped its handle is left to its timer.
                Signal::Settled {
                    id,
                    outcome: Err(RunError::DoneDropped),
                } if self.registry[id].timer.is_some() => {
                    debug!("Done handle of {} dropped; waiting for its timeout", id);
                }
                Signal::Settled { id, outcome } => {
                    self.complete(id, outcome.err(), None, &mut ready);
                }
                Signal::TimedOut { id, after } => {
                    self.complete(
                        id,
                        Some(RunError::TimedOut(after)),
                        Some(RunResult::Timeout),
                        &mut ready,
                    );
                }
            }
            self.drain(&mut ready, &tx);
        }

        emit(&self.listeners, &RunEvent::Finish);

        let summary = self.registry.summary(started.elapsed());
        info!(
            "Run finished: {} passed, {} failed, {} timed out, {} hook failures, {} skipped",
            summary.passes, summary.failures, summary.timeouts, summary.hook_failures, summary.skipped
        );
        Ok(summary)
    }

    fn drain(&mut self, ready: &mut VecDeque<RunnableId>, tx: &UnboundedSender<Signal>) {
        while let Some(id) = ready.pop_front() {
            self.try_start(id, ready, tx);
        }
    }

    fn try_start(
        &mut self,
        id: RunnableId,
        ready: &mut VecDeque<RunnableId>,
        tx: &UnboundedSender<Signal>,
    ) {
        if !self.registry[id].is_ready() {
            return;
        }

        if let Some(dependency) = self.registry.failed_dependency(id) {
            let title = self.registry[dependency].full_title(" ");
            self.complete(
                id,
                Some(RunError::DependencyFailed(title)),
                Some(RunResult::HookFailure),
                ready,
            );
            return;
        }

        if self.registry[id].skip {
            self.complete(id, None, Some(RunResult::Skipped), ready);
            return;
        }

        self.registry[id].mark_running();
        emit(&self.listeners, &RunEvent::RunnableStart(&self.registry[id]));

        // Barriers have nothing to wait for.
        let Some(body) = self.registry[id].body.clone() else {
            self.complete(id, None, None, ready);
            return;
        };

        let ctx = self.context_for(self.registry[id].suite);

        if let Some(after) = self.registry[id].timeout {
            let tx = tx.clone();
            self.registry[id].timer = Some(tokio::spawn(async move {
                tokio::time::sleep(after).await;
                let _ = tx.send(Signal::TimedOut { id, after });
            }));
        }

        body.spawn(id, ctx, tx.clone());
    }

    fn complete(
        &mut self,
        id: RunnableId,
        error: Option<RunError>,
        result: Option<RunResult>,
        ready: &mut VecDeque<RunnableId>,
    ) {
        match self.registry[id].finish(error, result) {
            Completion::Finished => {
                debug!("Completed {} as {:?}", id, self.registry[id].result);
                emit(&self.listeners, &RunEvent::RunnableFinish(&self.registry[id]));

                let next = self.registry[id].next.clone();
                for next_id in next {
                    self.registry[next_id].completed_priors += 1;
                    ready.push_back(next_id);
                }
            }
            Completion::Extra(error) => {
                warn!(
                    "{} completed again after {:?}: {}",
                    self.registry[id].full_title(" "),
                    self.registry[id].result,
                    error
                );
                emit(
                    &self.listeners,
                    &RunEvent::RunnableError(&self.registry[id], &error),
                );
            }
            Completion::Ignored => {
                debug!("Ignoring completion of timed out runnable {}", id);
            }
        }
    }

    /// Context of `suite`, built on first use.
    ///
    /// Test containers share their parent's store; every other suite gets
    /// a shallow copy of its parent's values plus its own bindings.
    fn context_for(&mut self, suite: SuiteId) -> ExecutionContext {
        let entry = &self.suites[suite.index()];
        if let Some(ctx) = &entry.context {
            return ctx.clone();
        }

        let parent = entry.parent;
        let shared = entry.test_container;
        let overrides = entry.context_overrides.clone();

        let ctx = match parent {
            Some(parent) if shared => self.context_for(parent),
            Some(parent) => self.context_for(parent).derive(&overrides),
            None => ExecutionContext::from_map(overrides),
        };

        self.suites[suite.index()].context = Some(ctx.clone());
        ctx
    }
}

fn emit(listeners: &[Box<dyn EventListener>], event: &RunEvent<'_>) {
    for listener in listeners {
        listener.on_event(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::Body;
    use crate::listener::{EventKind, RecordingListener, TracingListener};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn ok() -> Body {
        Body::sync(|_| Ok(()))
    }

    fn sleeping(ms: u64) -> Body {
        Body::sync(move |_| {
            std::thread::sleep(Duration::from_millis(ms));
            Ok(())
        })
    }

    async fn explode(_: ExecutionContext) -> anyhow::Result<()> {
        panic!("later")
    }

    fn result_of(o: &Orchestrator, title: &str) -> Option<RunResult> {
        o.find(title).and_then(Runnable::result)
    }

    #[tokio::test]
    async fn test_hooks_and_concurrent_tests() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let recorder = RecordingListener::new();
        let mut o = Orchestrator::new()
            .with_listener(recorder.clone())
            .with_listener(TracingListener);
        let s = o.add_suite(o.root(), Suite::new("S")).unwrap();

        let gate = Arc::new(tokio::sync::Barrier::new(2));
        let meet = move || {
            let gate = gate.clone();
            Body::future(move |_| {
                let gate = gate.clone();
                async move {
                    tokio::time::timeout(Duration::from_secs(1), gate.wait()).await?;
                    Ok::<(), anyhow::Error>(())
                }
            })
        };

        o.add_runnable(s, RunnableSpec::before_all("A", ok())).unwrap();
        o.add_runnable(s, RunnableSpec::test("T1", meet())).unwrap();
        o.add_runnable(s, RunnableSpec::test("T2", meet())).unwrap();
        o.add_runnable(s, RunnableSpec::after_all("B", ok())).unwrap();

        let summary = o.run().await.unwrap();

        assert_eq!(summary.tests, 2);
        assert_eq!(summary.passes, 2);
        assert!(summary.is_success());

        let started = recorder.started_titles();
        assert_eq!(started.first().map(String::as_str), Some("S A"));
        assert_eq!(started.last().map(String::as_str), Some("S B"));
        assert_eq!(recorder.of_kind(EventKind::Start).len(), 1);
        assert_eq!(recorder.of_kind(EventKind::Finish).len(), 1);
        assert!(o.runnables().all(Runnable::is_completed));

        let records = recorder.records();
        let position = |kind: EventKind, title: Option<&str>| {
            records
                .iter()
                .position(|r| r.kind == kind && r.title.as_deref() == title)
                .unwrap()
        };
        assert_eq!(position(EventKind::Start, None), 0);
        assert_eq!(position(EventKind::Finish, None), records.len() - 1);
        assert!(
            position(EventKind::RunnableFinish, Some("S B")) < position(EventKind::Finish, None)
        );
    }

    #[tokio::test]
    async fn test_timeout_silences_late_completion() {
        let recorder = RecordingListener::new();
        let mut o = Orchestrator::new().with_listener(recorder.clone());
        let root = o.root();

        let slow = Body::callback(|_, done| {
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                done.success();
            });
        });
        o.add_runnable(
            root,
            RunnableSpec::test("slow", slow)
                .locally_exclusive()
                .timeout(Duration::from_millis(10)),
        )
        .unwrap();
        o.add_runnable(root, RunnableSpec::test("after", sleeping(100)).locally_exclusive())
            .unwrap();

        let summary = o.run().await.unwrap();

        let slow = o.find("slow").unwrap();
        assert_eq!(slow.result(), Some(RunResult::Timeout));
        assert_eq!(slow.error(), Some(&RunError::TimedOut(Duration::from_millis(10))));
        assert!(slow.extra_errors().is_empty());
        assert_eq!(result_of(&o, "after"), Some(RunResult::Success));
        assert_eq!(summary.timeouts, 1);

        let finishes: Vec<_> = recorder
            .for_runnable(slow.id())
            .into_iter()
            .filter(|r| r.kind == EventKind::RunnableFinish)
            .collect();
        assert_eq!(finishes.len(), 1);
        assert!(recorder.of_kind(EventKind::RunnableError).is_empty());
    }

    #[tokio::test]
    async fn test_before_all_failure_cascades() {
        let ran = Arc::new(AtomicUsize::new(0));
        let counting = || {
            let ran = ran.clone();
            Body::sync(move |_| {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        };

        let mut o = Orchestrator::new();
        let s = o.add_suite(o.root(), Suite::new("S")).unwrap();
        let c = o.add_suite(s, Suite::new("C")).unwrap();
        o.add_runnable(s, RunnableSpec::before_all("setup", Body::sync(|_| anyhow::bail!("no db"))))
            .unwrap();
        o.add_runnable(s, RunnableSpec::test("T1", counting())).unwrap();
        o.add_runnable(s, RunnableSpec::test("T2", counting())).unwrap();
        o.add_runnable(c, RunnableSpec::test("T3", counting())).unwrap();
        o.add_runnable(s, RunnableSpec::after_all("teardown", counting())).unwrap();

        let summary = o.run().await.unwrap();

        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(result_of(&o, "S setup"), Some(RunResult::Failure));
        assert_eq!(result_of(&o, "S T1"), Some(RunResult::HookFailure));
        assert_eq!(result_of(&o, "S T2"), Some(RunResult::HookFailure));
        assert_eq!(result_of(&o, "S C T3"), Some(RunResult::HookFailure));
        assert_eq!(result_of(&o, "S teardown"), Some(RunResult::HookFailure));
        assert_eq!(
            o.find("S T1").and_then(Runnable::error),
            Some(&RunError::DependencyFailed("S setup".to_string()))
        );
        assert_eq!(summary.hook_failures, 3);
        assert!(!summary.is_success());
    }

    #[tokio::test]
    async fn test_before_each_failure_is_scoped_to_one_test() {
        let calls = Arc::new(AtomicUsize::new(0));
        let flaky = {
            let calls = calls.clone();
            Body::sync(move |_| {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    anyhow::bail!("first call fails");
                }
                Ok(())
            })
        };

        let mut o = Orchestrator::new();
        let s = o
            .add_suite(o.root(), Suite::new("S").locally_exclusive_tests())
            .unwrap();
        o.add_runnable(s, RunnableSpec::before_each("prepare", flaky)).unwrap();
        o.add_runnable(s, RunnableSpec::after_each("clean", ok())).unwrap();
        o.add_runnable(s, RunnableSpec::test("T1", ok())).unwrap();
        o.add_runnable(s, RunnableSpec::test("T2", ok())).unwrap();

        o.run().await.unwrap();

        assert_eq!(result_of(&o, "S T1"), Some(RunResult::HookFailure));
        assert_eq!(result_of(&o, "S T2"), Some(RunResult::Success));

        let cleans: Vec<_> = o
            .runnables()
            .filter(|r| r.title() == "clean")
            .map(|r| r.result())
            .collect();
        assert_eq!(
            cleans,
            vec![Some(RunResult::HookFailure), Some(RunResult::Success)]
        );
    }

    #[tokio::test]
    async fn test_second_done_call_is_recorded() {
        let recorder = RecordingListener::new();
        let mut o = Orchestrator::new().with_listener(recorder.clone());
        let root = o.root();

        let twice = Body::callback(|_, done| {
            done.success();
            done.fail(anyhow::anyhow!("again"));
        });
        o.add_runnable(root, RunnableSpec::test("twice", twice).locally_exclusive())
            .unwrap();
        o.add_runnable(root, RunnableSpec::test("later", sleeping(50)).locally_exclusive())
            .unwrap();

        o.run().await.unwrap();

        let twice = o.find("twice").unwrap();
        assert_eq!(twice.result(), Some(RunResult::Success));
        assert_eq!(twice.extra_errors(), &[RunError::Failed("again".to_string())]);

        let errors = recorder.of_kind(EventKind::RunnableError);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].runnable, Some(twice.id()));
    }

    #[tokio::test]
    async fn test_panics_fail_and_hung_bodies_time_out() {
        let mut o = Orchestrator::new();
        let root = o.root();
        o.add_runnable(root, RunnableSpec::test("panics", Body::sync(|_| panic!("boom"))))
            .unwrap();
        o.add_runnable(
            root,
            RunnableSpec::test("async panics", Body::future(explode)),
        )
        .unwrap();
        o.add_runnable(
            root,
            RunnableSpec::test("forgets", Body::callback(|_, _done| {}))
                .timeout(Duration::from_millis(10)),
        )
        .unwrap();
        o.add_runnable(root, RunnableSpec::test("fine", ok())).unwrap();

        let summary = o.run().await.unwrap();

        assert_eq!(
            o.find("panics").and_then(Runnable::error),
            Some(&RunError::Panicked("boom".to_string()))
        );
        assert_eq!(
            o.find("async panics").and_then(Runnable::error),
            Some(&RunError::Panicked("later".to_string()))
        );
        assert_eq!(result_of(&o, "forgets"), Some(RunResult::Timeout));
        assert_eq!(
            o.find("forgets").and_then(Runnable::error),
            Some(&RunError::TimedOut(Duration::from_millis(10)))
        );
        assert!(o.find("forgets").unwrap().extra_errors().is_empty());
        assert_eq!(result_of(&o, "fine"), Some(RunResult::Success));
        assert_eq!(summary.failures, 2);
        assert_eq!(summary.timeouts, 1);
        assert_eq!(summary.passes, 1);
    }

    #[tokio::test]
    async fn test_dropped_done_fails_fast_without_timer() {
        let mut o = Orchestrator::new().with_config(RunConfig::new().without_timeout());
        let root = o.root();
        o.add_runnable(root, RunnableSpec::test("forgets", Body::callback(|_, _done| {})))
            .unwrap();
        o.add_runnable(
            root,
            RunnableSpec::test("zero", Body::callback(|_, _done| {})).timeout(Duration::ZERO),
        )
        .unwrap();

        let summary = o.run().await.unwrap();

        for title in ["forgets", "zero"] {
            let r = o.find(title).unwrap();
            assert_eq!(r.timeout(), None);
            assert_eq!(r.result(), Some(RunResult::Failure));
            assert_eq!(r.error(), Some(&RunError::DoneDropped));
        }
        assert_eq!(summary.failures, 2);
    }

    #[tokio::test]
    async fn test_local_suite_failure_stays_inside_it() {
        let mut o = Orchestrator::new();
        let first = o
            .add_suite(o.root(), Suite::new("First").locally_exclusive())
            .unwrap();
        let second = o.add_suite(o.root(), Suite::new("Second")).unwrap();
        o.add_runnable(
            first,
            RunnableSpec::before_all("setup", Body::sync(|_| anyhow::bail!("broken fixture"))),
        )
        .unwrap();
        o.add_runnable(first, RunnableSpec::test("a", ok())).unwrap();
        o.add_runnable(second, RunnableSpec::test("b", ok())).unwrap();

        let summary = o.run().await.unwrap();

        assert_eq!(result_of(&o, "First setup"), Some(RunResult::Failure));
        assert_eq!(result_of(&o, "First a"), Some(RunResult::HookFailure));
        assert_eq!(result_of(&o, "Second b"), Some(RunResult::Success));
        assert!(o.find("Second b").unwrap().dependencies().is_empty());
        assert_eq!(summary.hook_failures, 1);
        assert_eq!(summary.passes, 1);
    }

    #[tokio::test]
    async fn test_sibling_contexts_are_isolated() {
        let mut o = Orchestrator::new().with_context("base", 1);
        let a = o
            .add_suite(o.root(), Suite::new("A").locally_exclusive().with_context("who", "a"))
            .unwrap();
        let b = o
            .add_suite(o.root(), Suite::new("B").locally_exclusive().with_context("who", "b"))
            .unwrap();

        o.add_runnable(
            a,
            RunnableSpec::before_all(
                "write",
                Body::sync(|ctx| {
                    ctx.set("shared", "from a");
                    Ok(())
                }),
            ),
        )
        .unwrap();
        o.add_runnable(
            a,
            RunnableSpec::test(
                "sees own write",
                Body::sync(|ctx| {
                    anyhow::ensure!(ctx.get("shared") == Some(json!("from a")), "missing write");
                    anyhow::ensure!(ctx.get("who") == Some(json!("a")), "wrong binding");
                    Ok(())
                }),
            ),
        )
        .unwrap();
        o.add_runnable(
            b,
            RunnableSpec::test(
                "sees no leak",
                Body::sync(|ctx| {
                    anyhow::ensure!(ctx.get("shared").is_none(), "sibling write leaked");
                    anyhow::ensure!(ctx.get("base") == Some(json!(1)), "root binding lost");
                    anyhow::ensure!(ctx.get("who") == Some(json!("b")), "wrong binding");
                    Ok(())
                }),
            ),
        )
        .unwrap();

        let summary = o.run().await.unwrap();
        assert_eq!(summary.passes, 2, "{:?}", o.find("B sees no leak").and_then(Runnable::error));
    }

    #[tokio::test]
    async fn test_each_hooks_share_the_suite_context() {
        let mut o = Orchestrator::new();
        let s = o.add_suite(o.root(), Suite::new("S")).unwrap();
        o.add_runnable(
            s,
            RunnableSpec::before_each(
                "mark",
                Body::sync(|ctx| {
                    ctx.set("marked", true);
                    Ok(())
                }),
            ),
        )
        .unwrap();
        o.add_runnable(
            s,
            RunnableSpec::test(
                "reads mark",
                Body::sync(|ctx| {
                    anyhow::ensure!(ctx.contains("marked"), "hook write not visible");
                    Ok(())
                }),
            ),
        )
        .unwrap();

        let summary = o.run().await.unwrap();
        assert_eq!(summary.passes, 1);
    }

    #[tokio::test]
    async fn test_skipped_runnables_finish_without_starting() {
        let recorder = RecordingListener::new();
        let mut o = Orchestrator::new().with_listener(recorder.clone());
        let root = o.root();
        o.add_runnable(root, RunnableSpec::test("skipped", ok()).skip()).unwrap();
        o.add_runnable(root, RunnableSpec::pending("later")).unwrap();

        let summary = o.run().await.unwrap();
        assert_eq!(summary.skipped, 2);

        for title in ["skipped", "later"] {
            let r = o.find(title).unwrap();
            let records = recorder.for_runnable(r.id());
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].kind, EventKind::RunnableFinish);
            assert_eq!(records[0].result, Some(RunResult::Skipped));
            assert!(r.started_at().is_none());
        }
    }

    #[tokio::test]
    async fn test_global_test_runs_alone() {
        let active = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicUsize::new(0));
        let tracked = |global: bool| {
            let active = active.clone();
            let overlap = overlap.clone();
            Body::sync(move |_| {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                if global && now > 1 {
                    overlap.fetch_add(1, Ordering::SeqCst);
                }
                std::thread::sleep(Duration::from_millis(30));
                if global && active.load(Ordering::SeqCst) > 1 {
                    overlap.fetch_add(1, Ordering::SeqCst);
                }
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
        };

        let mut o = Orchestrator::new();
        let a = o.add_suite(o.root(), Suite::new("A")).unwrap();
        let b = o.add_suite(o.root(), Suite::new("B")).unwrap();
        o.add_runnable(a, RunnableSpec::test("a1", tracked(false))).unwrap();
        o.add_runnable(a, RunnableSpec::test("a2", tracked(false))).unwrap();
        o.add_runnable(a, RunnableSpec::test("g", tracked(true)).globally_exclusive())
            .unwrap();
        o.add_runnable(a, RunnableSpec::test("a3", tracked(false))).unwrap();
        o.add_runnable(b, RunnableSpec::test("b1", tracked(false))).unwrap();
        o.add_runnable(b, RunnableSpec::test("b2", tracked(false))).unwrap();

        let summary = o.run().await.unwrap();
        assert_eq!(summary.passes, 6);
        assert_eq!(overlap.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_twice_is_rejected() {
        let mut o = Orchestrator::new();
        let root = o.root();
        o.add_runnable(root, RunnableSpec::test("t", ok())).unwrap();

        o.run().await.unwrap();
        assert!(matches!(o.run().await, Err(EngineError::AlreadyRan)));
    }

    #[test]
    fn test_declaring_after_prepare_is_rejected() {
        let mut o = Orchestrator::new();
        let s = o.add_suite(o.root(), Suite::new("S")).unwrap();
        o.prepare();

        assert!(matches!(
            o.add_runnable(s, RunnableSpec::test("late", ok())),
            Err(EngineError::AlreadyPrepared(_))
        ));
        assert!(matches!(
            o.add_suite(SuiteId::new(99), Suite::new("x")),
            Err(EngineError::SuiteNotFound(_))
        ));
    }

    #[test]
    fn test_barriers_cannot_be_declared() {
        let mut o = Orchestrator::new();
        let root = o.root();
        let barrier = RunnableSpec::new(RunnableKind::Barrier, "join", ok());

        assert!(matches!(
            o.add_runnable(root, barrier),
            Err(EngineError::UndeclarableKind(kind)) if kind == "barrier"
        ));
        assert!(o.suite(root).unwrap().tests().is_empty());
    }
}
