//! Run events and the listeners that observe them.
//!
//! Listeners are called synchronously from the orchestrator's loop, in the
//! order events happen. A listener must not block.

use crate::runnable::Runnable;
use dagtest_core::{RunError, RunResult, RunnableId, RunnableKind, Time};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Something that happened during a run.
#[derive(Debug, Clone, Copy)]
pub enum RunEvent<'a> {
    /// The run is about to start.
    Start,
    /// A runnable entered RUNNING.
    RunnableStart(&'a Runnable),
    /// A runnable reached its result.
    RunnableFinish(&'a Runnable),
    /// A completion signal arrived after the result was set.
    RunnableError(&'a Runnable, &'a RunError),
    /// Every runnable has completed.
    Finish,
}

impl RunEvent<'_> {
    /// Kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            RunEvent::Start => EventKind::Start,
            RunEvent::RunnableStart(_) => EventKind::RunnableStart,
            RunEvent::RunnableFinish(_) => EventKind::RunnableFinish,
            RunEvent::RunnableError(..) => EventKind::RunnableError,
            RunEvent::Finish => EventKind::Finish,
        }
    }

    /// Runnable this event is about, if any.
    pub fn runnable(&self) -> Option<&Runnable> {
        match self {
            RunEvent::RunnableStart(r)
            | RunEvent::RunnableFinish(r)
            | RunEvent::RunnableError(r, _) => Some(*r),
            RunEvent::Start | RunEvent::Finish => None,
        }
    }
}

/// Event kind without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Run start
    Start,
    /// Runnable start
    RunnableStart,
    /// Runnable finish
    RunnableFinish,
    /// Late runnable error
    RunnableError,
    /// Run finish
    Finish,
}

/// Observer of run events.
pub trait EventListener: Send + Sync {
    /// Called for every event, in order.
    fn on_event(&self, event: &RunEvent<'_>);
}

/// Logs every event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingListener;

impl EventListener for TracingListener {
    fn on_event(&self, event: &RunEvent<'_>) {
        match event {
            RunEvent::Start => info!("Run started"),
            RunEvent::RunnableStart(r) => {
                if r.kind() != RunnableKind::Barrier {
                    debug!("Started {} {}", r.kind(), r.full_title(" "));
                }
            }
            RunEvent::RunnableFinish(r) => match (r.result(), r.error()) {
                (Some(result), Some(error)) => {
                    info!("{} {}: {} ({})", r.kind(), r.full_title(" "), result, error)
                }
                (Some(result), None) if r.kind() != RunnableKind::Barrier => {
                    info!("{} {}: {}", r.kind(), r.full_title(" "), result)
                }
                _ => {}
            },
            RunEvent::RunnableError(r, error) => {
                warn!("{} {} reported again: {}", r.kind(), r.full_title(" "), error)
            }
            RunEvent::Finish => info!("Run finished"),
        }
    }
}

/// One recorded event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Kind
    pub kind: EventKind,
    /// Runnable, for runnable events
    pub runnable: Option<RunnableId>,
    /// Full title of the runnable, space separated
    pub title: Option<String>,
    /// Result at the time of the event
    pub result: Option<RunResult>,
    /// Error carried by the event
    pub error: Option<RunError>,
    /// When the event was recorded
    pub at: Time,
}

/// Keeps every event in memory. Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingListener {
    records: Arc<Mutex<Vec<EventRecord>>>,
}

impl RecordingListener {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the log so far.
    pub fn records(&self) -> Vec<EventRecord> {
        self.records.lock().clone()
    }

    /// Recorded events of one kind.
    pub fn of_kind(&self, kind: EventKind) -> Vec<EventRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect()
    }

    /// Recorded events about one runnable.
    pub fn for_runnable(&self, id: RunnableId) -> Vec<EventRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.runnable == Some(id))
            .cloned()
            .collect()
    }

    /// Full titles of the runnables that started, in order, skipping barriers.
    pub fn started_titles(&self) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.kind == EventKind::RunnableStart)
            .filter_map(|r| r.title.clone())
            .collect()
    }
}

impl EventListener for RecordingListener {
    fn on_event(&self, event: &RunEvent<'_>) {
        let runnable = event.runnable();
        if runnable.is_some_and(|r| r.kind() == RunnableKind::Barrier) {
            return;
        }

        let error = match event {
            RunEvent::RunnableError(_, error) => Some((*error).clone()),
            _ => runnable.and_then(|r| r.error().cloned()),
        };

        self.records.lock().push(EventRecord {
            kind: event.kind(),
            runnable: runnable.map(Runnable::id),
            title: runnable.map(|r| r.full_title(" ")),
            result: runnable.and_then(Runnable::result),
            error,
            at: chrono::Utc::now(),
        });
    }
}
