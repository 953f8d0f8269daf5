//! Test bodies and the completion channel they report through.
//!
//! A body finishes in one of three ways: it returns (synchronous bodies), it
//! resolves (async bodies), or it calls a [`Done`] handle (callback bodies).
//! Panics are caught on every path. Whatever happens is turned into a
//! [`Signal`] on the orchestrator's channel, so the state machine only ever
//! sees "error or success".

use async_trait::async_trait;
use dagtest_core::{ExecutionContext, RunError, RunnableId};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

/// Message from an in-flight body (or its timer) back to the run loop.
#[derive(Debug)]
pub(crate) enum Signal {
    /// The body reported completion.
    Settled {
        id: RunnableId,
        outcome: Result<(), RunError>,
    },
    /// The runnable's timer elapsed.
    TimedOut { id: RunnableId, after: Duration },
}

/// An async test body.
#[async_trait]
pub trait TestFn: Send + Sync {
    /// Run the body against the suite's context.
    async fn call(&self, ctx: ExecutionContext) -> anyhow::Result<()>;
}

struct FnTest<F>(F);

#[async_trait]
impl<F, Fut> TestFn for FnTest<F>
where
    F: Fn(ExecutionContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn call(&self, ctx: ExecutionContext) -> anyhow::Result<()> {
        (self.0)(ctx).await
    }
}

type SyncFn = dyn Fn(&ExecutionContext) -> anyhow::Result<()> + Send + Sync;
type CallbackFn = dyn Fn(ExecutionContext, Done) + Send + Sync;

/// Executable part of a test or hook.
#[derive(Clone)]
pub enum Body {
    /// Completes when it returns.
    Sync(Arc<SyncFn>),
    /// Completes when a [`Done`] handle is signalled.
    Callback(Arc<CallbackFn>),
    /// Completes when the returned future resolves.
    Async(Arc<dyn TestFn>),
}

impl Body {
    /// Body that completes when the closure returns.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&ExecutionContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Body::Sync(Arc::new(f))
    }

    /// Body that completes through the [`Done`] handle it is given.
    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(ExecutionContext, Done) + Send + Sync + 'static,
    {
        Body::Callback(Arc::new(f))
    }

    /// Body that completes when the returned future resolves.
    pub fn future<F, Fut>(f: F) -> Self
    where
        F: Fn(ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Body::Async(Arc::new(FnTest(f)))
    }

    /// Body backed by a [`TestFn`] implementation.
    pub fn test_fn(t: impl TestFn + 'static) -> Self {
        Body::Async(Arc::new(t))
    }

    /// Start the body off the run loop. Completion arrives on `tx`.
    pub(crate) fn spawn(&self, id: RunnableId, ctx: ExecutionContext, tx: UnboundedSender<Signal>) {
        let done = Done::new(id, tx);

        match self.clone() {
            Body::Sync(f) => {
                tokio::task::spawn_blocking(move || {
                    let outcome = match std::panic::catch_unwind(AssertUnwindSafe(|| f(&ctx))) {
                        Ok(result) => result.map_err(failed),
                        Err(payload) => Err(RunError::from_panic(payload.as_ref())),
                    };
                    done.send(outcome);
                });
            }
            Body::Callback(f) => {
                tokio::task::spawn_blocking(move || {
                    let handle = done.clone();
                    if let Err(payload) = std::panic::catch_unwind(AssertUnwindSafe(|| f(ctx, handle))) {
                        done.send(Err(RunError::from_panic(payload.as_ref())));
                    }
                });
            }
            Body::Async(t) => {
                tokio::spawn(async move {
                    let outcome = match AssertUnwindSafe(t.call(ctx)).catch_unwind().await {
                        Ok(result) => result.map_err(failed),
                        Err(payload) => Err(RunError::from_panic(payload.as_ref())),
                    };
                    done.send(outcome);
                });
            }
        }
    }
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Body::Sync(_) => write!(f, "Body::Sync"),
            Body::Callback(_) => write!(f, "Body::Callback"),
            Body::Async(_) => write!(f, "Body::Async"),
        }
    }
}

fn failed(err: anyhow::Error) -> RunError {
    RunError::Failed(format!("{:#}", err))
}

/// Completion handle given to callback bodies.
///
/// Clones share one underlying handle. Every call is forwarded to the run
/// loop; calls after the first are recorded as extra errors there. When the
/// last clone is dropped without any call, the loop is told with
/// [`RunError::DoneDropped`]. A runnable without a timeout fails with it; one
/// with a timeout is left to time out.
#[derive(Clone)]
pub struct Done {
    inner: Arc<DoneInner>,
}

struct DoneInner {
    id: RunnableId,
    tx: UnboundedSender<Signal>,
    signalled: AtomicBool,
}

impl Done {
    pub(crate) fn new(id: RunnableId, tx: UnboundedSender<Signal>) -> Self {
        Self {
            inner: Arc::new(DoneInner {
                id,
                tx,
                signalled: AtomicBool::new(false),
            }),
        }
    }

    /// Id of the runnable this handle completes.
    pub fn id(&self) -> RunnableId {
        self.inner.id
    }

    /// Report success.
    pub fn success(&self) {
        self.send(Ok(()));
    }

    /// Report failure.
    pub fn fail(&self, err: impl Into<anyhow::Error>) {
        self.send(Err(failed(err.into())));
    }

    /// Report the given result.
    pub fn settle(&self, result: anyhow::Result<()>) {
        self.send(result.map_err(failed));
    }

    fn send(&self, outcome: Result<(), RunError>) {
        self.inner.signalled.store(true, Ordering::SeqCst);
        // The run may already be over; late signals have nowhere to go.
        let _ = self.inner.tx.send(Signal::Settled {
            id: self.inner.id,
            outcome,
        });
    }
}

impl std::fmt::Debug for Done {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Done").field("id", &self.inner.id).finish()
    }
}

impl Drop for DoneInner {
    fn drop(&mut self) {
        if !*self.signalled.get_mut() {
            let _ = self.tx.send(Signal::Settled {
                id: self.id,
                outcome: Err(RunError::DoneDropped),
            });
        }
    }
}
