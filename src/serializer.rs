//! Action serializer.
//!
//! Owns the one session instance and runs submitted actions against it one
//! at a time. Two FIFO lanes feed a single worker task:
//!
//! ```text
//!  enqueue(High)   --> [ high lane   ] --+
//!                                        +--> worker (owns S) --> reply
//!  enqueue(Normal) --> [ normal lane ] --+
//! ```
//!
//! Whenever the worker becomes idle it takes from the high lane first, then
//! the normal lane. A running action is never preempted; high-priority work
//! only jumps the line. Errors and panics raised by an action are delivered
//! to that action's caller and never disturb the queue. The serializer
//! itself never retries.
//!
//! The session is handed back by [`Serializer::shutdown`] so it can be
//! released; entries still queued at that point resolve with
//! [`PilotError::ShuttingDown`].

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{PilotError, Result};

/// Queue precedence of a submitted action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Ordinary work (event reactions)
    Normal,
    /// Jumps ahead of all queued normal work (snapshots, restore)
    High,
}

/// A queued unit of work, type-erased over its result.
trait Job<S>: Send {
    fn run<'a>(self: Box<Self>, session: &'a mut S) -> BoxFuture<'a, ()>;
    fn reject(self: Box<Self>, error: PilotError);
}

struct Entry<T, F> {
    action: F,
    reply: oneshot::Sender<Result<T>>,
}

impl<S, T, F> Job<S> for Entry<T, F>
where
    S: Send + 'static,
    T: Send + 'static,
    F: for<'a> FnOnce(&'a mut S) -> BoxFuture<'a, Result<T>> + Send + 'static,
{
    fn run<'a>(self: Box<Self>, session: &'a mut S) -> BoxFuture<'a, ()> {
        let Entry { action, reply } = *self;
        async move {
            let outcome = AssertUnwindSafe(async move { action(session).await })
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(PilotError::ActionPanicked(panic_message(&*panic))));
            // Caller may have stopped waiting
            let _ = reply.send(outcome);
        }
        .boxed()
    }

    fn reject(self: Box<Self>, error: PilotError) {
        let _ = self.reply.send(Err(error));
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

type Lane<S> = mpsc::UnboundedSender<Box<dyn Job<S>>>;
type LaneRx<S> = mpsc::UnboundedReceiver<Box<dyn Job<S>>>;

#[derive(Debug, Default)]
struct Counters {
    queued_high: AtomicUsize,
    queued_normal: AtomicUsize,
    busy: AtomicBool,
    submitted_high: AtomicU64,
    submitted_normal: AtomicU64,
    completed: AtomicU64,
}

/// Point-in-time view of the serializer queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SerializerStats {
    pub queued_high: usize,
    pub queued_normal: usize,
    pub busy: bool,
    pub submitted_high: u64,
    pub submitted_normal: u64,
    pub completed: u64,
}

struct Inner<S> {
    high_tx: Lane<S>,
    normal_tx: Lane<S>,
    counters: Arc<Counters>,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<S>>>,
}

impl<S> Drop for Inner<S> {
    fn drop(&mut self) {
        // Last handle gone: let the worker drain and exit
        self.shutdown.cancel();
    }
}

/// Handle to the serializer. Cheap to clone; all clones share one worker.
pub struct Serializer<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for Serializer<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Send + 'static> Serializer<S> {
    /// Take ownership of the session and spawn the worker task.
    pub fn spawn(session: S) -> Self {
        let (high_tx, high_rx) = mpsc::unbounded_channel();
        let (normal_tx, normal_rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());
        let shutdown = CancellationToken::new();

        let worker = tokio::spawn(run_worker(
            session,
            high_rx,
            normal_rx,
            Arc::clone(&counters),
            shutdown.clone(),
        ));

        Self {
            inner: Arc::new(Inner {
                high_tx,
                normal_tx,
                counters,
                shutdown,
                worker: Mutex::new(Some(worker)),
            }),
        }
    }

    /// Queue an action and return a future for its outcome.
    ///
    /// The entry is placed in its lane before this returns, so calls made in
    /// sequence keep their order within a lane even if the returned futures
    /// are awaited elsewhere.
    pub fn enqueue<T, F>(&self, priority: Priority, action: F) -> Pending<T>
    where
        T: Send + 'static,
        F: for<'a> FnOnce(&'a mut S) -> BoxFuture<'a, Result<T>> + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let job: Box<dyn Job<S>> = Box::new(Entry { action, reply });

        if self.inner.shutdown.is_cancelled() {
            job.reject(PilotError::ShuttingDown);
            return Pending { rx };
        }

        let counters = &self.inner.counters;
        let (lane, queued, submitted) = match priority {
            Priority::High => (
                &self.inner.high_tx,
                &counters.queued_high,
                &counters.submitted_high,
            ),
            Priority::Normal => (
                &self.inner.normal_tx,
                &counters.queued_normal,
                &counters.submitted_normal,
            ),
        };

        queued.fetch_add(1, Ordering::SeqCst);
        match lane.send(job) {
            Ok(()) => {
                submitted.fetch_add(1, Ordering::SeqCst);
            }
            Err(mpsc::error::SendError(job)) => {
                queued.fetch_sub(1, Ordering::SeqCst);
                job.reject(PilotError::ShuttingDown);
            }
        }

        Pending { rx }
    }

    /// Queue an action and wait until it has run.
    pub async fn submit<T, F>(&self, priority: Priority, action: F) -> Result<T>
    where
        T: Send + 'static,
        F: for<'a> FnOnce(&'a mut S) -> BoxFuture<'a, Result<T>> + Send + 'static,
    {
        self.enqueue(priority, action).await
    }

    pub fn stats(&self) -> SerializerStats {
        let c = &self.inner.counters;
        SerializerStats {
            queued_high: c.queued_high.load(Ordering::SeqCst),
            queued_normal: c.queued_normal.load(Ordering::SeqCst),
            busy: c.busy.load(Ordering::SeqCst),
            submitted_high: c.submitted_high.load(Ordering::SeqCst),
            submitted_normal: c.submitted_normal.load(Ordering::SeqCst),
            completed: c.completed.load(Ordering::SeqCst),
        }
    }

    /// Stop accepting work. The running action finishes; queued entries
    /// are rejected with `ShuttingDown`.
    pub fn close(&self) {
        self.inner.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Close and wait for the worker, returning the session for release.
    ///
    /// Returns `None` if another caller already collected the session or the
    /// worker task died.
    pub async fn shutdown(&self) -> Option<S> {
        self.close();
        let worker = self.inner.worker.lock().take();
        match worker?.await {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::error!("[serializer] worker task failed: {}", e);
                None
            }
        }
    }
}

/// Outcome of a queued action. Resolves once the action ran or was rejected.
#[must_use = "the action outcome is only observable by awaiting Pending"]
pub struct Pending<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Future for Pending<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(PilotError::ShuttingDown)))
    }
}

/// Worker loop: one action at a time, high lane first.
async fn run_worker<S: Send + 'static>(
    mut session: S,
    mut high_rx: LaneRx<S>,
    mut normal_rx: LaneRx<S>,
    counters: Arc<Counters>,
    shutdown: CancellationToken,
) -> S {
    tracing::debug!("[serializer] worker started");

    loop {
        let job = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            Some(job) = high_rx.recv() => {
                counters.queued_high.fetch_sub(1, Ordering::SeqCst);
                job
            }
            Some(job) = normal_rx.recv() => {
                counters.queued_normal.fetch_sub(1, Ordering::SeqCst);
                job
            }
            else => break,
        };

        counters.busy.store(true, Ordering::SeqCst);
        job.run(&mut session).await;
        counters.busy.store(false, Ordering::SeqCst);
        counters.completed.fetch_add(1, Ordering::SeqCst);
    }

    high_rx.close();
    normal_rx.close();

    let mut rejected = 0usize;
    while let Ok(job) = high_rx.try_recv() {
        counters.queued_high.fetch_sub(1, Ordering::SeqCst);
        job.reject(PilotError::ShuttingDown);
        rejected += 1;
    }
    while let Ok(job) = normal_rx.try_recv() {
        counters.queued_normal.fetch_sub(1, Ordering::SeqCst);
        job.reject(PilotError::ShuttingDown);
        rejected += 1;
    }

    if rejected > 0 {
        tracing::info!(
            "[serializer] worker stopped, rejected {} queued actions",
            rejected
        );
    } else {
        tracing::debug!("[serializer] worker stopped");
    }

    session
}
