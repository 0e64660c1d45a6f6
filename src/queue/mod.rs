// ── Message queue threads ─────────────────────────────────────────────────────
//
// `MessageQueueThread` is the scheduling interface native modules and view
// managers see: post a work item, post one and wait for it, quit, and ask
// whether the caller is already on the consumer thread.
//
// Concrete queues:
//   • `SerialQueueThread`              – dedicated OS thread, blocking pop loop
//   • `UiQueueThread`                  – posts into the platform UI message loop
//   • `CallInvokerQueueThread`         – defers into a JS runtime's invoker
//   • `BatchingQueueThread`            – coalesces items until `on_batch_complete`
//   • `ControllableMessageQueueThread` – manually steppable test double

pub mod batching;
pub mod controllable;
pub mod invoker;
pub mod serial;
pub mod ui;

pub(crate) mod gate;
pub(crate) mod task_queue;

use std::sync::mpsc;

use parking_lot::Mutex;

use crate::{error::ErrorHandler, work_item::WorkItem};

// ── Core interface ────────────────────────────────────────────────────────────

/// A serial executor of work items.
///
/// Items posted from one thread run in post order, one at a time, on the
/// queue's consumer.  Nothing is ordered across different queues.
pub trait MessageQueueThread: Send + Sync {
    /// Enqueue `item` without blocking.  Dropped silently after quit.
    fn run_on_queue(&self, item: WorkItem);

    /// Enqueue `item` and block until it has finished running.
    ///
    /// Runs inline when the caller is already the consumer.  Returns without
    /// running the item if the queue has quit.  Meant for initialization and
    /// teardown: waiting on a consumer that is itself waiting on the caller
    /// deadlocks.
    fn run_on_queue_sync(&self, item: WorkItem);

    /// Stop the queue and block until its consumer no longer runs items.
    ///
    /// After this returns no item of this queue executes and later posts are
    /// no-ops.  Safe to call more than once.
    fn quit_synchronous(&self);

    /// Whether the calling thread is this queue's consumer.
    fn has_thread_access(&self) -> bool;

    /// Queue name as it appears in logs.
    fn name(&self) -> &str;
}

/// A queue whose posts are held back until the bridge reports that a batch of
/// JS-originated calls has finished.
pub trait BatchingMessageQueueThread: MessageQueueThread {
    /// Flush everything posted since the previous batch as one work item.
    fn on_batch_complete(&self);
}

/// Closure-taking shorthands for any queue, including `dyn` ones.
pub trait MessageQueueThreadExt: MessageQueueThread {
    fn post<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.run_on_queue(Box::new(f));
    }

    fn post_sync<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.run_on_queue_sync(Box::new(f));
    }
}

impl<Q: MessageQueueThread + ?Sized> MessageQueueThreadExt for Q {}

// ── Hooks ─────────────────────────────────────────────────────────────────────

/// Optional callbacks attached to a queue at construction.
#[derive(Default)]
pub struct QueueHooks {
    /// Receives panics caught inside work items.
    pub on_error: Option<ErrorHandler>,
    /// Fires once, after the queue stopped running items.
    pub on_quit: Option<Box<dyn FnOnce() + Send>>,
}

impl QueueHooks {
    pub fn on_error(mut self, handler: ErrorHandler) -> Self {
        self.on_error = Some(handler);
        self
    }

    pub fn on_quit<F>(mut self, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_quit = Some(Box::new(f));
        self
    }
}

/// One-shot holder for a `QueueHooks::on_quit` callback.
pub(crate) struct QuitSignal(Mutex<Option<Box<dyn FnOnce() + Send>>>);

impl QuitSignal {
    pub(crate) fn new(f: Option<Box<dyn FnOnce() + Send>>) -> Self {
        Self(Mutex::new(f))
    }

    pub(crate) fn fire(&self) {
        let f = self.0.lock().take();
        if let Some(f) = f {
            f();
        }
    }
}

// ── Shared helpers ────────────────────────────────────────────────────────────

/// Post `item` to `queue` and wait until it ran.
///
/// The wrapper signals completion through a channel; if the queue drops the
/// wrapper unrun (quit, teardown) the sender goes with it and the wait ends.
pub(crate) fn post_and_wait<Q>(queue: &Q, item: WorkItem)
where
    Q: MessageQueueThread + ?Sized,
{
    let (done_tx, done_rx) = mpsc::channel::<()>();
    queue.run_on_queue(Box::new(move || {
        item();
        let _ = done_tx.send(());
    }));
    if done_rx.recv().is_err() {
        tracing::trace!(queue = queue.name(), "sync item dropped before running");
    }
}

pub use batching::BatchingQueueThread;
pub use controllable::{ControllableMessageQueueThread, DispatchMode};
pub use invoker::{CallInvoker, CallInvokerQueueThread, RuntimeJob, RuntimeThread};
pub use serial::SerialQueueThread;
pub use ui::{UiDispatcher, UiQueueThread};
