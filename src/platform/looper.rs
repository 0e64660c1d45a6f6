// ── Portable UI loop ──────────────────────────────────────────────────────────
//
// A thread-affine message loop for hosts without a native one and for tests.
// The thread that creates the `UiLoop` is the UI thread; it pumps queued work
// with `run_until_idle` or blocks in `run` until `request_quit`.  Other
// threads reach it only through the `LoopDispatcher`.

use std::{
    marker::PhantomData,
    sync::Arc,
    thread::{self, ThreadId},
};

use crate::{
    queue::{task_queue::TaskQueue, UiDispatcher},
    work_item::{run_guarded, WorkItem},
};

const LOOP_NAME: &str = "ui-loop";

/// The pumping side of the loop.  Not `Send`: it stays on the UI thread.
pub struct UiLoop {
    dispatcher: Arc<LoopDispatcher>,
    _ui_thread_only: PhantomData<*const ()>,
}

/// The posting side of a [`UiLoop`], shareable with any thread.
pub struct LoopDispatcher {
    tasks: TaskQueue,
    thread: ThreadId,
}

impl UiLoop {
    /// Bind a new loop to the calling thread.
    pub fn for_current_thread() -> Self {
        Self {
            dispatcher: Arc::new(LoopDispatcher {
                tasks: TaskQueue::new(),
                thread: thread::current().id(),
            }),
            _ui_thread_only: PhantomData,
        }
    }

    pub fn dispatcher(&self) -> Arc<LoopDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// Run queued items, including ones they post, until none are left.
    /// Returns how many ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while let Some(item) = self.dispatcher.tasks.try_pop() {
            run_guarded(item, LOOP_NAME, None);
            ran += 1;
        }
        ran
    }

    /// Pump until [`LoopDispatcher::request_quit`] and the queue is drained.
    pub fn run(&self) {
        while let Some(item) = self.dispatcher.tasks.pop_blocking() {
            run_guarded(item, LOOP_NAME, None);
        }
        tracing::debug!("ui loop exited");
    }
}

impl LoopDispatcher {
    /// Make [`UiLoop::run`] return once what is queued has run.  Later posts
    /// are refused.
    pub fn request_quit(&self) {
        self.tasks.stop(false);
    }
}

impl UiDispatcher for LoopDispatcher {
    fn post(&self, item: WorkItem) -> bool {
        self.tasks.push(item)
    }

    fn has_thread_access(&self) -> bool {
        thread::current().id() == self.thread
    }
}
