// ── FIFO of pending work items ────────────────────────────────────────────────
//
// The mutex/condvar pair behind every queue that owns its consumer loop.
// Producers push from any thread; one consumer pops.  Once stopped, pushes are
// refused and the consumer sees `None` as soon as the remaining items are gone.

use std::{collections::VecDeque, time::Instant};

use parking_lot::{Condvar, Mutex};

use crate::work_item::WorkItem;

struct TaskState {
    items: VecDeque<WorkItem>,
    stopped: bool,
}

pub(crate) struct TaskQueue {
    state: Mutex<TaskState>,
    ready: Condvar,
}

impl TaskQueue {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(TaskState {
                items: VecDeque::new(),
                stopped: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Append `item`.  Returns `false` (and drops the item) once stopped.
    pub(crate) fn push(&self, item: WorkItem) -> bool {
        let mut state = self.state.lock();
        if state.stopped {
            return false;
        }
        state.items.push_back(item);
        drop(state);
        self.ready.notify_one();
        true
    }

    /// Block until an item is available.  `None` means stopped and drained.
    pub(crate) fn pop_blocking(&self) -> Option<WorkItem> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.stopped {
                return None;
            }
            self.ready.wait(&mut state);
        }
    }

    /// Block until an item is available or `deadline` passes.
    pub(crate) fn pop_until(&self, deadline: Instant) -> Option<WorkItem> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.stopped {
                return None;
            }
            if self.ready.wait_until(&mut state, deadline).timed_out() {
                return state.items.pop_front();
            }
        }
    }

    pub(crate) fn try_pop(&self) -> Option<WorkItem> {
        self.state.lock().items.pop_front()
    }

    /// Refuse further pushes and wake the consumer.
    ///
    /// With `discard` the queued items are dropped unrun and their count is
    /// returned; otherwise they stay queued for the consumer to drain.
    pub(crate) fn stop(&self, discard: bool) -> usize {
        let dropped = {
            let mut state = self.state.lock();
            state.stopped = true;
            if discard {
                std::mem::take(&mut state.items)
            } else {
                VecDeque::new()
            }
        };
        self.ready.notify_all();
        // Closures are dropped outside the lock; their captures may post.
        dropped.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().items.len()
    }
}
