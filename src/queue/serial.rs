// ── OS-thread-backed serial queue ─────────────────────────────────────────────
//
// One dedicated thread pops work items in FIFO order and runs them.  Quitting
// lets the thread drain what was queued before the quit, then joins it.

use std::{
    sync::Arc,
    thread::{self, JoinHandle, ThreadId},
};

use parking_lot::Mutex;

use crate::{
    config::DispatchConfig,
    error::{DispatchError, ErrorHandler, Result},
    queue::{post_and_wait, task_queue::TaskQueue, MessageQueueThread, QueueHooks},
    work_item::{run_guarded, WorkItem},
};

/// A serial dispatch queue running on its own OS thread.
pub struct SerialQueueThread {
    name: String,
    tasks: Arc<TaskQueue>,
    thread_id: ThreadId,
    /// Taken (and joined) by the first off-thread quit.
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SerialQueueThread {
    /// Spawn the consumer thread named `name`.
    pub fn spawn(name: &str, config: &DispatchConfig, hooks: QueueHooks) -> Result<Self> {
        let tasks = Arc::new(TaskQueue::new());
        let worker = spawn_consumer(config, name, Arc::clone(&tasks), hooks)?;
        tracing::debug!(queue = name, "serial queue started");
        Ok(Self {
            name: name.to_owned(),
            tasks,
            thread_id: worker.thread().id(),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Number of items waiting to run.
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }
}

impl MessageQueueThread for SerialQueueThread {
    fn run_on_queue(&self, item: WorkItem) {
        if !self.tasks.push(item) {
            tracing::trace!(queue = %self.name, "post after quit ignored");
        }
    }

    fn run_on_queue_sync(&self, item: WorkItem) {
        if self.has_thread_access() {
            item();
        } else {
            post_and_wait(self, item);
        }
    }

    fn quit_synchronous(&self) {
        quit_consumer(&self.name, &self.tasks, &self.worker, self.has_thread_access());
    }

    fn has_thread_access(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for SerialQueueThread {
    fn drop(&mut self) {
        self.quit_synchronous();
    }
}

// ── Consumer loop ─────────────────────────────────────────────────────────────

/// Spawn the thread that drains `tasks` until it is stopped and empty.
///
/// `hooks.on_quit` runs on the consumer thread after the last item.
pub(crate) fn spawn_consumer(
    config: &DispatchConfig,
    name: &str,
    tasks: Arc<TaskQueue>,
    hooks: QueueHooks,
) -> Result<JoinHandle<()>> {
    let QueueHooks { on_error, on_quit } = hooks;
    let queue_name = name.to_owned();

    config
        .thread_builder(name)
        .spawn(move || {
            consumer_loop(&queue_name, &tasks, on_error.as_ref());
            if let Some(f) = on_quit {
                f();
            }
            tracing::debug!(queue = %queue_name, "consumer stopped");
        })
        .map_err(|source| DispatchError::Spawn {
            name: name.to_owned(),
            source,
        })
}

fn consumer_loop(name: &str, tasks: &TaskQueue, on_error: Option<&ErrorHandler>) {
    while let Some(item) = tasks.pop_blocking() {
        run_guarded(item, name, on_error);
    }
}

/// Stop `tasks` and wait for its consumer.
///
/// From the consumer itself the thread cannot be joined: the queue stops,
/// whatever is still queued is discarded, and the loop ends after the
/// current item.
pub(crate) fn quit_consumer(
    name: &str,
    tasks: &TaskQueue,
    worker: &Mutex<Option<JoinHandle<()>>>,
    on_consumer: bool,
) {
    if on_consumer {
        let dropped = tasks.stop(true);
        if dropped > 0 {
            tracing::warn!(queue = name, dropped, "quit from consumer thread discarded pending items");
        }
        return;
    }

    tasks.stop(false);
    // The lock is held across the join so a concurrent quit also waits.
    let mut worker = worker.lock();
    if let Some(handle) = worker.take() {
        if handle.join().is_err() {
            tracing::error!(queue = name, "consumer thread panicked during shutdown");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
