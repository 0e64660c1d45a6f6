// ── Controllable queue (test double) ──────────────────────────────────────────
//
// Same contract as the production queues, but a test decides when items run.
// In `ManualDispatch` nothing runs until `dispatch_one` is called; in
// `AutoDispatch` a background thread drains the queue like `SerialQueueThread`.

use std::{
    sync::Arc,
    thread::{self, JoinHandle, ThreadId},
    time::{Duration, Instant},
};

use parking_lot::Mutex;

use crate::{
    config::DispatchConfig,
    error::Result,
    queue::{
        gate::ExecutionGate,
        post_and_wait,
        serial::{quit_consumer, spawn_consumer},
        task_queue::TaskQueue,
        MessageQueueThread, QueueHooks,
    },
    work_item::{run_guarded, WorkItem},
};

const QUEUE_NAME: &str = "controllable";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// A background thread runs items as they arrive.
    AutoDispatch,
    /// Items run only inside [`ControllableMessageQueueThread::dispatch_one`].
    ManualDispatch,
}

/// A deterministic, single-steppable message queue.
pub struct ControllableMessageQueueThread {
    mode: DispatchMode,
    tasks: Arc<TaskQueue>,
    /// Auto: the worker thread.
    worker_id: Option<ThreadId>,
    worker: Mutex<Option<JoinHandle<()>>>,
    /// Manual: the thread currently inside `dispatch_one`.
    dispatcher: Mutex<Option<ThreadId>>,
    /// Manual: lets quit wait out an item a dispatching thread is running.
    gate: ExecutionGate,
}

impl ControllableMessageQueueThread {
    pub fn new(mode: DispatchMode) -> Result<Self> {
        let tasks = Arc::new(TaskQueue::new());
        let worker = match mode {
            DispatchMode::AutoDispatch => Some(spawn_consumer(
                &DispatchConfig::default(),
                QUEUE_NAME,
                Arc::clone(&tasks),
                QueueHooks::default(),
            )?),
            DispatchMode::ManualDispatch => None,
        };

        Ok(Self {
            mode,
            tasks,
            worker_id: worker.as_ref().map(|w| w.thread().id()),
            worker: Mutex::new(worker),
            dispatcher: Mutex::new(None),
            gate: ExecutionGate::new(),
        })
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Pop and run exactly one item on the calling thread, waiting up to
    /// `timeout` for one to arrive.  Returns whether an item ran.
    ///
    /// A timeout too large to express as a deadline waits until an item
    /// arrives or the queue quits.  Meant for `ManualDispatch`; in
    /// `AutoDispatch` it races the worker.
    pub fn dispatch_one(&self, timeout: Duration) -> bool {
        let popped = match Instant::now().checked_add(timeout) {
            Some(deadline) => self.tasks.pop_until(deadline),
            None => self.tasks.pop_blocking(),
        };
        let Some(item) = popped else {
            return false;
        };
        let Some(_pass) = self.gate.enter() else {
            return false;
        };

        let outer = self.dispatcher.lock().replace(thread::current().id());
        run_guarded(item, QUEUE_NAME, None);
        *self.dispatcher.lock() = outer;
        true
    }
}

impl MessageQueueThread for ControllableMessageQueueThread {
    fn run_on_queue(&self, item: WorkItem) {
        if !self.tasks.push(item) {
            tracing::trace!(queue = QUEUE_NAME, "post after quit ignored");
        }
    }

    fn run_on_queue_sync(&self, item: WorkItem) {
        if self.has_thread_access() {
            item();
        } else {
            post_and_wait(self, item);
        }
    }

    /// Auto drains like production.  Manual discards whatever the test never
    /// dispatched and waits for an item another thread is running.
    fn quit_synchronous(&self) {
        match self.mode {
            DispatchMode::AutoDispatch => {
                quit_consumer(QUEUE_NAME, &self.tasks, &self.worker, self.has_thread_access());
            }
            DispatchMode::ManualDispatch => {
                let dropped = self.tasks.stop(true);
                if dropped > 0 {
                    tracing::debug!(queue = QUEUE_NAME, dropped, "undispatched items discarded on quit");
                }
                self.gate.close(!self.has_thread_access());
            }
        }
    }

    fn has_thread_access(&self) -> bool {
        let current = thread::current().id();
        match self.mode {
            DispatchMode::AutoDispatch => self.worker_id == Some(current),
            DispatchMode::ManualDispatch => *self.dispatcher.lock() == Some(current),
        }
    }

    fn name(&self) -> &str {
        QUEUE_NAME
    }
}

impl Drop for ControllableMessageQueueThread {
    fn drop(&mut self) {
        self.quit_synchronous();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MessageQueueThreadExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manual() -> ControllableMessageQueueThread {
        ControllableMessageQueueThread::new(DispatchMode::ManualDispatch).expect("manual")
    }

    #[test]
    fn manual_stepping_runs_items_in_order() {
        let q = manual();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..2 {
            let log = Arc::clone(&log);
            q.post(move || log.lock().push(i));
        }
        assert!(!q.is_empty());
        assert!(log.lock().is_empty());

        assert!(q.dispatch_one(Duration::from_secs(1)));
        assert!(q.dispatch_one(Duration::from_secs(1)));
        assert_eq!(*log.lock(), vec![0, 1]);
        assert!(q.is_empty());

        let start = Instant::now();
        assert!(!q.dispatch_one(Duration::from_millis(100)));
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn dispatch_one_waits_for_late_item() {
        let q = Arc::new(manual());
        let producer = {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                q.post(|| {});
            })
        };
        assert!(q.dispatch_one(Duration::from_secs(5)));
        producer.join().expect("join");
    }

    #[test]
    fn manual_access_only_while_dispatching() {
        let q = Arc::new(manual());
        assert!(!q.has_thread_access());
        let seen = Arc::new(AtomicUsize::new(0));
        let (inner, s) = (Arc::clone(&q), Arc::clone(&seen));
        q.post(move || {
            if inner.has_thread_access() {
                s.fetch_add(1, Ordering::SeqCst);
            }
        });
        assert!(q.dispatch_one(Duration::from_secs(1)));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(!q.has_thread_access());
    }

    #[test]
    fn manual_quit_discards_and_refuses() {
        let q = manual();
        q.post(|| panic!("never dispatched"));
        q.quit_synchronous();
        assert!(q.is_empty());
        q.post(|| panic!("after quit"));
        assert!(!q.dispatch_one(Duration::from_millis(10)));
    }

    #[test]
    fn auto_mode_behaves_like_production() {
        let q = ControllableMessageQueueThread::new(DispatchMode::AutoDispatch).expect("auto");
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let counter = Arc::clone(&counter);
            q.post(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        let c = Arc::clone(&counter);
        q.post_sync(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(counter.load(Ordering::SeqCst), 4);
        q.quit_synchronous();
        q.post(|| panic!("after quit"));
        assert!(q.is_empty());
    }

    #[test]
    fn manual_post_sync_completes_when_test_dispatches() {
        let q = Arc::new(manual());
        let done = Arc::new(AtomicUsize::new(0));
        let waiter = {
            let (q, done) = (Arc::clone(&q), Arc::clone(&done));
            thread::spawn(move || {
                let d = Arc::clone(&done);
                q.post_sync(move || {
                    d.fetch_add(1, Ordering::SeqCst);
                });
                done.load(Ordering::SeqCst)
            })
        };
        assert!(q.dispatch_one(Duration::from_secs(5)));
        assert_eq!(waiter.join().expect("join"), 1);
    }

    #[test]
    fn unbounded_timeout_waits_instead_of_overflowing() {
        let q = Arc::new(manual());
        let producer = {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                q.post(|| {});
            })
        };
        assert!(q.dispatch_one(Duration::MAX));
        producer.join().expect("join");

        q.quit_synchronous();
        assert!(!q.dispatch_one(Duration::MAX), "quit ends an unbounded wait");
    }

    #[test]
    fn manual_quit_waits_for_item_running_elsewhere() {
        let q = Arc::new(manual());
        let finished = Arc::new(AtomicUsize::new(0));
        let (started_tx, started_rx) = std::sync::mpsc::channel::<()>();
        let f = Arc::clone(&finished);
        q.post(move || {
            started_tx.send(()).expect("send");
            thread::sleep(Duration::from_millis(100));
            f.store(1, Ordering::SeqCst);
        });

        let dispatcher = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.dispatch_one(Duration::from_secs(5)))
        };
        started_rx.recv().expect("item started");
        q.quit_synchronous();
        assert_eq!(finished.load(Ordering::SeqCst), 1, "quit returned while the item ran");
        assert!(dispatcher.join().expect("join"));
    }

    #[test]
    fn manual_quit_from_running_item_does_not_wait_on_itself() {
        let q = Arc::new(manual());
        let inner = Arc::clone(&q);
        q.post(move || inner.quit_synchronous());
        q.post(|| panic!("discarded by quit"));
        assert!(q.dispatch_one(Duration::from_secs(1)));
        assert!(q.is_empty());
    }
}
