// ── Batching queue ────────────────────────────────────────────────────────────
//
// UI mutations arrive from JS one property at a time.  Instead of one thread
// hop per mutation, the batching queue buffers everything posted during a
// bridge tick and, on `on_batch_complete`, posts the whole buffer to the
// underlying queue as a single work item.
//
//   Idle ──run_on_queue──▶ Accumulating ──on_batch_complete──▶ Idle
//
// The buffer belongs to one producer thread (normally the JS thread), which is
// recorded on first use and checked according to `AffinityCheck`.
//
// Quit runs the pending buffer to completion before quitting the underlying
// queue, so a batch that was cut short by teardown is not lost.  Each batched
// item is guarded on its own: a panic is reported and the batch goes on.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, OnceLock,
    },
    thread::{self, ThreadId},
};

use parking_lot::Mutex;

use crate::{
    config::AffinityCheck,
    error::ErrorHandler,
    queue::{BatchingMessageQueueThread, MessageQueueThread, QueueHooks, QuitSignal},
    work_item::{run_guarded, WorkItem},
};

/// Coalesces work items between batch-complete signals.
pub struct BatchingQueueThread {
    name: Arc<str>,
    inner: Arc<dyn MessageQueueThread>,
    /// `None` while idle.
    pending: Mutex<Option<Vec<WorkItem>>>,
    producer: OnceLock<ThreadId>,
    affinity: AffinityCheck,
    stopped: AtomicBool,
    on_error: Option<ErrorHandler>,
    on_quit: QuitSignal,
}

impl BatchingQueueThread {
    pub fn new(inner: Arc<dyn MessageQueueThread>, affinity: AffinityCheck) -> Self {
        Self::with_hooks(inner, affinity, QueueHooks::default())
    }

    /// `hooks.on_error` receives panics of individual batched items;
    /// `hooks.on_quit` fires after the underlying queue has quit.
    pub fn with_hooks(
        inner: Arc<dyn MessageQueueThread>,
        affinity: AffinityCheck,
        hooks: QueueHooks,
    ) -> Self {
        Self {
            name: Arc::from(format!("batching({})", inner.name())),
            inner,
            pending: Mutex::new(None),
            producer: OnceLock::new(),
            affinity,
            stopped: AtomicBool::new(false),
            on_error: hooks.on_error,
            on_quit: QuitSignal::new(hooks.on_quit),
        }
    }

    /// Items buffered since the last flush.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().as_ref().map_or(0, Vec::len)
    }

    /// The queue batches are flushed to.
    pub fn underlying(&self) -> &Arc<dyn MessageQueueThread> {
        &self.inner
    }

    fn check_producer(&self, op: &str) {
        if !self.affinity.enabled() {
            return;
        }
        let current = thread::current().id();
        let producer = *self.producer.get_or_init(|| current);
        assert!(
            producer == current,
            "BatchingQueueThread::{op} on {current:?}; batches belong to {producer:?}"
        );
    }

    fn take_batch(&self) -> Option<Vec<WorkItem>> {
        self.pending.lock().take().filter(|items| !items.is_empty())
    }

    /// Wrap `items` as the single work item the underlying queue sees.
    fn batch_item(&self, items: Vec<WorkItem>) -> WorkItem {
        let name = Arc::clone(&self.name);
        let on_error = self.on_error.clone();
        Box::new(move || run_batch(items, &name, on_error.as_ref()))
    }

    /// Post the pending buffer as one item.  `false` if there was nothing.
    fn flush(&self) -> bool {
        let Some(items) = self.take_batch() else {
            return false;
        };

        tracing::trace!(queue = %self.name, len = items.len(), "flushing batch");
        self.inner.run_on_queue(self.batch_item(items));
        true
    }
}

fn run_batch(items: Vec<WorkItem>, name: &str, on_error: Option<&ErrorHandler>) {
    for item in items {
        run_guarded(item, name, on_error);
    }
}

impl MessageQueueThread for BatchingQueueThread {
    fn run_on_queue(&self, item: WorkItem) {
        if self.stopped.load(Ordering::Acquire) {
            tracing::trace!(queue = %self.name, "post after quit ignored");
            return;
        }
        self.check_producer("run_on_queue");
        self.pending.lock().get_or_insert_with(Vec::new).push(item);
    }

    /// Flushes the current batch first so `item` runs after everything
    /// already posted.
    fn run_on_queue_sync(&self, item: WorkItem) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        self.check_producer("run_on_queue_sync");
        self.flush();
        self.inner.run_on_queue_sync(item);
    }

    /// Callable from any thread: teardown rarely happens on the producer.
    ///
    /// From a thread other than the underlying consumer this waits for the
    /// consumer to run the pending batch.
    fn quit_synchronous(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            if let Some(items) = self.take_batch() {
                tracing::debug!(queue = %self.name, len = items.len(), "running pending batch before quit");
                if self.inner.has_thread_access() {
                    run_batch(items, &self.name, self.on_error.as_ref());
                } else {
                    self.inner.run_on_queue_sync(self.batch_item(items));
                }
            }
        }
        self.inner.quit_synchronous();
        self.on_quit.fire();
    }

    fn has_thread_access(&self) -> bool {
        self.inner.has_thread_access()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl BatchingMessageQueueThread for BatchingQueueThread {
    fn on_batch_complete(&self) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        self.check_producer("on_batch_complete");
        self.flush();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::DispatchConfig,
        platform::looper::UiLoop,
        queue::{
            ControllableMessageQueueThread, DispatchMode, MessageQueueThreadExt,
            SerialQueueThread, UiQueueThread,
        },
    };
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    /// Records every item posted to it; runs them only when asked.
    #[derive(Default)]
    struct SpyQueue {
        posted: Mutex<Vec<WorkItem>>,
        posts: AtomicUsize,
        quits: AtomicUsize,
    }

    impl SpyQueue {
        fn run_all(&self) {
            let items = std::mem::take(&mut *self.posted.lock());
            for item in items {
                item();
            }
        }
    }

    impl MessageQueueThread for SpyQueue {
        fn run_on_queue(&self, item: WorkItem) {
            self.posts.fetch_add(1, Ordering::SeqCst);
            self.posted.lock().push(item);
        }
        fn run_on_queue_sync(&self, item: WorkItem) {
            self.run_all();
            item();
        }
        fn quit_synchronous(&self) {
            self.quits.fetch_add(1, Ordering::SeqCst);
        }
        fn has_thread_access(&self) -> bool {
            false
        }
        fn name(&self) -> &str {
            "spy"
        }
    }

    fn spy_batcher() -> (Arc<SpyQueue>, BatchingQueueThread) {
        let spy = Arc::new(SpyQueue::default());
        let batcher = BatchingQueueThread::new(spy.clone(), AffinityCheck::Always);
        (spy, batcher)
    }

    fn push_log(log: &Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> impl FnOnce() + Send {
        let log = Arc::clone(log);
        move || log.lock().push(tag)
    }

    #[test]
    fn batching_coalesces_into_one_post() {
        let (spy, batcher) = spy_batcher();
        let log = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b", "c", "d", "e"] {
            batcher.post(push_log(&log, tag));
        }
        assert_eq!(spy.posts.load(Ordering::SeqCst), 0);
        assert_eq!(batcher.pending_len(), 5);

        batcher.on_batch_complete();
        assert_eq!(spy.posts.load(Ordering::SeqCst), 1);
        assert_eq!(batcher.pending_len(), 0);
        assert!(log.lock().is_empty(), "nothing runs until the spy does");

        spy.run_all();
        assert_eq!(*log.lock(), vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn idle_batch_complete_posts_nothing() {
        let (spy, batcher) = spy_batcher();
        batcher.on_batch_complete();
        batcher.on_batch_complete();
        assert_eq!(spy.posts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn batches_stay_separate_and_ordered() {
        let (spy, batcher) = spy_batcher();
        let log = Arc::new(Mutex::new(Vec::new()));
        batcher.post(push_log(&log, "A"));
        batcher.post(push_log(&log, "B"));
        batcher.post(push_log(&log, "C"));
        batcher.on_batch_complete();
        batcher.post(push_log(&log, "D"));
        batcher.on_batch_complete();

        assert_eq!(spy.posts.load(Ordering::SeqCst), 2);
        spy.run_all();
        assert_eq!(*log.lock(), vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn batch_runs_contiguously_on_shared_queue() {
        let underlying = Arc::new(
            ControllableMessageQueueThread::new(DispatchMode::ManualDispatch).expect("queue"),
        );
        let batcher = BatchingQueueThread::new(underlying.clone(), AffinityCheck::Always);
        let log = Arc::new(Mutex::new(Vec::new()));

        batcher.post(push_log(&log, "A"));
        batcher.post(push_log(&log, "B"));
        batcher.post(push_log(&log, "C"));
        // Another producer posts straight to the underlying queue mid-batch.
        underlying.post(push_log(&log, "X"));
        batcher.on_batch_complete();
        underlying.post(push_log(&log, "Y"));
        batcher.post(push_log(&log, "D"));
        batcher.on_batch_complete();

        while underlying.dispatch_one(Duration::from_millis(10)) {}
        assert_eq!(*log.lock(), vec!["X", "A", "B", "C", "Y", "D"]);
    }

    #[test]
    fn quit_flushes_pending_batch() {
        let underlying = Arc::new(
            ControllableMessageQueueThread::new(DispatchMode::AutoDispatch).expect("queue"),
        );
        let batcher = BatchingQueueThread::new(underlying, AffinityCheck::Always);
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let ran = Arc::clone(&ran);
            batcher.post(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            });
        }
        batcher.quit_synchronous();
        assert_eq!(ran.load(Ordering::SeqCst), 3);

        batcher.post(|| panic!("posted after quit"));
        batcher.on_batch_complete();
        assert_eq!(batcher.pending_len(), 0);
    }

    #[test]
    fn quit_reaches_underlying_queue() {
        let (spy, batcher) = spy_batcher();
        batcher.quit_synchronous();
        batcher.quit_synchronous();
        assert_eq!(spy.quits.load(Ordering::SeqCst), 2);
        assert_eq!(spy.posts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn sync_post_runs_after_pending_batch() {
        let (spy, batcher) = spy_batcher();
        let log = Arc::new(Mutex::new(Vec::new()));
        batcher.post(push_log(&log, "batched"));
        batcher.post_sync(push_log(&log, "sync"));
        assert_eq!(*log.lock(), vec!["batched", "sync"]);
        assert_eq!(spy.posts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn off_thread_producer_fails_fast() {
        let (_spy, batcher) = spy_batcher();
        let batcher = Arc::new(batcher);
        batcher.post(|| {});

        let other = Arc::clone(&batcher);
        let result = std::thread::spawn(move || other.post(|| {})).join();
        assert!(result.is_err(), "second producer thread must panic");
        assert_eq!(batcher.pending_len(), 1);
    }

    #[test]
    fn unchecked_batcher_accepts_any_thread() {
        let spy = Arc::new(SpyQueue::default());
        let batcher = Arc::new(BatchingQueueThread::new(spy.clone(), AffinityCheck::Never));
        batcher.post(|| {});
        let other = Arc::clone(&batcher);
        std::thread::spawn(move || other.post(|| {}))
            .join()
            .expect("no check");
        batcher.on_batch_complete();
        assert_eq!(spy.posts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn name_wraps_underlying() {
        let (_spy, batcher) = spy_batcher();
        assert_eq!(batcher.name(), "batching(spy)");
    }

    #[test]
    fn quit_runs_pending_batch_on_ui_queue() {
        let ui = UiLoop::for_current_thread();
        let underlying = Arc::new(UiQueueThread::new("ui", ui.dispatcher(), QueueHooks::default()));
        let batcher = BatchingQueueThread::new(underlying, AffinityCheck::Always);
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let ran = Arc::clone(&ran);
            batcher.post(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            });
        }

        batcher.quit_synchronous();
        assert_eq!(ran.load(Ordering::SeqCst), 3, "batch ran before the UI queue closed");
        ui.run_until_idle();
        assert_eq!(ran.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn panicking_item_does_not_drop_rest_of_batch() {
        let errors = Arc::new(AtomicUsize::new(0));
        let e = Arc::clone(&errors);
        let underlying = Arc::new(
            SerialQueueThread::spawn("batched-serial", &DispatchConfig::default(), QueueHooks::default())
                .expect("spawn"),
        );
        let batcher = BatchingQueueThread::with_hooks(
            underlying,
            AffinityCheck::Always,
            QueueHooks::default().on_error(Arc::new(move |_| {
                e.fetch_add(1, Ordering::SeqCst);
            })),
        );

        let ran = Arc::new(AtomicUsize::new(0));
        batcher.post(|| panic!("bad prop"));
        let r = Arc::clone(&ran);
        batcher.post(move || {
            r.fetch_add(1, Ordering::SeqCst);
        });
        batcher.post(|| panic!("bad layout"));
        batcher.on_batch_complete();
        batcher.quit_synchronous();

        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(errors.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn quit_hook_fires_once_after_underlying_quit() {
        let spy = Arc::new(SpyQueue::default());
        let fired = Arc::new(AtomicUsize::new(0));
        let (s, f) = (Arc::clone(&spy), Arc::clone(&fired));
        let batcher = BatchingQueueThread::with_hooks(
            spy.clone(),
            AffinityCheck::Always,
            QueueHooks::default().on_quit(move || {
                f.fetch_add(s.quits.load(Ordering::SeqCst), Ordering::SeqCst);
            }),
        );
        batcher.quit_synchronous();
        batcher.quit_synchronous();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
