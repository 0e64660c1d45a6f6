// ── UI-affine queue ───────────────────────────────────────────────────────────
//
// Work items are handed to the platform UI message loop through a
// `UiDispatcher`; the consumer thread is whatever thread pumps that loop.
// The loop is owned by the host, so quitting cannot stop a thread.  Items
// already handed over are skipped when they surface after the quit.

use std::sync::Arc;

use crate::{
    error::ErrorHandler,
    queue::{gate::ExecutionGate, post_and_wait, MessageQueueThread, QueueHooks, QuitSignal},
    work_item::{run_guarded, WorkItem},
};

/// The platform UI message loop, as seen by [`UiQueueThread`].
///
/// Implemented by `platform::win32::Win32UiDispatcher` on Windows and by the
/// portable `platform::looper::LoopDispatcher`.
pub trait UiDispatcher: Send + Sync {
    /// Hand `item` to the UI thread.  `false` if the loop refused it; the item
    /// is dropped in that case.
    fn post(&self, item: WorkItem) -> bool;

    /// Whether the calling thread is the UI thread.
    fn has_thread_access(&self) -> bool;
}

/// A serial queue whose consumer is the UI thread.
pub struct UiQueueThread {
    name: Arc<str>,
    dispatcher: Arc<dyn UiDispatcher>,
    gate: Arc<ExecutionGate>,
    on_error: Option<ErrorHandler>,
    on_quit: QuitSignal,
}

impl UiQueueThread {
    pub fn new(name: &str, dispatcher: Arc<dyn UiDispatcher>, hooks: QueueHooks) -> Self {
        Self {
            name: Arc::from(name),
            dispatcher,
            gate: Arc::new(ExecutionGate::new()),
            on_error: hooks.on_error,
            on_quit: QuitSignal::new(hooks.on_quit),
        }
    }

    fn run_here(&self, item: WorkItem) {
        if let Some(_pass) = self.gate.enter() {
            run_guarded(item, &self.name, self.on_error.as_ref());
        }
    }
}

impl MessageQueueThread for UiQueueThread {
    fn run_on_queue(&self, item: WorkItem) {
        if self.gate.is_closed() {
            tracing::trace!(queue = %self.name, "post after quit ignored");
            return;
        }

        let gate = Arc::clone(&self.gate);
        let name = Arc::clone(&self.name);
        let on_error = self.on_error.clone();
        let posted = self.dispatcher.post(Box::new(move || {
            if let Some(_pass) = gate.enter() {
                run_guarded(item, &name, on_error.as_ref());
            }
        }));
        if !posted {
            tracing::warn!(queue = %self.name, "UI loop refused work item");
        }
    }

    fn run_on_queue_sync(&self, item: WorkItem) {
        if self.has_thread_access() {
            self.run_here(item);
        } else {
            post_and_wait(self, item);
        }
    }

    fn quit_synchronous(&self) {
        // On the UI thread an item may be on the stack below us; don't wait for it.
        if self.gate.close(!self.has_thread_access()) {
            tracing::debug!(queue = %self.name, "UI queue quit");
            self.on_quit.fire();
        }
    }

    fn has_thread_access(&self) -> bool {
        self.dispatcher.has_thread_access()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{platform::looper::UiLoop, queue::MessageQueueThreadExt};
    use parking_lot::Mutex;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        thread,
    };

    fn ui_queue(ui: &UiLoop) -> UiQueueThread {
        UiQueueThread::new("test-ui", ui.dispatcher(), QueueHooks::default())
    }

    #[test]
    fn items_run_when_ui_loop_pumps() {
        let ui = UiLoop::for_current_thread();
        let q = ui_queue(&ui);
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let log = Arc::clone(&log);
            q.post(move || log.lock().push(i));
        }
        assert!(log.lock().is_empty(), "nothing runs before the loop pumps");
        assert_eq!(ui.run_until_idle(), 3);
        assert_eq!(*log.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn ui_thread_has_access() {
        let ui = UiLoop::for_current_thread();
        let q = Arc::new(ui_queue(&ui));
        assert!(q.has_thread_access());
        let other = Arc::clone(&q);
        let off = thread::spawn(move || other.has_thread_access())
            .join()
            .expect("join");
        assert!(!off);
    }

    #[test]
    fn items_posted_before_quit_are_skipped_after_quit() {
        let ui = UiLoop::for_current_thread();
        let q = ui_queue(&ui);
        let ran = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&ran);
        q.post(move || {
            r.fetch_add(1, Ordering::SeqCst);
        });
        q.quit_synchronous();
        ui.run_until_idle();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn post_after_quit_is_not_handed_to_loop() {
        let ui = UiLoop::for_current_thread();
        let q = ui_queue(&ui);
        q.quit_synchronous();
        q.post(|| {});
        assert_eq!(ui.run_until_idle(), 0);
    }

    #[test]
    fn post_sync_from_worker_waits_for_ui_pump() {
        let ui = UiLoop::for_current_thread();
        let dispatcher = ui.dispatcher();
        let q = Arc::new(ui_queue(&ui));
        let value = Arc::new(AtomicUsize::new(0));

        let worker = {
            let (q, value) = (Arc::clone(&q), Arc::clone(&value));
            thread::spawn(move || {
                let v = Arc::clone(&value);
                q.post_sync(move || v.store(5, Ordering::SeqCst));
                let seen = value.load(Ordering::SeqCst);
                dispatcher.request_quit();
                seen
            })
        };

        ui.run();
        assert_eq!(worker.join().expect("join"), 5);
    }

    #[test]
    fn post_sync_on_ui_thread_runs_inline() {
        let ui = UiLoop::for_current_thread();
        let q = ui_queue(&ui);
        let ran = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&ran);
        q.post_sync(move || {
            r.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn quit_hook_fires_once() {
        let ui = UiLoop::for_current_thread();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        let q = UiQueueThread::new(
            "hooked-ui",
            ui.dispatcher(),
            QueueHooks::default().on_quit(move || {
                f.fetch_add(1, Ordering::SeqCst);
            }),
        );
        q.quit_synchronous();
        q.quit_synchronous();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
