//! Call-invoker-backed queue.
//!
//! Work posted here does not run on a thread of our own: it is handed to the
//! JS runtime's invoker and executes inside a runtime-owned callback, with a
//! `&mut` reference to the runtime available to [`CallInvokerQueueThread::run_with_runtime`].
//!
//! [`RuntimeThread`] is a concrete invoker hosting any runtime value on a
//! dedicated OS thread with a single-threaded Tokio event loop.

use std::{
    sync::{mpsc as std_mpsc, Arc},
    thread::{self, JoinHandle, ThreadId},
};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::{
    config::DispatchConfig,
    error::{DispatchError, ErrorHandler, Result},
    queue::{gate::ExecutionGate, post_and_wait, MessageQueueThread, QueueHooks, QuitSignal},
    work_item::{run_guarded, WorkItem},
};

/// A job that needs the runtime.
pub type RuntimeJob<R> = Box<dyn FnOnce(&mut R) + Send + 'static>;

/// The JS engine binding's asynchronous invocation mechanism.
pub trait CallInvoker: Send + Sync {
    type Runtime: 'static;

    /// Schedule `job` to run on the runtime's thread.  `false` if the runtime
    /// is gone; the job is dropped.
    fn invoke_async(&self, job: RuntimeJob<Self::Runtime>) -> bool;

    /// Whether the calling thread is the one running jobs.
    fn is_runtime_thread(&self) -> bool;
}

// ── Queue ─────────────────────────────────────────────────────────────────────

/// A serial queue that defers into a [`CallInvoker`].
///
/// Quitting closes the queue, not the runtime: jobs already handed to the
/// invoker become no-ops when they surface.
pub struct CallInvokerQueueThread<I: CallInvoker> {
    name: Arc<str>,
    invoker: Arc<I>,
    gate: Arc<ExecutionGate>,
    on_error: Option<ErrorHandler>,
    on_quit: QuitSignal,
}

impl<I: CallInvoker + 'static> CallInvokerQueueThread<I> {
    pub fn new(name: &str, invoker: Arc<I>, hooks: QueueHooks) -> Self {
        Self {
            name: Arc::from(name),
            invoker,
            gate: Arc::new(ExecutionGate::new()),
            on_error: hooks.on_error,
            on_quit: QuitSignal::new(hooks.on_quit),
        }
    }

    /// Post `f`, giving it the runtime when it runs.
    pub fn run_with_runtime<F>(&self, f: F)
    where
        F: FnOnce(&mut I::Runtime) + Send + 'static,
    {
        if self.gate.is_closed() {
            tracing::trace!(queue = %self.name, "post after quit ignored");
            return;
        }

        let gate = Arc::clone(&self.gate);
        let name = Arc::clone(&self.name);
        let on_error = self.on_error.clone();
        let accepted = self.invoker.invoke_async(Box::new(move |runtime: &mut I::Runtime| {
            if let Some(_pass) = gate.enter() {
                run_guarded(|| f(runtime), &name, on_error.as_ref());
            }
        }));
        if !accepted {
            tracing::warn!(queue = %self.name, "call invoker refused job");
        }
    }

    pub fn invoker(&self) -> &Arc<I> {
        &self.invoker
    }
}

impl<I: CallInvoker + 'static> MessageQueueThread for CallInvokerQueueThread<I> {
    fn run_on_queue(&self, item: WorkItem) {
        self.run_with_runtime(move |_| item());
    }

    fn run_on_queue_sync(&self, item: WorkItem) {
        if self.has_thread_access() {
            if let Some(_pass) = self.gate.enter() {
                run_guarded(item, &self.name, self.on_error.as_ref());
            }
        } else {
            post_and_wait(self, item);
        }
    }

    fn quit_synchronous(&self) {
        if self.gate.close(!self.has_thread_access()) {
            tracing::debug!(queue = %self.name, "call invoker queue quit");
            self.on_quit.fire();
        }
    }

    fn has_thread_access(&self) -> bool {
        self.invoker.is_runtime_thread()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ── Runtime thread ────────────────────────────────────────────────────────────

/// Hosts a runtime `R` on its own thread and runs jobs against it in order.
///
/// `R` is built on that thread by the `init` closure and never leaves it, so
/// it need not be `Send`.
pub struct RuntimeThread<R> {
    name: String,
    tx: Mutex<Option<mpsc::UnboundedSender<RuntimeJob<R>>>>,
    thread_id: ThreadId,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<R: 'static> RuntimeThread<R> {
    /// Start the thread and wait until `init` has produced the runtime.
    pub fn spawn<F>(name: &str, config: &DispatchConfig, init: F) -> Result<Self>
    where
        F: FnOnce() -> std::result::Result<R, String> + Send + 'static,
    {
        let (job_tx, mut job_rx) = mpsc::unbounded_channel::<RuntimeJob<R>>();
        let (init_tx, init_rx) = std_mpsc::channel::<std::result::Result<(), String>>();
        let thread_name = name.to_owned();

        let worker = config
            .thread_builder(name)
            .spawn(move || {
                let event_loop = match tokio::runtime::Builder::new_current_thread().build() {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = init_tx.send(Err(format!("tokio runtime: {e}")));
                        return;
                    }
                };

                let mut runtime = match init() {
                    Ok(runtime) => {
                        let _ = init_tx.send(Ok(()));
                        runtime
                    }
                    Err(err) => {
                        let _ = init_tx.send(Err(err));
                        return;
                    }
                };

                event_loop.block_on(async {
                    while let Some(job) = job_rx.recv().await {
                        run_guarded(|| job(&mut runtime), &thread_name, None);
                    }
                });
                tracing::debug!(runtime = %thread_name, "runtime thread stopped");
            })
            .map_err(|source| DispatchError::Spawn {
                name: name.to_owned(),
                source,
            })?;

        let init_failed = |message: String| DispatchError::RuntimeInit {
            name: name.to_owned(),
            message,
        };
        match init_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(message)) => {
                let _ = worker.join();
                return Err(init_failed(message));
            }
            Err(_) => {
                let _ = worker.join();
                return Err(init_failed("runtime thread exited during startup".to_owned()));
            }
        }

        tracing::debug!(runtime = name, "runtime thread started");
        Ok(Self {
            name: name.to_owned(),
            tx: Mutex::new(Some(job_tx)),
            thread_id: worker.thread().id(),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Close the job channel, let queued jobs finish, and join the thread.
    pub fn shutdown(&self) {
        self.tx.lock().take();
        if self.is_runtime_thread() {
            // Cannot join ourselves; the loop ends once this job returns.
            return;
        }
        let mut worker = self.worker.lock();
        if let Some(handle) = worker.take() {
            if handle.join().is_err() {
                tracing::error!(runtime = %self.name, "runtime thread panicked");
            }
        }
    }
}

impl<R: 'static> CallInvoker for RuntimeThread<R> {
    type Runtime = R;

    fn invoke_async(&self, job: RuntimeJob<R>) -> bool {
        match self.tx.lock().as_ref() {
            Some(tx) => tx.send(job).is_ok(),
            None => false,
        }
    }

    fn is_runtime_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }
}

impl<R> Drop for RuntimeThread<R> {
    fn drop(&mut self) {
        self.tx.lock().take();
        if thread::current().id() != self.thread_id {
            if let Some(handle) = self.worker.lock().take() {
                let _ = handle.join();
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
