// ── Queue factories ───────────────────────────────────────────────────────────
//
// The constructors a host calls while bringing up an instance: one JS queue,
// one UI queue, any number of generic serial queues, and a batching wrapper
// over the UI queue.  Names and affinity checks come from `DispatchConfig`.

use std::sync::Arc;

use crate::{
    config::DispatchConfig,
    error::Result,
    queue::{
        BatchingQueueThread, MessageQueueThread, QueueHooks, SerialQueueThread, UiDispatcher,
        UiQueueThread,
    },
};

/// The queue JS executes on: a serial queue on its own thread.
pub fn make_js_queue_thread(config: &DispatchConfig) -> Result<Arc<dyn MessageQueueThread>> {
    make_js_queue_thread_with(config, QueueHooks::default())
}

pub fn make_js_queue_thread_with(
    config: &DispatchConfig,
    hooks: QueueHooks,
) -> Result<Arc<dyn MessageQueueThread>> {
    let queue = SerialQueueThread::spawn(&config.js_thread_name, config, hooks)?;
    Ok(Arc::new(queue))
}

/// A queue whose items run on the UI thread behind `dispatcher`.
pub fn make_ui_queue_thread(
    config: &DispatchConfig,
    dispatcher: Arc<dyn UiDispatcher>,
) -> Arc<dyn MessageQueueThread> {
    make_ui_queue_thread_with(config, dispatcher, QueueHooks::default())
}

pub fn make_ui_queue_thread_with(
    config: &DispatchConfig,
    dispatcher: Arc<dyn UiDispatcher>,
    hooks: QueueHooks,
) -> Arc<dyn MessageQueueThread> {
    Arc::new(UiQueueThread::new(&config.ui_queue_name, dispatcher, hooks))
}

/// A UI queue bound to the calling thread's Win32 message loop.
#[cfg(windows)]
pub fn make_ui_queue_thread_for_current_thread(
    config: &DispatchConfig,
) -> Result<Arc<dyn MessageQueueThread>> {
    let dispatcher = crate::platform::win32::Win32UiDispatcher::for_current_thread()?;
    Ok(make_ui_queue_thread(config, Arc::new(dispatcher)))
}

/// A general-purpose background queue.
pub fn make_serial_queue_thread(config: &DispatchConfig) -> Result<Arc<dyn MessageQueueThread>> {
    make_serial_queue_thread_with(config, QueueHooks::default())
}

pub fn make_serial_queue_thread_with(
    config: &DispatchConfig,
    hooks: QueueHooks,
) -> Result<Arc<dyn MessageQueueThread>> {
    let queue = SerialQueueThread::spawn(&config.serial_thread_name, config, hooks)?;
    Ok(Arc::new(queue))
}

/// Wrap `queue` so posts are held until `on_batch_complete`.
pub fn make_batching_queue_thread(
    queue: Arc<dyn MessageQueueThread>,
    config: &DispatchConfig,
) -> Arc<BatchingQueueThread> {
    make_batching_queue_thread_with(queue, config, QueueHooks::default())
}

pub fn make_batching_queue_thread_with(
    queue: Arc<dyn MessageQueueThread>,
    config: &DispatchConfig,
    hooks: QueueHooks,
) -> Arc<BatchingQueueThread> {
    Arc::new(BatchingQueueThread::with_hooks(queue, config.batching_affinity, hooks))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
