// ── Safety policy ────────────────────────────────────────────────────────────
// Unsafe code is forbidden everywhere except:
//   • `platform::win32` – Win32 / WinAPI FFI
//   • `handle`          – raw pointer behind thread-owned weak handles
// Each unsafe block in those modules MUST carry a `// SAFETY:` comment.
#![deny(unsafe_code)]

//! Cross-thread message dispatch for a JS-to-native bridge.
//!
//! Work items are posted to [`MessageQueueThread`]s: a serial queue on its own
//! thread, the host's UI loop, or a JS runtime's call invoker.  A
//! [`BatchingQueueThread`] holds UI work back until the bridge reports the end
//! of a batch.  [`ThreadOwned`] / [`WeakHandle`] let callbacks refer to
//! thread-affine objects that may be gone by the time they run.

pub mod config;
pub mod continuation;
pub mod error;
pub mod factory;
pub mod handle;
pub mod platform;
pub mod queue;
pub mod work_item;

pub use config::{AffinityCheck, DispatchConfig};
pub use continuation::spawn_then_post;
pub use error::{DispatchError, ErrorHandler, Result};
pub use factory::{
    make_batching_queue_thread, make_batching_queue_thread_with, make_js_queue_thread, make_js_queue_thread_with,
    make_serial_queue_thread, make_serial_queue_thread_with, make_ui_queue_thread,
    make_ui_queue_thread_with,
};
#[cfg(windows)]
pub use factory::make_ui_queue_thread_for_current_thread;
pub use handle::{HandlePolicy, ThreadOwned, WeakHandle};
pub use queue::{
    BatchingMessageQueueThread, BatchingQueueThread, CallInvoker, CallInvokerQueueThread,
    ControllableMessageQueueThread, DispatchMode, MessageQueueThread, MessageQueueThreadExt,
    QueueHooks, RuntimeJob, RuntimeThread, SerialQueueThread, UiDispatcher, UiQueueThread,
};
pub use work_item::WorkItem;
