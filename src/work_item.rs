// ── Work items ────────────────────────────────────────────────────────────────
//
// A work item is the unit every queue moves between threads: a boxed closure
// with no arguments and no result.  Queues take ownership on enqueue and drop
// the box after running it, or without running it on teardown.

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
};

use crate::error::{DispatchError, ErrorHandler};

/// A deferred, argument-less unit of work.
pub type WorkItem = Box<dyn FnOnce() + Send + 'static>;

/// Run `item` on the current thread, containing any panic.
///
/// A panic is logged and forwarded to `on_error` as
/// [`DispatchError::WorkItemPanicked`]; the consumer loop keeps going.
/// A panicking handler is logged and otherwise ignored.  Returns `false`
/// when the item panicked.
pub(crate) fn run_guarded<F>(item: F, queue: &str, on_error: Option<&ErrorHandler>) -> bool
where
    F: FnOnce(),
{
    match panic::catch_unwind(AssertUnwindSafe(item)) {
        Ok(()) => true,
        Err(payload) => {
            let err = DispatchError::WorkItemPanicked {
                queue: queue.to_owned(),
                message: panic_message(payload.as_ref()),
            };
            tracing::error!(queue, error = %err, "work item panicked");
            if let Some(handler) = on_error {
                if panic::catch_unwind(AssertUnwindSafe(|| handler(&err))).is_err() {
                    tracing::error!(queue, "error handler panicked");
                }
            }
            false
        }
    }
}

/// Render a panic payload as text.  `panic!` produces `&str` or `String`.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
