// ── Central error type ────────────────────────────────────────────────────────
//
// Fallible construction paths (spawning a queue thread, creating the UI
// message window, loading configuration) return `error::Result<T>`.
// Enqueue operations never fail: posting to a queue that has quit is a silent
// no-op.  Work-item panics are caught by the consumer and reported through a
// `DispatchError::WorkItemPanicked` value handed to the queue's error handler.

use std::sync::Arc;

use thiserror::Error;

/// Every error that `bridgeq` can produce.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The OS refused to create a consumer thread.
    #[error("failed to spawn queue thread {name:?}: {source}")]
    Spawn {
        /// Name the thread would have carried.
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// A Win32 API call returned a failure code.
    #[error("{function} failed (error {code:#010x})")]
    Win32 {
        /// The name of the failing function, for display purposes.
        function: &'static str,
        /// The raw Win32 error code (`GetLastError()` value) or HRESULT.
        code: u32,
    },

    /// A work item panicked while running on a queue.
    #[error("work item panicked on queue {queue:?}: {message}")]
    WorkItemPanicked {
        /// Name of the queue whose consumer caught the panic.
        queue: String,
        /// Panic payload rendered as text.
        message: String,
    },

    /// The runtime behind a call invoker failed to start.
    #[error("runtime thread {name:?} failed to initialize: {message}")]
    RuntimeInit { name: String, message: String },

    /// Configuration could not be parsed.
    #[error("invalid dispatch configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// A standard I/O error (reading a configuration file, …).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// Convert a windows-crate error (HRESULT) directly into a DispatchError so that
// `?` can be used on `windows::core::Result<T>` throughout the platform module.
#[cfg(windows)]
impl From<windows::core::Error> for DispatchError {
    fn from(e: windows::core::Error) -> Self {
        // HRESULT.0 is i32; reinterpret bits as u32 for display purposes.
        Self::Win32 {
            function: "windows",
            code: e.code().0 as u32,
        }
    }
}

/// Callback receiving errors a queue cannot return to anyone, i.e. panics
/// caught inside work items.
pub type ErrorHandler = Arc<dyn Fn(&DispatchError) + Send + Sync>;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DispatchError>;
