// ── Background load, queued continuation ──────────────────────────────────────
//
// Expensive work (reading a bundle, decoding an image) runs on a throwaway
// thread; its result comes back to the queue that asked for it as an ordinary
// work item.  The continuation never runs on the loading thread and never hops
// implicitly: if the origin queue has quit by the time the load finishes, the
// continuation is dropped with it.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread::JoinHandle,
};

use crate::{
    config::DispatchConfig,
    error::{DispatchError, Result},
    queue::{MessageQueueThread, MessageQueueThreadExt},
    work_item::panic_message,
};

/// Run `load` on a new thread named `name`, then post
/// `continuation(result)` to `origin`.
///
/// A panicking `load` is logged and posts nothing.
pub fn spawn_then_post<T, L, C>(
    origin: Arc<dyn MessageQueueThread>,
    name: &str,
    config: &DispatchConfig,
    load: L,
    continuation: C,
) -> Result<JoinHandle<()>>
where
    T: Send + 'static,
    L: FnOnce() -> T + Send + 'static,
    C: FnOnce(T) + Send + 'static,
{
    let thread_name = name.to_owned();
    config
        .thread_builder(name)
        .spawn(move || match panic::catch_unwind(AssertUnwindSafe(load)) {
            Ok(value) => origin.post(move || continuation(value)),
            Err(payload) => {
                tracing::error!(
                    thread = %thread_name,
                    origin = origin.name(),
                    panic = %panic_message(payload.as_ref()),
                    "background load panicked; continuation dropped"
                );
            }
        })
        .map_err(|source| DispatchError::Spawn {
            name: name.to_owned(),
            source,
        })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
