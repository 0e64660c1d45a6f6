// ── Thread-owned weak handles ─────────────────────────────────────────────────
//
// A UI control lives on one thread, but callbacks that mention it get posted
// from many.  `ThreadOwned<T>` keeps the control on the heap next to a shared
// box holding a pointer to it and the creating thread's id.  Callbacks capture
// a `WeakHandle<T>` instead of the control; when the control is dropped the
// pointer is cleared and every pending callback resolves to `None`.
//
// Invariants:
//   • The pointer is only dereferenced while counted in `Slot::readers`.
//   • Clearing waits until `readers` is empty, so a resolution in progress
//     never sees the value freed beneath it.
//   • `with` dereferences only on the recorded thread; `with_any_thread`
//     requires `T: Sync`.
//
// This is one of exactly two modules where `unsafe` is permitted (the other
// is `platform::win32`).  Every `unsafe` block MUST carry a `// SAFETY:`
// comment.

#![allow(unsafe_code)]

use std::{
    marker::PhantomData,
    ops::Deref,
    ptr::NonNull,
    sync::{Arc, Weak},
    thread::{self, ThreadId},
};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::config::DispatchConfig;

// ── Policy ────────────────────────────────────────────────────────────────────

/// Which cross-thread misuse fails fast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlePolicy {
    /// Clearing (dropping the owner) off its thread panics.  Off-thread
    /// resolution yields `None`.
    StrictOnClear,
    /// Resolving off the owner's thread panics.  Clearing is allowed from any
    /// thread, for teardown that races the owner's thread.
    #[default]
    StrictOnGet,
    /// Neither panics: off-thread resolution yields `None`, off-thread
    /// clearing is allowed.
    Unchecked,
}

// ── Shared box ────────────────────────────────────────────────────────────────

struct Slot<T> {
    ptr: Option<NonNull<T>>,
    /// Threads currently inside a resolution, one entry per nesting level.
    readers: Vec<ThreadId>,
}

struct HandleBox<T> {
    slot: Mutex<Slot<T>>,
    released: Condvar,
    thread: ThreadId,
    policy: HandlePolicy,
}

// SAFETY: the box never owns or drops a `T`.  The pointer is dereferenced
// only on the recorded thread (`with`) or, for `T: Sync`, on any thread
// (`with_any_thread`), in both cases while registered as a reader, which
// keeps `ThreadOwned::drop` from freeing the value.
unsafe impl<T> Send for HandleBox<T> {}
// SAFETY: as above; all mutable state sits behind the mutex.
unsafe impl<T> Sync for HandleBox<T> {}

/// Unregisters a reader on drop, panics included.
struct ReaderGuard<'a, T> {
    handle: &'a HandleBox<T>,
}

impl<T> Drop for ReaderGuard<'_, T> {
    fn drop(&mut self) {
        let me = thread::current().id();
        let mut slot = self.handle.slot.lock();
        if let Some(i) = slot.readers.iter().rposition(|&t| t == me) {
            slot.readers.swap_remove(i);
        }
        if slot.readers.is_empty() {
            self.handle.released.notify_all();
        }
    }
}

impl<T> HandleBox<T> {
    /// Register the caller as a reader and hand out the pointer.
    fn acquire(&self) -> Option<(NonNull<T>, ReaderGuard<'_, T>)> {
        let mut slot = self.slot.lock();
        let ptr = slot.ptr?;
        slot.readers.push(thread::current().id());
        Some((ptr, ReaderGuard { handle: self }))
    }

    fn clear(&self) {
        let me = thread::current().id();
        if me != self.thread && self.policy == HandlePolicy::StrictOnClear {
            panic!(
                "thread-owned value cleared on {me:?}; it belongs to {:?}",
                self.thread
            );
        }

        let mut slot = self.slot.lock();
        if slot.readers.contains(&me) {
            drop(slot);
            panic!("thread-owned value cleared from inside one of its own resolutions");
        }
        while !slot.readers.is_empty() {
            self.released.wait(&mut slot);
        }
        slot.ptr = None;
    }
}

// ── Owner side ────────────────────────────────────────────────────────────────

/// An owner object paired with the box its weak handles resolve through.
///
/// Derefs to `&T` only; owners that need mutation use interior mutability,
/// as resolved callbacks hold `&T` too.
pub struct ThreadOwned<T> {
    handle: Arc<HandleBox<T>>,
    /// Allocated by `Box::into_raw`; freed in `Drop`.
    value: NonNull<T>,
    _owns: PhantomData<T>,
}

// SAFETY: `ThreadOwned` uniquely owns the `T` behind `value`, like a `Box<T>`.
// Once moved, weak handles still hand `&T` to the recorded thread, so moving
// requires `Sync` as well.
unsafe impl<T: Send + Sync> Send for ThreadOwned<T> {}
// SAFETY: shared access only ever yields `&T`.
unsafe impl<T: Sync> Sync for ThreadOwned<T> {}

impl<T> ThreadOwned<T> {
    /// Wrap `value` with [`HandlePolicy::StrictOnGet`], recording the
    /// calling thread as its owner.
    pub fn new(value: T) -> Self {
        Self::with_policy(value, HandlePolicy::default())
    }

    pub fn with_policy(value: T, policy: HandlePolicy) -> Self {
        let value = NonNull::from(Box::leak(Box::new(value)));
        let handle = Arc::new(HandleBox {
            slot: Mutex::new(Slot {
                ptr: Some(value),
                readers: Vec::new(),
            }),
            released: Condvar::new(),
            thread: thread::current().id(),
            policy,
        });
        Self {
            handle,
            value,
            _owns: PhantomData,
        }
    }

    /// Wrap `value` with the policy configured for the host.
    pub fn with_config(value: T, config: &DispatchConfig) -> Self {
        Self::with_policy(value, config.handle_policy)
    }

    /// A weak reference safe to capture into work items for any queue.
    pub fn weak_handle(&self) -> WeakHandle<T> {
        WeakHandle {
            inner: Arc::downgrade(&self.handle),
        }
    }

    /// Detach every weak handle now, ahead of drop.  Idempotent.
    pub fn invalidate(&self) {
        self.handle.clear();
    }

    pub fn policy(&self) -> HandlePolicy {
        self.handle.policy
    }

    pub fn owner_thread(&self) -> ThreadId {
        self.handle.thread
    }
}

impl<T> Deref for ThreadOwned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: `value` came from Box::leak and is freed only in Drop,
        // which needs `&mut self`.
        unsafe { self.value.as_ref() }
    }
}

impl<T> Drop for ThreadOwned<T> {
    fn drop(&mut self) {
        // Panics (strict policy) leave the value leaked, never dangling.
        self.handle.clear();
        // SAFETY: the pointer is cleared and no reader is registered, so no
        // handle can reach the value; we are its sole owner.
        drop(unsafe { Box::from_raw(self.value.as_ptr()) });
    }
}

// ── Callback side ─────────────────────────────────────────────────────────────

/// A reference to a [`ThreadOwned`] value that never extends its lifetime.
pub struct WeakHandle<T> {
    inner: Weak<HandleBox<T>>,
}

impl<T> Clone for WeakHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<T> WeakHandle<T> {
    /// Run `f` with the owner if it is still alive.
    ///
    /// `None` when the owner is gone or was invalidated.  Off the owner's
    /// thread the value is never touched: [`HandlePolicy::StrictOnGet`]
    /// panics, other policies return `None`.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let handle = self.inner.upgrade()?;
        let me = thread::current().id();
        if me != handle.thread {
            if handle.policy == HandlePolicy::StrictOnGet {
                panic!(
                    "thread-owned value resolved on {me:?}; it belongs to {:?}",
                    handle.thread
                );
            }
            tracing::warn!(?me, owner = ?handle.thread, "off-thread resolution ignored");
            return None;
        }

        let (ptr, _reader) = handle.acquire()?;
        // SAFETY: we are on the owner's thread and registered as a reader, so
        // the value stays allocated until `_reader` drops.
        Some(f(unsafe { ptr.as_ref() }))
    }

    /// Whether the owner is alive and not invalidated.
    pub fn is_alive(&self) -> bool {
        self.inner
            .upgrade()
            .is_some_and(|handle| handle.slot.lock().ptr.is_some())
    }
}

impl<T: Sync> WeakHandle<T> {
    /// Like [`with`](Self::with), but from any thread: `T: Sync` makes a
    /// shared reference valid everywhere.
    pub fn with_any_thread<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let handle = self.inner.upgrade()?;
        let (ptr, _reader) = handle.acquire()?;
        // SAFETY: registered as a reader, so the value outlives `f`; `T: Sync`
        // permits `&T` on this thread.
        Some(f(unsafe { ptr.as_ref() }))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
