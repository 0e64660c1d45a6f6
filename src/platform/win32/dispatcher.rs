// ── Win32 UI dispatcher ───────────────────────────────────────────────────────
//
// Responsibilities in this file (unsafe confined here):
//   • Register the dispatch window class.
//   • Create a message-only window on the UI thread.
//   • Carry work items to that thread as boxed pointers in a posted message.
//   • Reclaim items that never ran when the window goes away.
//   • Run a plain message loop for hosts that own no other.
//
// Ownership of a posted item travels with the message: `post` leaks the box
// into LPARAM, and exactly one of `wnd_proc` (run) or `drain_pending` (drop)
// takes it back.

#![allow(unsafe_code)]

use std::{
    ffi::c_void,
    thread::{self, ThreadId},
};

use windows::{
    core::{w, PCWSTR},
    Win32::{
        Foundation::{GetLastError, HINSTANCE, HWND, LPARAM, LRESULT, WPARAM},
        System::LibraryLoader::GetModuleHandleW,
        UI::WindowsAndMessaging::{
            CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW, GetMessageW,
            PeekMessageW, PostMessageW, PostQuitMessage, RegisterClassExW, TranslateMessage,
            HMENU, HWND_MESSAGE, MSG, PM_REMOVE, WINDOW_EX_STYLE, WINDOW_STYLE, WM_APP,
            WM_CLOSE, WM_DESTROY, WNDCLASSEXW,
        },
    },
};

use crate::{
    error::{DispatchError, Result},
    queue::UiDispatcher,
    work_item::{run_guarded, WorkItem},
};

// ── Window identity ───────────────────────────────────────────────────────────

/// Atom name used to register the dispatch window class.
const CLASS_NAME: PCWSTR = w!("BridgeqDispatchWindow");

/// Private message carrying a `Box<WorkItem>` pointer in LPARAM.
const WM_RUN_WORK_ITEM: u32 = WM_APP + 0x0B1;

/// `RegisterClassExW` fails with this once the class exists in the process.
const ERROR_CLASS_ALREADY_EXISTS: u32 = 1410;

const QUEUE_NAME: &str = "win32-ui";

// ── Dispatcher ────────────────────────────────────────────────────────────────

/// Posts work items into the message loop of the thread that created it.
pub struct Win32UiDispatcher {
    /// Raw HWND value; `HWND` itself is not `Send`.
    hwnd: isize,
    thread: ThreadId,
}

impl Win32UiDispatcher {
    /// Create the message-only window on the calling thread, which becomes the
    /// UI thread.  That thread must pump messages for items to run.
    pub fn for_current_thread() -> Result<Self> {
        // SAFETY: GetModuleHandleW(None) returns the process's own module,
        // valid for the process lifetime.
        let hmodule = unsafe { GetModuleHandleW(None) }.map_err(DispatchError::from)?;
        let hinstance = HINSTANCE(hmodule.0);

        register_class(hinstance)?;
        let hwnd = create_window(hinstance)?;
        tracing::debug!(hwnd = hwnd.0 as isize, "win32 dispatch window created");

        Ok(Self {
            hwnd: hwnd.0 as isize,
            thread: thread::current().id(),
        })
    }

    fn hwnd(&self) -> HWND {
        HWND(self.hwnd as *mut c_void)
    }
}

impl UiDispatcher for Win32UiDispatcher {
    fn post(&self, item: WorkItem) -> bool {
        let raw = Box::into_raw(Box::new(item));
        // SAFETY: hwnd is our message-only window.  On success the UI thread's
        // wnd_proc (or drain_pending) owns `raw`; on failure nobody received it.
        let posted =
            unsafe { PostMessageW(self.hwnd(), WM_RUN_WORK_ITEM, WPARAM(0), LPARAM(raw as isize)) };
        match posted {
            Ok(()) => true,
            Err(e) => {
                // SAFETY: the message was not queued, so `raw` is still ours.
                drop(unsafe { Box::from_raw(raw) });
                tracing::warn!(error = %e, "PostMessageW refused work item");
                false
            }
        }
    }

    fn has_thread_access(&self) -> bool {
        thread::current().id() == self.thread
    }
}

impl Drop for Win32UiDispatcher {
    fn drop(&mut self) {
        if self.has_thread_access() {
            // SAFETY: hwnd belongs to this thread; DestroyWindow sends
            // WM_DESTROY synchronously, which drains queued items.
            unsafe {
                let _ = DestroyWindow(self.hwnd());
            }
        } else {
            // DestroyWindow only works on the owning thread.  WM_CLOSE queues
            // behind any items already posted, so those still run first.
            // SAFETY: posting to a window handle is valid from any thread.
            unsafe {
                let _ = PostMessageW(self.hwnd(), WM_CLOSE, WPARAM(0), LPARAM(0));
            }
        }
    }
}

// ── Message loop ──────────────────────────────────────────────────────────────

/// Pump messages for the calling thread until `WM_QUIT`.
pub fn run_message_loop() -> Result<()> {
    let mut msg = MSG::default();

    loop {
        // SAFETY: &mut msg is a valid MSG pointer; HWND::default() retrieves
        // messages for all windows on this thread; 0,0 filter accepts all.
        let ret = unsafe { GetMessageW(&mut msg, HWND::default(), 0, 0) };

        match ret.0 {
            -1 => return Err(last_error("GetMessageW")),
            0 => break,
            _ => unsafe {
                // SAFETY: msg was populated by a successful GetMessageW call.
                let _ = TranslateMessage(&msg);
                let _ = DispatchMessageW(&msg);
            },
        }
    }

    Ok(())
}

/// Ask the calling thread's message loop to exit.
pub fn quit_message_loop() {
    // SAFETY: PostQuitMessage posts WM_QUIT to the calling thread's queue.
    unsafe { PostQuitMessage(0) };
}

// ── Window class & creation ───────────────────────────────────────────────────

fn register_class(hinstance: HINSTANCE) -> Result<()> {
    let wndclass = WNDCLASSEXW {
        cbSize: std::mem::size_of::<WNDCLASSEXW>() as u32,
        lpfnWndProc: Some(wnd_proc),
        hInstance: hinstance,
        lpszClassName: CLASS_NAME,
        ..Default::default()
    };

    // SAFETY: wndclass is fully initialised; CLASS_NAME is a static
    // null-terminated UTF-16 literal.
    let atom = unsafe { RegisterClassExW(&wndclass) };
    if atom == 0 {
        let err = last_error("RegisterClassExW");
        if !matches!(err, DispatchError::Win32 { code: ERROR_CLASS_ALREADY_EXISTS, .. }) {
            return Err(err);
        }
    }
    Ok(())
}

fn create_window(hinstance: HINSTANCE) -> Result<HWND> {
    // SAFETY: CLASS_NAME is registered; HWND_MESSAGE makes a message-only
    // window with no visuals and no broadcast traffic.
    let hwnd = unsafe {
        CreateWindowExW(
            WINDOW_EX_STYLE(0),
            CLASS_NAME,
            PCWSTR::null(),
            WINDOW_STYLE(0),
            0,
            0,
            0,
            0,
            HWND_MESSAGE,
            HMENU::default(),
            hinstance,
            None,
        )
    }
    .map_err(DispatchError::from)?;
    Ok(hwnd)
}

// ── Window procedure ──────────────────────────────────────────────────────────

// SAFETY: registered as lpfnWndProc; Windows guarantees the arguments are
// valid for the duration of the call.
unsafe extern "system" fn wnd_proc(hwnd: HWND, msg: u32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    match msg {
        WM_RUN_WORK_ITEM => {
            // SAFETY: LPARAM carries a pointer produced by Box::into_raw in
            // `post`; each message is delivered once.
            let item = Box::from_raw(lparam.0 as *mut WorkItem);
            // A panic must not unwind across this extern "system" frame.
            run_guarded(*item, QUEUE_NAME, None);
            LRESULT(0)
        }

        WM_CLOSE => {
            let _ = DestroyWindow(hwnd);
            LRESULT(0)
        }

        WM_DESTROY => {
            let dropped = drain_pending(hwnd);
            if dropped > 0 {
                tracing::debug!(dropped, "dispatch window destroyed with queued items");
            }
            LRESULT(0)
        }

        _ => DefWindowProcW(hwnd, msg, wparam, lparam),
    }
}

/// Remove and drop every queued `WM_RUN_WORK_ITEM` for `hwnd`.
fn drain_pending(hwnd: HWND) -> usize {
    let mut msg = MSG::default();
    let mut dropped = 0;
    // SAFETY: hwnd is the window being destroyed on its own thread; each
    // removed message's LPARAM is an unclaimed Box<WorkItem> pointer.
    unsafe {
        while PeekMessageW(&mut msg, hwnd, WM_RUN_WORK_ITEM, WM_RUN_WORK_ITEM, PM_REMOVE).as_bool() {
            drop(Box::from_raw(msg.lParam.0 as *mut WorkItem));
            dropped += 1;
        }
    }
    dropped
}

// ── Error helpers ─────────────────────────────────────────────────────────────

/// Capture the current Win32 last-error code and wrap it in a `DispatchError`.
///
/// Call immediately after the failing function: `GetLastError` reads
/// thread-local state that any later API call may overwrite.
fn last_error(function: &'static str) -> DispatchError {
    // SAFETY: GetLastError reads thread-local state and never fails.
    let code = unsafe { GetLastError() };
    DispatchError::Win32 {
        function,
        code: code.0,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
