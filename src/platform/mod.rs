// ── Platform UI loops ─────────────────────────────────────────────────────────
//
// `UiDispatcher` implementations.  All Win32 FFI is confined to the `win32`
// sub-module and never leaks outward; `looper` is pure safe Rust and runs
// everywhere.

pub mod looper;

#[cfg(windows)]
pub mod win32;
