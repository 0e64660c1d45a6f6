// ── Win32 platform implementation ─────────────────────────────────────────────
//
// One of exactly two places in the crate where `unsafe` code is permitted (the
// other is `handle`).  Every `unsafe` block MUST carry a `// SAFETY:` comment
// that states:
//   • which invariant makes the operation sound, and
//   • what the caller is responsible for maintaining.

#![allow(unsafe_code)]

mod dispatcher;

pub use dispatcher::{quit_message_loop, run_message_loop, Win32UiDispatcher};
