// ── Execution gate ────────────────────────────────────────────────────────────
//
// Queues that hand items to a loop they do not own (the UI message loop, a JS
// runtime's invoker) cannot recall items once posted.  Each item instead
// passes through this gate when it finally runs: after `close` it is skipped,
// and `close` can wait out an item that is already running.

use parking_lot::{Condvar, Mutex};

struct GateState {
    closed: bool,
    running: usize,
}

pub(crate) struct ExecutionGate {
    state: Mutex<GateState>,
    idle: Condvar,
}

/// Proof that an item is running; leaving the gate on drop, unwinding included.
pub(crate) struct GatePass<'a> {
    gate: &'a ExecutionGate,
}

impl ExecutionGate {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                closed: false,
                running: 0,
            }),
            idle: Condvar::new(),
        }
    }

    /// Enter the gate, or `None` once it is closed.
    pub(crate) fn enter(&self) -> Option<GatePass<'_>> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }
        // Counted, not flagged: an item may pump its loop and run another.
        state.running += 1;
        Some(GatePass { gate: self })
    }

    /// Close the gate.  With `wait`, block until running items have left.
    ///
    /// Returns `true` for the call that actually closed it.
    pub(crate) fn close(&self, wait: bool) -> bool {
        let mut state = self.state.lock();
        let first = !state.closed;
        state.closed = true;
        if wait {
            while state.running > 0 {
                self.idle.wait(&mut state);
            }
        }
        first
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl Drop for GatePass<'_> {
    fn drop(&mut self) {
        let mut state = self.gate.state.lock();
        state.running -= 1;
        if state.running == 0 {
            self.gate.idle.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        thread,
        time::Duration,
    };

    #[test]
    fn closed_gate_refuses_entry() {
        let gate = ExecutionGate::new();
        assert!(gate.enter().is_some());
        assert!(gate.close(true));
        assert!(gate.enter().is_none());
        assert!(!gate.close(true), "second close is not the first");
    }

    #[test]
    fn close_waits_for_running_item() {
        let gate = Arc::new(ExecutionGate::new());
        let finished = Arc::new(AtomicBool::new(false));
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();

        let worker = {
            let gate = Arc::clone(&gate);
            let finished = Arc::clone(&finished);
            thread::spawn(move || {
                let _pass = gate.enter().expect("open");
                entered_tx.send(()).expect("send");
                thread::sleep(Duration::from_millis(50));
                finished.store(true, Ordering::SeqCst);
            })
        };

        entered_rx.recv().expect("entered");
        gate.close(true);
        assert!(finished.load(Ordering::SeqCst));
        worker.join().expect("join");
    }

    #[test]
    fn close_without_wait_returns_while_item_runs() {
        let gate = ExecutionGate::new();
        let _pass = gate.enter().expect("open");
        assert!(gate.close(false));
        assert!(gate.is_closed());
    }
}
