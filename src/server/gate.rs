//! Admission Gate
//!
//! A process-wide open/closed flag that every connection consults before it
//! runs a command. The console closes it with `s` and reopens it with `g`.
//!
//! ```text
//!   conn A ──► wait() ──┐
//!   conn B ──► wait() ──┼──► [ gate: open | closed ] ◄── console s / g
//!   conn C ──► wait() ──┘
//! ```
//!
//! A command that has already passed the gate runs to completion even if
//! the gate closes while it executes. Waiting at a closed gate is an await
//! point, so a cancelled connection stops there without running anything.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Shared open/closed flag gating command execution.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    state: Arc<watch::Sender<bool>>,
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self::new()
    }
}

impl AdmissionGate {
    /// Creates an open gate.
    pub fn new() -> Self {
        let (state, _) = watch::channel(true);
        Self {
            state: Arc::new(state),
        }
    }

    /// Waits until the gate is open. Returns immediately if it already is.
    pub async fn wait(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|open| *open).await;
    }

    /// Stops new commands from starting.
    pub fn close(&self) {
        if self.state.send_replace(false) {
            debug!("admission gate closed");
        }
    }

    /// Lets waiting and future commands proceed.
    pub fn open(&self) {
        if !self.state.send_replace(true) {
            debug!("admission gate opened");
        }
    }

    /// Returns whether commands are currently admitted.
    pub fn is_open(&self) -> bool {
        *self.state.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[test]
    fn test_open_gate_admits_immediately() {
        let gate = AdmissionGate::new();
        assert!(gate.is_open());

        let mut wait = task::spawn(gate.wait());
        assert_ready!(wait.poll());
    }

    #[test]
    fn test_closed_gate_blocks_until_opened() {
        let gate = AdmissionGate::new();
        gate.close();
        assert!(!gate.is_open());

        let mut first = task::spawn(gate.wait());
        let mut second = task::spawn(gate.wait());
        assert_pending!(first.poll());
        assert_pending!(second.poll());

        gate.open();
        assert!(first.is_woken());
        assert!(second.is_woken());
        assert_ready!(first.poll());
        assert_ready!(second.poll());
    }

    #[test]
    fn test_repeated_close_and_open() {
        let gate = AdmissionGate::new();
        gate.close();
        gate.close();
        assert!(!gate.is_open());

        gate.open();
        gate.open();
        assert!(gate.is_open());

        let mut wait = task::spawn(gate.wait());
        assert_ready!(wait.poll());
    }

    #[test]
    fn test_clones_share_state() {
        let gate = AdmissionGate::new();
        let other = gate.clone();

        other.close();
        let mut wait = task::spawn(gate.wait());
        assert_pending!(wait.poll());

        other.open();
        assert_ready!(wait.poll());
    }
}
