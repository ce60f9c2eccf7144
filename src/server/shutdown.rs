//! Shutdown Coordination
//!
//! Two pieces cooperate to stop the server:
//!
//! - [`ShutdownHandle`] - a one-shot trigger. The console fires it on end of
//!   input, the signal handler fires it on Ctrl+C. The first trigger wins.
//! - [`ShutdownCoordinator`] - runs the stop sequence once the accept loop
//!   has seen the trigger.
//!
//! ## Phases
//!
//! ```text
//!   ACCEPTING ──trigger──► DRAINING ──last client gone──► STOPPED
//!                             │                             │
//!                             ├─ registry closed            └─ tree torn down
//!                             ├─ every client cancelled
//!                             └─ wait for drain
//! ```

use crate::server::registry::Registry;
use crate::storage::Tree;
use std::fmt;
use std::future::Future;
use std::io;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// What asked the server to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The admin console reached end of input
    ConsoleEof,
    /// The process received an interrupt signal
    Interrupt,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::ConsoleEof => write!(f, "console end of input"),
            ShutdownReason::Interrupt => write!(f, "interrupt signal"),
        }
    }
}

/// A cloneable one-shot shutdown trigger.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    reason: Arc<watch::Sender<Option<ShutdownReason>>>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (reason, _) = watch::channel(None);
        Self {
            reason: Arc::new(reason),
        }
    }

    /// Requests shutdown. Returns `false` if shutdown was already requested,
    /// in which case the original reason is kept.
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        let fired = self.reason.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
        if fired {
            info!(%reason, "shutdown requested");
        }
        fired
    }

    /// The reason shutdown was requested, if it has been.
    pub fn triggered(&self) -> Option<ShutdownReason> {
        *self.reason.borrow()
    }

    /// Waits until shutdown is requested and returns the reason.
    pub async fn wait(&self) -> ShutdownReason {
        let mut rx = self.reason.subscribe();
        loop {
            let current = *rx.borrow_and_update();
            if let Some(reason) = current {
                return reason;
            }
            // The sender lives in `self`, so `changed` only fails if it is gone.
            if rx.changed().await.is_err() {
                return ShutdownReason::Interrupt;
            }
        }
    }

    /// Triggers [`ShutdownReason::Interrupt`] for every signal `next_signal`
    /// delivers.
    ///
    /// The first interrupt starts shutdown. Later ones only log that shutdown
    /// is already under way. Returns when the signal source fails.
    pub async fn relay_interrupts<S, F>(&self, mut next_signal: S)
    where
        S: FnMut() -> F,
        F: Future<Output = io::Result<()>>,
    {
        loop {
            if let Err(e) = next_signal().await {
                warn!(error = %e, "Failed to listen for interrupts");
                return;
            }
            if !self.trigger(ShutdownReason::Interrupt) {
                warn!("interrupt received while already shutting down");
            }
        }
    }
}

/// Lifecycle phase of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// New clients are admitted
    Accepting,
    /// No new clients; existing ones are being cancelled
    Draining,
    /// Every client is gone and the tree has been freed
    Stopped,
}

/// Summary of a completed shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    pub reason: ShutdownReason,
    /// Clients that were still connected when shutdown began
    pub cancelled: usize,
    /// Tree nodes freed by the teardown
    pub nodes_freed: usize,
}

/// Drives the ACCEPTING → DRAINING → STOPPED sequence.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    phase: watch::Sender<Phase>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (phase, _) = watch::channel(Phase::Accepting);
        Self { phase }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// Subscribes to phase changes.
    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// Runs the stop sequence.
    ///
    /// The listener must already be closed. The tree is only torn down after
    /// the last client has left, so no operation can observe freed nodes.
    pub async fn shut_down(
        &self,
        reason: ShutdownReason,
        registry: &Registry,
        tree: &Tree,
    ) -> ShutdownReport {
        self.phase.send_replace(Phase::Draining);
        info!(%reason, "draining clients");

        registry.close();
        let cancelled = registry.cancel_all();
        registry.await_drain().await;

        self.phase.send_replace(Phase::Stopped);
        let nodes_freed = tree.teardown();
        info!(cancelled, nodes_freed, "server stopped");

        ShutdownReport {
            reason,
            cancelled,
            nodes_freed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::time::timeout;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    #[test]
    fn test_first_trigger_wins() {
        let handle = ShutdownHandle::new();
        assert_eq!(handle.triggered(), None);

        assert!(handle.trigger(ShutdownReason::ConsoleEof));
        assert!(!handle.trigger(ShutdownReason::Interrupt));
        assert_eq!(handle.triggered(), Some(ShutdownReason::ConsoleEof));
    }

    #[test]
    fn test_wait_resolves_on_trigger() {
        let handle = ShutdownHandle::new();
        let other = handle.clone();

        let mut wait = task::spawn(handle.wait());
        assert_pending!(wait.poll());

        other.trigger(ShutdownReason::Interrupt);
        assert!(wait.is_woken());
        assert_ready_eq!(wait.poll(), ShutdownReason::Interrupt);
    }

    #[test]
    fn test_wait_after_trigger_is_immediate() {
        let handle = ShutdownHandle::new();
        handle.trigger(ShutdownReason::ConsoleEof);

        let mut wait = task::spawn(handle.wait());
        assert_ready_eq!(wait.poll(), ShutdownReason::ConsoleEof);
    }

    #[tokio::test]
    async fn test_shut_down_phases() {
        let coordinator = ShutdownCoordinator::new();
        let registry = Arc::new(Registry::new());
        let tree = Tree::new();
        tree.add("a", "1").unwrap();
        tree.add("b", "2").unwrap();

        let mut phases = coordinator.subscribe();
        assert_eq!(*phases.borrow_and_update(), Phase::Accepting);

        let guard = registry
            .register(SocketAddr::from(([127, 0, 0, 1], 1)))
            .unwrap();
        let id = guard.id();
        let client = tokio::spawn(async move {
            let _guard = guard;
            std::future::pending::<()>().await;
        });
        registry.attach(id, client.abort_handle());

        let report = timeout(
            Duration::from_secs(2),
            coordinator.shut_down(ShutdownReason::ConsoleEof, &registry, &tree),
        )
        .await
        .expect("shutdown should complete");

        assert_eq!(
            report,
            ShutdownReport {
                reason: ShutdownReason::ConsoleEof,
                cancelled: 1,
                nodes_freed: 2,
            }
        );
        assert_eq!(coordinator.phase(), Phase::Stopped);
        assert!(registry.is_empty());
        assert!(registry.is_closed());
        assert!(tree.is_empty());
        assert!(phases.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_shut_down_without_clients() {
        let coordinator = ShutdownCoordinator::new();
        let registry = Registry::new();
        let tree = Tree::new();

        let report = coordinator
            .shut_down(ShutdownReason::Interrupt, &registry, &tree)
            .await;

        assert_eq!(report.cancelled, 0);
        assert_eq!(report.nodes_freed, 0);
        assert_eq!(coordinator.phase(), Phase::Stopped);
    }

    #[tokio::test]
    async fn test_relay_repeated_interrupts() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let handle = ShutdownHandle::new();
        let delivered = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&delivered);
        let next_signal = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    Ok(())
                } else {
                    Err(io::Error::new(io::ErrorKind::Other, "signal stream closed"))
                }
            }
        };

        timeout(Duration::from_secs(2), handle.relay_interrupts(next_signal))
            .await
            .expect("relay should stop when the signal source fails");

        // Three interrupts delivered, then the failing fourth listen
        assert_eq!(delivered.load(Ordering::SeqCst), 4);
        assert_eq!(handle.triggered(), Some(ShutdownReason::Interrupt));
    }

    #[tokio::test]
    async fn test_relay_keeps_earlier_reason() {
        let handle = ShutdownHandle::new();
        handle.trigger(ShutdownReason::ConsoleEof);

        let mut remaining = 2;
        handle
            .relay_interrupts(move || {
                remaining -= 1;
                let result = if remaining > 0 {
                    Ok(())
                } else {
                    Err(io::Error::new(io::ErrorKind::Other, "done"))
                };
                async move { result }
            })
            .await;

        assert_eq!(handle.triggered(), Some(ShutdownReason::ConsoleEof));
    }
}
