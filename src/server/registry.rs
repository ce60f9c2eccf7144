//! Client Registry
//!
//! Tracks every live client session so that shutdown can find them, cancel
//! them, and wait until the last one is gone.
//!
//! ## Lifecycle of an Entry
//!
//! ```text
//!   register(peer) ──► ClientGuard ──► attach(id, abort handle)
//!                          │
//!                          │  session ends: normal return, error,
//!                          │  or cancellation
//!                          ▼
//!                   drop(ClientGuard) ──► entry removed, count - 1
//!                                              │
//!                                              ▼
//!                                   count == 0 wakes await_drain()
//! ```
//!
//! Removal happens in the guard's `Drop`, which runs however the task that
//! owns it finishes. The registry mutex is never held across an await.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, info};

/// Identifier of one registered client session.
pub type ClientId = u64;

/// Errors returned by the registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The server is shutting down and admits no new clients
    #[error("client registry is closed")]
    Closed,
}

#[derive(Debug)]
struct ClientEntry {
    peer: SocketAddr,
    abort: Option<AbortHandle>,
    cancel_requested: bool,
}

#[derive(Debug, Default)]
struct Inner {
    clients: HashMap<ClientId, ClientEntry>,
    next_id: ClientId,
    closed: bool,
}

/// The set of live client sessions.
#[derive(Debug)]
pub struct Registry {
    inner: Mutex<Inner>,
    /// Number of registered clients, observable by drain waiters
    active: watch::Sender<usize>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Creates an empty, open registry.
    pub fn new() -> Self {
        let (active, _) = watch::channel(0);
        Self {
            inner: Mutex::new(Inner::default()),
            active,
        }
    }

    /// Adds a client session.
    ///
    /// The returned guard removes the entry when it is dropped. Fails once
    /// the registry has been closed for shutdown.
    pub fn register(self: &Arc<Self>, peer: SocketAddr) -> Result<ClientGuard, RegistryError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(RegistryError::Closed);
        }

        let id = inner.next_id;
        inner.next_id += 1;
        inner.clients.insert(
            id,
            ClientEntry {
                peer,
                abort: None,
                cancel_requested: false,
            },
        );
        self.active.send_replace(inner.clients.len());
        drop(inner);

        debug!(client = id, %peer, "client registered");
        Ok(ClientGuard {
            registry: Arc::clone(self),
            id,
        })
    }

    /// Records the handle used to cancel a client's task.
    ///
    /// If cancellation was already requested for this client, the task is
    /// aborted right away. Does nothing if the client has already left.
    pub fn attach(&self, id: ClientId, abort: AbortHandle) {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.clients.get_mut(&id) else {
            return;
        };

        if entry.cancel_requested {
            drop(inner);
            abort.abort();
        } else {
            entry.abort = Some(abort);
        }
    }

    /// Refuses all further registrations.
    pub fn close(&self) {
        self.inner.lock().closed = true;
    }

    /// Returns whether the registry has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Requests cancellation of every registered client.
    ///
    /// Returns the number of clients that were asked to stop. Each client
    /// stops at its next await point: while waiting for input, while waiting
    /// at the admission gate, or between lines of a command file. A command
    /// that is already touching the tree finishes first.
    pub fn cancel_all(&self) -> usize {
        let mut handles = Vec::new();
        let count = {
            let mut inner = self.inner.lock();
            for entry in inner.clients.values_mut() {
                entry.cancel_requested = true;
                if let Some(abort) = entry.abort.take() {
                    handles.push(abort);
                }
            }
            inner.clients.len()
        };

        for handle in handles {
            handle.abort();
        }

        if count > 0 {
            info!(clients = count, "cancelling client sessions");
        }
        count
    }

    /// Waits until no clients remain registered.
    ///
    /// Returns immediately when the registry is already empty, so repeated
    /// calls are harmless.
    pub async fn await_drain(&self) {
        let mut rx = self.active.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|count| *count == 0).await;
    }

    /// Number of registered clients.
    pub fn len(&self) -> usize {
        self.inner.lock().clients.len()
    }

    /// Returns whether no clients are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the registered clients and their peer addresses.
    pub fn clients(&self) -> Vec<(ClientId, SocketAddr)> {
        let inner = self.inner.lock();
        let mut clients: Vec<_> = inner
            .clients
            .iter()
            .map(|(id, entry)| (*id, entry.peer))
            .collect();
        clients.sort_unstable_by_key(|(id, _)| *id);
        clients
    }

    fn unregister(&self, id: ClientId) {
        let mut inner = self.inner.lock();
        if inner.clients.remove(&id).is_some() {
            self.active.send_replace(inner.clients.len());
        }
        drop(inner);
        debug!(client = id, "client unregistered");
    }
}

/// Membership of one client in the registry.
///
/// Dropping the guard removes the client. Move it into the client's task so
/// that removal happens on every exit path.
#[derive(Debug)]
pub struct ClientGuard {
    registry: Arc<Registry>,
    id: ClientId,
}

impl ClientGuard {
    /// The id assigned to this client.
    pub fn id(&self) -> ClientId {
        self.id
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_register_and_drop() {
        let registry = Arc::new(Registry::new());
        assert!(registry.is_empty());

        let a = registry.register(peer(1)).unwrap();
        let b = registry.register(peer(2)).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.clients(), vec![(a.id(), peer(1)), (b.id(), peer(2))]);

        drop(a);
        assert_eq!(registry.len(), 1);
        drop(b);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_closed_registry_refuses_clients() {
        let registry = Arc::new(Registry::new());
        let existing = registry.register(peer(1)).unwrap();

        registry.close();
        assert!(registry.is_closed());
        assert_eq!(registry.register(peer(2)).unwrap_err(), RegistryError::Closed);

        // Clients admitted before the close are unaffected
        assert_eq!(registry.len(), 1);
        drop(existing);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_await_drain_empty_is_immediate() {
        let registry = Registry::new();
        timeout(Duration::from_millis(100), registry.await_drain())
            .await
            .expect("drain of an empty registry should not wait");
    }

    #[tokio::test]
    async fn test_cancel_all_then_drain() {
        let registry = Arc::new(Registry::new());

        for port in 0..4 {
            let guard = registry.register(peer(port)).unwrap();
            let id = guard.id();
            let task = tokio::spawn(async move {
                let _guard = guard;
                std::future::pending::<()>().await;
            });
            registry.attach(id, task.abort_handle());
        }
        assert_eq!(registry.len(), 4);

        registry.close();
        assert_eq!(registry.cancel_all(), 4);

        timeout(Duration::from_secs(2), registry.await_drain())
            .await
            .expect("cancelled clients should drain");
        assert!(registry.is_empty());

        // A second drain finds nothing left to wait for
        timeout(Duration::from_millis(100), registry.await_drain())
            .await
            .expect("second drain should return at once");
    }

    #[tokio::test]
    async fn test_attach_after_cancel_aborts() {
        let registry = Arc::new(Registry::new());
        let guard = registry.register(peer(1)).unwrap();
        let id = guard.id();

        // Cancellation lands before the task handle is known
        assert_eq!(registry.cancel_all(), 1);

        let task = tokio::spawn(async move {
            let _guard = guard;
            std::future::pending::<()>().await;
        });
        registry.attach(id, task.abort_handle());

        let result = timeout(Duration::from_secs(2), task).await.unwrap();
        assert!(result.unwrap_err().is_cancelled());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_attach_after_exit_is_noop() {
        let registry = Arc::new(Registry::new());
        let guard = registry.register(peer(1)).unwrap();
        let id = guard.id();

        let task = tokio::spawn(async move {
            drop(guard);
        });
        let abort = task.abort_handle();
        task.await.unwrap();

        registry.attach(id, abort);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_drain_waits_for_last_client() {
        let registry = Arc::new(Registry::new());
        let guard = registry.register(peer(1)).unwrap();

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.await_drain().await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        timeout(Duration::from_secs(2), waiter)
            .await
            .expect("drain should finish once the client leaves")
            .unwrap();
    }
}
