//! Server Assembly
//!
//! Ties the listener, the client registry, the admission gate and the
//! shutdown machinery together.
//!
//! ## Architecture
//!
//! ```text
//!            ┌──────────────┐        ┌──────────────────┐
//!  stdin ───►│   Console    │──s/g──►│  AdmissionGate   │◄── wait() per command
//!            │  (OS thread) │        └──────────────────┘
//!            └──────┬───────┘
//!                   │ EOF                Ctrl+C
//!                   ▼                      │
//!            ┌──────────────┐              │
//!            │ShutdownHandle│◄─────────────┘
//!            └──────┬───────┘
//!                   │ wait()
//!                   ▼
//!  ┌────────────────────────────────┐   register   ┌──────────────────┐
//!  │        Server::run             │─────────────►│     Registry     │
//!  │  select { accept | shutdown }  │              └──────────────────┘
//!  └───────────────┬────────────────┘
//!                  │ spawn per client
//!                  ▼
//!          ConnectionHandler ──► CommandHandler ──► Tree
//! ```
//!
//! ## Modules
//!
//! - `gate`: the admission gate
//! - `registry`: live client tracking, cancellation and drain
//! - `shutdown`: shutdown trigger and stop sequence
//! - `console`: the administrator console

pub mod console;
pub mod gate;
pub mod registry;
pub mod shutdown;

pub use console::{Console, ConsoleAction};
pub use gate::AdmissionGate;
pub use registry::{ClientGuard, ClientId, Registry, RegistryError};
pub use shutdown::{
    Phase, ShutdownCoordinator, ShutdownHandle, ShutdownReason, ShutdownReport,
};

use crate::commands::CommandHandler;
use crate::connection::{handle_connection, ConnectionStats};
use crate::storage::Tree;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

/// A TreeKV server bound to a listening socket.
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    tree: Arc<Tree>,
    registry: Arc<Registry>,
    gate: AdmissionGate,
    shutdown: ShutdownHandle,
    coordinator: ShutdownCoordinator,
    stats: Arc<ConnectionStats>,
}

impl Server {
    /// Creates a server with an empty tree around an already bound listener.
    pub fn new(listener: TcpListener) -> Self {
        Self {
            listener,
            tree: Arc::new(Tree::new()),
            registry: Arc::new(Registry::new()),
            gate: AdmissionGate::new(),
            shutdown: ShutdownHandle::new(),
            coordinator: ShutdownCoordinator::new(),
            stats: Arc::new(ConnectionStats::new()),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn tree(&self) -> &Arc<Tree> {
        &self.tree
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    pub fn stats(&self) -> &Arc<ConnectionStats> {
        &self.stats
    }

    /// A handle that stops the server when triggered.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn phase(&self) -> Phase {
        self.coordinator.phase()
    }

    /// A console wired to this server's tree, gate and shutdown handle.
    pub fn console(&self) -> Console {
        Console::new(
            Arc::clone(&self.tree),
            self.gate.clone(),
            self.shutdown.clone(),
        )
    }

    /// Accepts clients until shutdown is triggered, then drains them and
    /// frees the tree.
    pub async fn run(self) -> ShutdownReport {
        let Server {
            listener,
            tree,
            registry,
            gate,
            shutdown,
            coordinator,
            stats,
        } = self;

        let trigger = shutdown.wait();
        tokio::pin!(trigger);

        let reason = loop {
            tokio::select! {
                reason = &mut trigger => break reason,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        admit(stream, addr, &tree, &registry, &gate, &stats);
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
            }
        };

        drop(listener);
        info!(%reason, "listener closed");

        coordinator.shut_down(reason, &registry, &tree).await
    }
}

/// Registers a new client and spawns its handler task.
fn admit(
    stream: TcpStream,
    addr: SocketAddr,
    tree: &Arc<Tree>,
    registry: &Arc<Registry>,
    gate: &AdmissionGate,
    stats: &Arc<ConnectionStats>,
) {
    let guard = match registry.register(addr) {
        Ok(guard) => guard,
        Err(e) => {
            debug!(client = %addr, error = %e, "refusing connection");
            return;
        }
    };
    let id = guard.id();

    let handler = CommandHandler::new(Arc::clone(tree));
    let gate = gate.clone();
    let stats = Arc::clone(stats);

    let task = tokio::spawn(async move {
        let _guard = guard;
        // The handler logs how the session ended.
        let _ = handle_connection(stream, addr, handler, gate, stats).await;
    });
    registry.attach(id, task.abort_handle());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
    use tokio::task::JoinHandle;
    use tokio::time::{sleep, timeout};

    struct Running {
        addr: SocketAddr,
        tree: Arc<Tree>,
        registry: Arc<Registry>,
        console: Console,
        shutdown: ShutdownHandle,
        task: JoinHandle<ShutdownReport>,
    }

    async fn start_server() -> Running {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = Server::new(listener);
        assert_eq!(server.phase(), Phase::Accepting);

        Running {
            addr: server.local_addr().unwrap(),
            tree: Arc::clone(server.tree()),
            registry: Arc::clone(server.registry()),
            console: server.console(),
            shutdown: server.shutdown_handle(),
            task: tokio::spawn(server.run()),
        }
    }

    async fn connect(addr: SocketAddr) -> (BufReader<OwnedReadHalf>, OwnedWriteHalf) {
        let (read_half, write_half) = TcpStream::connect(addr).await.unwrap().into_split();
        (BufReader::new(read_half), write_half)
    }

    async fn request(
        reader: &mut BufReader<OwnedReadHalf>,
        writer: &mut OwnedWriteHalf,
        line: &str,
    ) -> String {
        writer.write_all(line.as_bytes()).await.unwrap();
        let mut response = String::new();
        timeout(Duration::from_secs(2), reader.read_line(&mut response))
            .await
            .expect("response timed out")
            .unwrap();
        response
    }

    async fn wait_for_clients(registry: &Registry, count: usize) {
        for _ in 0..100 {
            if registry.len() == count {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {} clients, found {}", count, registry.len());
    }

    #[tokio::test]
    async fn test_clients_share_tree() {
        let server = start_server().await;

        let (mut r1, mut w1) = connect(server.addr).await;
        let (mut r2, mut w2) = connect(server.addr).await;

        assert_eq!(request(&mut r1, &mut w1, "a x 1\n").await, "added\n");
        assert_eq!(request(&mut r2, &mut w2, "q x\n").await, "1\n");
        assert_eq!(request(&mut r2, &mut w2, "a x 2\n").await, "already in database\n");
        assert_eq!(request(&mut r1, &mut w1, "d x\n").await, "removed\n");
        assert_eq!(request(&mut r2, &mut w2, "q x\n").await, "not found\n");

        server.shutdown.trigger(ShutdownReason::Interrupt);
        let report = timeout(Duration::from_secs(2), server.task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.reason, ShutdownReason::Interrupt);
        assert_eq!(report.cancelled, 2);
    }

    #[tokio::test]
    async fn test_console_eof_drains_clients() {
        let server = start_server().await;

        let (mut reader, mut writer) = connect(server.addr).await;
        assert_eq!(request(&mut reader, &mut writer, "a a 1\n").await, "added\n");
        assert_eq!(request(&mut reader, &mut writer, "a b 2\n").await, "added\n");

        let (_idle_reader, _idle_writer) = connect(server.addr).await;
        wait_for_clients(&server.registry, 2).await;

        // Console input ends: shutdown cancels both clients, even the idle one
        let console = server.console.clone();
        std::thread::spawn(move || console.run(std::io::Cursor::new(""), std::io::sink()));

        let report = timeout(Duration::from_secs(2), server.task)
            .await
            .expect("shutdown should finish")
            .unwrap();

        assert_eq!(report.reason, ShutdownReason::ConsoleEof);
        assert_eq!(report.cancelled, 2);
        assert_eq!(report.nodes_freed, 2);
        assert!(server.registry.is_empty());
        assert!(server.tree.is_empty());

        // The connection is closed from the server side
        let mut line = String::new();
        let n = timeout(Duration::from_secs(2), reader.read_line(&mut line))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);

        // No new clients after shutdown
        assert!(TcpStream::connect(server.addr).await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_client_paused_at_gate() {
        let server = start_server().await;
        let (mut reader, mut writer) = connect(server.addr).await;
        wait_for_clients(&server.registry, 1).await;

        assert_eq!(server.console.handle_line("s"), ConsoleAction::Stopped);
        writer.write_all(b"a held 1\n").await.unwrap();
        sleep(Duration::from_millis(50)).await;

        server.shutdown.trigger(ShutdownReason::ConsoleEof);
        let report = timeout(Duration::from_secs(2), server.task)
            .await
            .expect("a client waiting at the gate must not block shutdown")
            .unwrap();

        assert_eq!(report.cancelled, 1);
        assert_eq!(report.nodes_freed, 0);

        let mut line = String::new();
        let n = timeout(Duration::from_secs(2), reader.read_line(&mut line))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0, "paused command must not run: {:?}", line);
    }

    #[tokio::test]
    async fn test_disconnected_clients_leave_registry() {
        let server = start_server().await;

        {
            let (mut reader, mut writer) = connect(server.addr).await;
            assert_eq!(request(&mut reader, &mut writer, "q k\n").await, "not found\n");
            wait_for_clients(&server.registry, 1).await;
        }
        wait_for_clients(&server.registry, 0).await;

        server.shutdown.trigger(ShutdownReason::Interrupt);
        let report = server.task.await.unwrap();
        assert_eq!(report.cancelled, 0);
    }

    #[tokio::test]
    async fn test_stats_track_connections() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = Server::new(listener);
        let addr = server.local_addr().unwrap();
        let stats = Arc::clone(server.stats());
        let shutdown = server.shutdown_handle();
        let task = tokio::spawn(server.run());

        let (mut reader, mut writer) = connect(addr).await;
        assert_eq!(request(&mut reader, &mut writer, "a k v\n").await, "added\n");
        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.commands_processed.load(Ordering::Relaxed), 1);

        shutdown.trigger(ShutdownReason::Interrupt);
        task.await.unwrap();
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }
}
