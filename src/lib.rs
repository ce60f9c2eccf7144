//! # TreeKV - A Concurrent In-Memory Key-Value Server
//!
//! TreeKV keeps string keys and values in an unbalanced binary search tree
//! shared by every connected client. Each tree node carries its own
//! reader/writer lock, and operations walk the tree hand over hand, so
//! clients working in different parts of the tree never block each other.
//!
//! ## Features
//!
//! - **Fine-grained locking**: per-node RwLocks with lock coupling, no global lock
//! - **Line protocol**: one-letter commands, one response line per command
//! - **Bulk load**: replay a file of commands with `f path`
//! - **Admin console**: dump the tree, pause and resume clients, shut down
//! - **Graceful shutdown**: clients are cancelled and drained before the tree is freed
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              TreeKV                                     │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │   Server    │───>│ Connection  │───>│  Command    │                  │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │                  │
//! │  └──────┬──────┘    └──────┬──────┘    └──────┬──────┘                  │
//! │         │                  │                  │                         │
//! │         ▼                  ▼                  ▼                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌──────────────────────────────┐ │
//! │  │  Registry   │    │    Gate     │    │            Tree              │ │
//! │  │  Shutdown   │    │  (open/     │    │   (root)                     │ │
//! │  └─────────────┘    │   closed)   │    │      \                       │ │
//! │         ▲           └──────▲──────┘    │      [m] RwLock              │ │
//! │         │                  │           │     /   \                    │ │
//! │  ┌──────┴──────────────────┴──────┐    │   [c]   [t] RwLock per node  │ │
//! │  │     Console (stdin thread)     │───>│                              │ │
//! │  └────────────────────────────────┘    └──────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use treekv::server::{Server, ShutdownReason};
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let listener = TcpListener::bind("127.0.0.1:8888").await?;
//!     let server = Server::new(listener);
//!
//!     // Administrator console on stdin
//!     server.console().spawn_stdin()?;
//!
//!     // Ctrl+C takes the same path as console end of input
//!     let shutdown = server.shutdown_handle();
//!     tokio::spawn(async move {
//!         if tokio::signal::ctrl_c().await.is_ok() {
//!             shutdown.trigger(ShutdownReason::Interrupt);
//!         }
//!     });
//!
//!     let report = server.run().await;
//!     println!("freed {} nodes", report.nodes_freed);
//!     Ok(())
//! }
//! ```
//!
//! ## Client Commands
//!
//! - `q key` - prints the value, or `not found`
//! - `a key value` - `added`, or `already in database`
//! - `d key` - `removed`, or `not in database`
//! - `f path` - `file processed`, or `bad file name`
//!
//! Anything else is answered with `ill-formed command`.
//!
//! ## Console Commands
//!
//! - `p [path]` - dump the tree to a file, or to stdout
//! - `s` / `g` - stop / go: pause and resume client commands
//! - end of input - shut the server down
//!
//! ## Module Overview
//!
//! - [`protocol`]: line framing, command parsing and response strings
//! - [`storage`]: the lock-coupled binary search tree
//! - [`commands`]: the command interpreter
//! - [`connection`]: per-client connection handling
//! - [`server`]: listener, registry, gate, shutdown and console

pub mod commands;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::CommandHandler;
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{Command, ParseError, Response};
pub use server::{AdmissionGate, Registry, Server, ShutdownHandle, ShutdownReason, ShutdownReport};
pub use storage::{Tree, MAX_FIELD_LEN};

/// The default port TreeKV listens on
pub const DEFAULT_PORT: u16 = 8888;

/// The default host TreeKV binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of TreeKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
