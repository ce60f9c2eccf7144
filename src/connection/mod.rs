//! Connection Handler Module
//!
//! This module manages individual client connections to TreeKV.
//! Each client connection is handled by its own async task, so a slow or
//! idle client never holds up the others.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TCP Listener                            │
//! │                    (server module)                          │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │
//!                        │ accept() + register
//!                        ▼
//!           ┌────────────────────────┐
//!           │   For each client...   │
//!           └────────────┬───────────┘
//!                        │
//!                        │ spawn task
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ConnectionHandler                           │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │ Read bytes  │───>│ Frame line  │───>│  Wait gate  │     │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘     │
//! │                                               │             │
//! │                                               ▼             │
//! │                     ┌─────────────┐    ┌─────────────┐     │
//! │                     │ Send resp   │<───│ Execute cmd │     │
//! │                     └─────────────┘    └─────────────┘     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Async I/O**: Uses Tokio for non-blocking network operations
//! - **Buffer Management**: BytesMut buffer for incoming data
//! - **Pipelining**: Several command lines may arrive in a single TCP packet
//! - **Statistics**: Tracks connection and command metrics
//!
//! ## Example
//!
//! ```ignore
//! use treekv::commands::CommandHandler;
//! use treekv::connection::{handle_connection, ConnectionStats};
//! use treekv::server::AdmissionGate;
//! use treekv::storage::Tree;
//! use std::sync::Arc;
//!
//! let tree = Arc::new(Tree::new());
//! let stats = Arc::new(ConnectionStats::new());
//! let gate = AdmissionGate::new();
//! let handler = CommandHandler::new(tree);
//!
//! // For each accepted connection...
//! let (stream, addr) = listener.accept().await?;
//! tokio::spawn(handle_connection(stream, addr, handler, gate.clone(), stats));
//! ```

pub mod handler;

// Re-export commonly used types
pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};
