//! Storage Engine Module
//!
//! This module provides the core storage for TreeKV: an in-memory binary
//! search tree whose nodes each carry their own reader/writer lock.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Tree                               │
//! │                                                             │
//! │                        (root)   sentinel, never freed       │
//! │                           \                                 │
//! │                           [m]   RwLock                      │
//! │                          /   \                              │
//! │                       [c]     [t]   RwLock per node         │
//! │                      /   \       \                          │
//! │                    [a]   [e]     [x]                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Per-node locks**: no global lock, operations on disjoint subtrees run in parallel
//! - **Lock coupling**: a child is locked before its parent is released
//! - **Owned guards**: `parking_lot` guards carry their own handle to the node
//! - **Safe teardown**: subtrees are freed with an explicit stack, never recursively
//!
//! ## Example
//!
//! ```
//! use treekv::storage::{AddOutcome, RemoveOutcome, Tree};
//!
//! let tree = Tree::new();
//!
//! assert_eq!(tree.add("x", "1").unwrap(), AddOutcome::Added);
//! assert_eq!(tree.add("x", "2").unwrap(), AddOutcome::AlreadyPresent);
//! assert_eq!(tree.query("x").as_deref(), Some("1"));
//!
//! assert_eq!(tree.remove("x"), RemoveOutcome::Removed);
//! assert_eq!(tree.query("x"), None);
//! ```

pub mod node;
pub mod tree;

// Re-export commonly used types
pub use node::{Node, NodeError, MAX_FIELD_LEN};
pub use tree::{AddOutcome, RemoveOutcome, Tree, TreeStats};
