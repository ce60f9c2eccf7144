//! Command Handler Module
//!
//! This module implements the command processing layer for TreeKV.
//! It receives raw command lines, executes them against the tree,
//! and returns the response line.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  Line Parser    │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! │                 │
//! │  - Dispatch     │
//! │  - Validate     │
//! │  - Execute      │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │      Tree       │  (storage module)
//! └─────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! - `q`, `a`, `d` - query, add and delete single keys
//! - `f` - bulk load: replay a file of commands

pub mod handler;

// Re-export the main command handler
pub use handler::{CommandHandler, MAX_FILE_DEPTH, MAX_FILE_LINE_LEN};
