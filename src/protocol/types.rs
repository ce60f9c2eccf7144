//! Command Protocol Data Types
//!
//! This module defines the commands a client can send and the responses the
//! server answers with. Every command is a single line of text and every
//! response is a single line of text.
//!
//! ## Protocol Format
//!
//! A command starts with a one-character opcode followed by whitespace
//! separated arguments:
//!
//! | Opcode | Form              | Response                             |
//! |--------|-------------------|--------------------------------------|
//! | `q`    | `q <key>`         | the value, or `not found`            |
//! | `a`    | `a <key> <value>` | `added` / `already in database`      |
//! | `d`    | `d <key>`         | `removed` / `not in database`        |
//! | `f`    | `f <path>`        | `file processed` / `bad file name`   |
//!
//! Anything else is answered with `ill-formed command`.
//!
//! ## Examples
//!
//! ```text
//! a name Ariz      ->  added
//! q name           ->  Ariz
//! d name           ->  removed
//! q name           ->  not found
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Line terminator used for responses
pub const NEWLINE: u8 = b'\n';

/// Command opcodes
pub mod opcode {
    pub const QUERY: char = 'q';
    pub const ADD: char = 'a';
    pub const DELETE: char = 'd';
    pub const FILE: char = 'f';
}

/// A parsed client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Look up a key.
    /// Format: `q <key>`
    Query { key: String },

    /// Insert a key if it is absent.
    /// Format: `a <key> <value>`
    Add { key: String, value: String },

    /// Remove a key if it is present.
    /// Format: `d <key>`
    Delete { key: String },

    /// Replay every line of a file as a command.
    /// Format: `f <path>`
    File { path: String },
}

/// A response line sent back to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// The value found by a query
    Value(String),
    NotFound,
    Added,
    AlreadyPresent,
    Removed,
    NotPresent,
    FileProcessed,
    BadFileName,
    IllFormed,
}

impl Response {
    /// Returns the response text without the line terminator.
    pub fn as_str(&self) -> &str {
        match self {
            Response::Value(value) => value,
            Response::NotFound => "not found",
            Response::Added => "added",
            Response::AlreadyPresent => "already in database",
            Response::Removed => "removed",
            Response::NotPresent => "not in database",
            Response::FileProcessed => "file processed",
            Response::BadFileName => "bad file name",
            Response::IllFormed => "ill-formed command",
        }
    }

    /// Serializes the response to bytes for sending over the wire.
    ///
    /// # Example
    /// ```
    /// use treekv::protocol::Response;
    /// assert_eq!(&Response::Added.serialize()[..], b"added\n");
    /// ```
    pub fn serialize(&self) -> Bytes {
        let text = self.as_str();
        let mut buf = BytesMut::with_capacity(text.len() + 1);
        buf.put_slice(text.as_bytes());
        buf.put_u8(NEWLINE);
        buf.freeze()
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Query { key } => write!(f, "{} {}", opcode::QUERY, key),
            Command::Add { key, value } => write!(f, "{} {} {}", opcode::ADD, key, value),
            Command::Delete { key } => write!(f, "{} {}", opcode::DELETE, key),
            Command::File { path } => write!(f, "{} {}", opcode::FILE, path),
        }
    }
}
