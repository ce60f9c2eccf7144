//! Command Protocol Implementation
//!
//! This module implements the line-oriented text protocol spoken between
//! clients and the TreeKV server.
//!
//! ## Overview
//!
//! Each command is one line: a single-character opcode followed by
//! space-separated arguments. Each command is answered with one line of text.
//!
//! ## Modules
//!
//! - `types`: Defines the `Command` and `Response` types and serialization
//! - `parser`: Line framing and command parsing
//!
//! ## Example
//!
//! ```
//! use treekv::protocol::{frame_line, parse_command, Command, Response};
//!
//! // Framing and parsing incoming data
//! let data = b"q name\nq other\n";
//! let len = frame_line(data).unwrap();
//! let command = parse_command(&data[..len]).unwrap();
//! assert_eq!(command, Command::Query { key: "name".into() });
//!
//! // Creating responses
//! let bytes = Response::NotFound.serialize();
//! assert_eq!(&bytes[..], b"not found\n");
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{frame_line, parse_command, ParseError, ParseResult};
pub use types::{Command, Response};
