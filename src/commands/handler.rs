//! Command Handler Module
//!
//! This module implements the TreeKV commands. It parses incoming command
//! lines and dispatches them to the tree.
//!
//! ## Supported Commands
//!
//! - `q key` - Look up a key
//! - `a key value` - Add a key if it is absent
//! - `d key` - Delete a key if it is present
//! - `f path` - Replay every line of a file as a command
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │   parse()   │───>│  dispatch() │───>│  cmd_*()    │     │
//! │  └─────────────┘    └─────────────┘    └─────────────┘     │
//! │                                               │             │
//! │                                               ▼             │
//! │                                             Tree            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Protocol errors never leave this module: anything that does not parse is
//! answered with `ill-formed command`.

use crate::protocol::{frame_line, parse_command, Command, Response};
use crate::storage::{AddOutcome, RemoveOutcome, Tree};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, trace, warn};

/// How deeply `f` commands may nest inside command files.
pub const MAX_FILE_DEPTH: usize = 8;

/// Longest line replayed from a command file (64 KB), terminator included.
///
/// Longer lines are skipped without being buffered and count as ill-formed.
pub const MAX_FILE_LINE_LEN: usize = 64 * 1024;

type BoxedResponse<'a> = Pin<Box<dyn Future<Output = Response> + Send + 'a>>;

/// Executes client commands against the shared tree.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    /// The shared tree
    tree: Arc<Tree>,
}

impl CommandHandler {
    /// Creates a new command handler for the given tree.
    pub fn new(tree: Arc<Tree>) -> Self {
        Self { tree }
    }

    /// Executes one command line and returns the response.
    ///
    /// # Arguments
    ///
    /// * `line` - The raw command line, with or without its terminator
    pub async fn execute(&self, line: &[u8]) -> Response {
        self.execute_nested(line, 0).await
    }

    /// Parses and dispatches a line read at the given file nesting depth.
    fn execute_nested<'a>(&'a self, line: &'a [u8], depth: usize) -> BoxedResponse<'a> {
        Box::pin(async move {
            match parse_command(line) {
                Ok(command) => self.dispatch(command, depth).await,
                Err(e) => {
                    trace!(error = %e, "ill-formed command");
                    Response::IllFormed
                }
            }
        })
    }

    /// Dispatches a command to its handler.
    async fn dispatch(&self, command: Command, depth: usize) -> Response {
        trace!(%command, depth, "executing command");
        match command {
            Command::Query { key } => self.cmd_query(&key),
            Command::Add { key, value } => self.cmd_add(&key, &value),
            Command::Delete { key } => self.cmd_delete(&key),
            Command::File { path } => self.cmd_file(&path, depth).await,
        }
    }

    /// q key
    fn cmd_query(&self, key: &str) -> Response {
        match self.tree.query(key) {
            Some(value) => Response::Value(value),
            None => Response::NotFound,
        }
    }

    /// a key value
    fn cmd_add(&self, key: &str, value: &str) -> Response {
        match self.tree.add(key, value) {
            Ok(AddOutcome::Added) => Response::Added,
            Ok(AddOutcome::AlreadyPresent) => Response::AlreadyPresent,
            Err(e) => {
                debug!(error = %e, "add rejected");
                Response::IllFormed
            }
        }
    }

    /// d key
    fn cmd_delete(&self, key: &str) -> Response {
        match self.tree.remove(key) {
            RemoveOutcome::Removed => Response::Removed,
            RemoveOutcome::NotPresent => Response::NotPresent,
        }
    }

    /// f path
    ///
    /// Responses to the replayed lines are discarded. Every line read is an
    /// await point, so a cancelled connection stops between lines. Lines that
    /// are not valid UTF-8 or exceed [`MAX_FILE_LINE_LEN`] are ill-formed and
    /// replay continues with the next line.
    async fn cmd_file(&self, path: &str, depth: usize) -> Response {
        if depth >= MAX_FILE_DEPTH {
            warn!(path, depth, "command files nested too deeply");
            return Response::IllFormed;
        }

        let file = match File::open(path).await {
            Ok(file) => file,
            Err(e) => {
                debug!(path, error = %e, "cannot open command file");
                return Response::BadFileName;
            }
        };

        let mut reader = BufReader::new(file);
        let mut line = Vec::new();
        let mut replayed = 0u64;

        loop {
            match read_file_line(&mut reader, &mut line).await {
                Ok(FileLine::Complete) => {
                    self.execute_nested(&line, depth + 1).await;
                    replayed += 1;
                }
                Ok(FileLine::TooLong) => {
                    debug!(path, max = MAX_FILE_LINE_LEN, "skipping oversized line");
                    replayed += 1;
                }
                Ok(FileLine::End) => break,
                Err(e) => {
                    warn!(path, error = %e, "stopped reading command file");
                    break;
                }
            }
        }

        debug!(path, replayed, "command file processed");
        Response::FileProcessed
    }
}

/// Outcome of reading one line from a command file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileLine {
    /// A line (possibly without terminator at end of file) is in the buffer
    Complete,
    /// The line exceeded the length limit and was discarded
    TooLong,
    /// End of file, nothing read
    End,
}

/// Reads the next line into `line`, buffering at most [`MAX_FILE_LINE_LEN`]
/// bytes. The rest of an oversized line is consumed and dropped.
async fn read_file_line<R>(reader: &mut R, line: &mut Vec<u8>) -> io::Result<FileLine>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    let mut seen = 0usize;

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            break;
        }

        let (used, done) = match frame_line(available) {
            Some(len) => (len, true),
            None => (available.len(), false),
        };
        if seen + used <= MAX_FILE_LINE_LEN {
            line.extend_from_slice(&available[..used]);
        } else {
            line.clear();
        }
        seen += used;
        reader.consume(used);

        if done {
            break;
        }
    }

    Ok(match seen {
        0 => FileLine::End,
        n if n > MAX_FILE_LINE_LEN => FileLine::TooLong,
        _ => FileLine::Complete,
    })
}
