//! Administrator Console
//!
//! Reads administrator commands one line at a time, normally from stdin.
//!
//! | Line       | Effect                                             |
//! |------------|----------------------------------------------------|
//! | `p [path]` | dump the tree to `path`, or to stdout if omitted   |
//! | `s`        | close the admission gate                           |
//! | `g`        | open the admission gate                            |
//! | end input  | print `exiting database`, request shutdown          |
//!
//! Anything else is ignored. Reading stdin blocks, so the console runs on its
//! own OS thread rather than on the async runtime.

use crate::server::gate::AdmissionGate;
use crate::server::shutdown::{ShutdownHandle, ShutdownReason};
use crate::storage::Tree;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// What the console did with one line of input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleAction {
    /// The tree was dumped (or the dump failed and was logged)
    Printed,
    /// The admission gate was closed
    Stopped,
    /// The admission gate was opened
    Resumed,
    /// The line was not a console command
    Ignored,
}

/// The administrator console.
#[derive(Debug, Clone)]
pub struct Console {
    tree: Arc<Tree>,
    gate: AdmissionGate,
    shutdown: ShutdownHandle,
}

impl Console {
    pub fn new(tree: Arc<Tree>, gate: AdmissionGate, shutdown: ShutdownHandle) -> Self {
        Self {
            tree,
            gate,
            shutdown,
        }
    }

    /// Applies one console line.
    pub fn handle_line(&self, line: &str) -> ConsoleAction {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut chars = line.chars();

        match chars.next() {
            Some('p') => {
                let path = chars.as_str().trim();
                let target = (!path.is_empty()).then_some(path);
                match self.tree.print_to(target) {
                    Ok(()) => debug!(path = target.unwrap_or("<stdout>"), "tree printed"),
                    Err(e) => warn!(path = target.unwrap_or("<stdout>"), error = %e, "print failed"),
                }
                ConsoleAction::Printed
            }
            Some('s') => {
                info!("stopping client commands");
                self.gate.close();
                ConsoleAction::Stopped
            }
            Some('g') => {
                info!("resuming client commands");
                self.gate.open();
                ConsoleAction::Resumed
            }
            _ => {
                debug!(line, "ignoring console input");
                ConsoleAction::Ignored
            }
        }
    }

    /// Processes lines until end of input, then announces the exit on `out`
    /// and requests shutdown.
    pub fn run<R: BufRead, W: Write>(&self, mut input: R, mut out: W) {
        let mut line = String::new();
        loop {
            line.clear();
            match input.read_line(&mut line) {
                Ok(0) => {
                    info!("console input closed");
                    break;
                }
                Ok(_) => {
                    self.handle_line(&line);
                }
                Err(e) => {
                    warn!(error = %e, "console read failed");
                    break;
                }
            }
        }

        if let Err(e) = writeln!(out, "exiting database").and_then(|()| out.flush()) {
            warn!(error = %e, "cannot write to console output");
        }
        self.shutdown.trigger(ShutdownReason::ConsoleEof);
    }

    /// Runs the console over stdin and stdout on a dedicated thread.
    pub fn spawn_stdin(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("console".to_string())
            .spawn(move || self.run(io::stdin().lock(), io::stdout()))
    }
}
