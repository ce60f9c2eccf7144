//! TreeKV - A Concurrent In-Memory Key-Value Server
//!
//! This is the main entry point for the TreeKV server.
//! It parses the command line, binds the listener, starts the console and
//! the interrupt watcher, and runs the server until it has shut down.

use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;
use treekv::server::Server;

/// Server configuration
struct Config {
    /// Host to bind to
    host: String,
    /// Port to listen on
    port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: treekv::DEFAULT_HOST.to_string(),
            port: treekv::DEFAULT_PORT,
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--host" | "-h" => {
                    if i + 1 < args.len() {
                        config.host = args[i + 1].clone();
                        i += 2;
                    } else {
                        eprintln!("Error: --host requires a value");
                        std::process::exit(1);
                    }
                }
                "--port" | "-p" => {
                    if i + 1 < args.len() {
                        config.port = parse_port(&args[i + 1]);
                        i += 2;
                    } else {
                        eprintln!("Error: --port requires a value");
                        std::process::exit(1);
                    }
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("TreeKV version {}", treekv::VERSION);
                    std::process::exit(0);
                }
                arg if !arg.starts_with('-') => {
                    config.port = parse_port(arg);
                    i += 1;
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        config
    }

    /// Returns the bind address as a string
    fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_port(arg: &str) -> u16 {
    arg.parse().unwrap_or_else(|_| {
        eprintln!("Error: invalid port number: {}", arg);
        std::process::exit(1);
    })
}

fn print_help() {
    println!(
        r#"
TreeKV - A Concurrent In-Memory Key-Value Server

USAGE:
    treekv [PORT] [OPTIONS]

OPTIONS:
    -h, --host <HOST>    Host to bind to (default: {host})
    -p, --port <PORT>    Port to listen on (default: {port})
    -v, --version        Print version information
        --help           Print this help message

CLIENT COMMANDS (one per line):
    q <key>              Query a key
    a <key> <value>      Add a key
    d <key>              Delete a key
    f <path>             Run every line of a file as a command

CONSOLE COMMANDS (on stdin):
    p [path]             Print the tree to a file, or to stdout
    s                    Stop: pause client commands
    g                    Go: resume client commands
    <EOF>                Shut down (Ctrl+D), same as Ctrl+C

EXAMPLES:
    treekv                         # Start on {host}:{port}
    treekv 9000                    # Start on port 9000
    treekv --host 0.0.0.0          # Listen on all interfaces

CONNECTING:
    $ nc 127.0.0.1 {port}
    a name Ariz
    added
    q name
    Ariz
"#,
        host = treekv::DEFAULT_HOST,
        port = treekv::DEFAULT_PORT,
    );
}

fn print_banner(config: &Config) {
    println!(
        r#"
TreeKV v{} - Concurrent In-Memory Key-Value Server
──────────────────────────────────────────────────────────────
Server started on {}
Ready to accept connections.

Console: p [path] | s | g   (Ctrl+D or Ctrl+C to shut down)
"#,
        treekv::VERSION,
        config.bind_address()
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = Config::from_args();

    // Set up logging; stdout is kept for tree dumps
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    // Bind the TCP listener
    let listener = TcpListener::bind(config.bind_address()).await?;
    let server = Server::new(listener);
    info!("Listening on {}", server.local_addr()?);

    // Print the banner
    print_banner(&config);

    // The console blocks on stdin, so it gets its own thread
    server.console().spawn_stdin()?;

    // Ctrl+C takes the same path as console end of input
    let shutdown = server.shutdown_handle();
    tokio::spawn(async move { shutdown.relay_interrupts(signal::ctrl_c).await });

    let report = server.run().await;
    info!(
        reason = %report.reason,
        cancelled = report.cancelled,
        nodes_freed = report.nodes_freed,
        "Server shutdown complete"
    );

    Ok(())
}
