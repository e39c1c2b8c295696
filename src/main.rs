//! cmdbus - A Bounded-Concurrency TCP Command Server
//!
//! This is the main entry point for the cmdbus server.
//! It parses the command line, sets up logging, and runs the server on the
//! main thread until a `quit` command or Ctrl+C.

use cmdbus::alloc::CountingAllocator;
use cmdbus::commands::CommandTable;
use cmdbus::config::ServerConfig;
use cmdbus::server::Server;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: CountingAllocator = CountingAllocator;

/// Parse configuration from command-line arguments
fn config_from_args() -> ServerConfig {
    let mut config = ServerConfig::default();
    let args: Vec<String> = std::env::args().collect();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--host" | "-h" => {
                config.host = value(&args, i, "--host").to_string();
                i += 2;
            }
            "--port" | "-p" => {
                config.port = parse(value(&args, i, "--port"), "port number");
                i += 2;
            }
            "--threads" | "-t" => {
                config.workers = parse(value(&args, i, "--threads"), "thread count");
                i += 2;
            }
            "--connections" | "-c" => {
                config.max_connections =
                    parse(value(&args, i, "--connections"), "connection count");
                i += 2;
            }
            "--timeout-ms" => {
                let ms: u64 = parse(value(&args, i, "--timeout-ms"), "timeout");
                config.response_timeout = Duration::from_millis(ms);
                i += 2;
            }
            "--help" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-v" => {
                println!("cmdbus version {}", cmdbus::VERSION);
                std::process::exit(0);
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

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> &'a str {
    match args.get(i + 1) {
        Some(value) => value,
        None => {
            eprintln!("Error: {} requires a value", flag);
            std::process::exit(1);
        }
    }
}

fn parse<T: std::str::FromStr>(value: &str, what: &str) -> T {
    value.parse().unwrap_or_else(|_| {
        eprintln!("Error: invalid {}", what);
        std::process::exit(1);
    })
}

fn print_help() {
    println!(
        r#"
cmdbus - A Bounded-Concurrency TCP Command Server

USAGE:
    cmdbus [OPTIONS]

OPTIONS:
    -h, --host <HOST>           Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>           Port to listen on (default: 12318)
    -t, --threads <N>           Worker threads (default: 16)
    -c, --connections <N>       Connection pool size (default: 32)
        --timeout-ms <MS>       Response timeout; idle clients are reaped
                                after twice this (default: 5000)
    -v, --version               Print version information
        --help                  Print this help message

LOGGING:
    Set RUST_LOG to adjust verbosity, e.g. RUST_LOG=cmdbus=debug

COMMANDS:
    1  echo   Replies with the request body
    2  quit   Replies OK and shuts the server down
    3  info   Server statistics as key:value lines
"#
    );
}

fn print_banner(config: &ServerConfig) {
    println!(
        r#"
cmdbus v{}
──────────────────────────────────────────────────────────────
Listening on {}
Workers: {}   Connections: {}   Timeout: {}ms

Use Ctrl+C to shutdown gracefully.
"#,
        cmdbus::VERSION,
        config.bind_address(),
        config.workers,
        config.max_connections,
        config.response_timeout.as_millis()
    );
}

fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = config_from_args();

    // Set up logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_names(true)
        .init();

    let server = match Server::bind(config.clone(), CommandTable::with_builtins().build()) {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to start server: {}", e);
            return Err(e.into());
        }
    };

    print_banner(&config);

    // Set up graceful shutdown
    let handle = server.handle();
    server.reactor().spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            return;
        }
        info!("Shutdown signal received, stopping server...");
        handle.shutdown();
    });

    server.run()?;

    info!("Server shutdown complete");
    Ok(())
}
