//! calc-server: a line-oriented arithmetic server
//!
//! Clients speak a newline-delimited key/value protocol:
//! - `cmd=hello&name=<name>` registers a session
//! - `cmd=math&eq=<expression>` evaluates a two-operand expression
//! - `cmd=exit&name=<name>` says goodbye and closes the connection
//!
//! Features:
//! - Single-threaded readiness loop (epoll/kqueue via mio)
//! - Reassembly of commands split across or packed into reads
//! - Append-only activity log of connects, commands and disconnects
//! - Graceful shutdown on SIGINT/SIGTERM
//! - Configuration via CLI arguments or TOML file

mod activity;
mod config;
mod evaluator;
mod protocol;
mod runtime;

use config::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        max_connections = config.max_connections,
        require_hello = config.require_hello,
        activity_log = %config.activity_log.display(),
        "Starting calc-server"
    );

    runtime::run(&config)?;

    info!("calc-server stopped");
    Ok(())
}
