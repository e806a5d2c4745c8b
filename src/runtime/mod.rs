//! Server runtime.
//!
//! A single-threaded, readiness-driven loop built on mio. Pieces:
//! - `FrameBuffer`: per-connection reassembly of newline-terminated commands
//! - `ConnectionRegistry`: live sessions keyed by peer address
//! - `Dispatcher`: turns a command into a response and a session effect
//! - `EventLoop`: owns the listener, connections and registry
//! - `ShutdownHandle`: stops the loop from a signal watcher or another thread

mod connection;
mod frame;
mod mio;
mod request;
mod shutdown;

use self::mio::EventLoop;
use crate::activity::ActivityLog;
use crate::config::Config;
use shutdown::spawn_signal_watcher;
use tracing::info;

/// Run the server until SIGINT or SIGTERM.
///
/// The activity log, listening socket and signal handlers are all set up
/// before the loop starts; any failure there is returned without serving.
pub fn run(config: &Config) -> std::io::Result<()> {
    let log = ActivityLog::open(&config.activity_log)?;
    info!(path = %log.path().display(), "Activity log opened");

    let mut event_loop = EventLoop::bind(config, log)?;
    info!(addr = %event_loop.local_addr()?, "Server listening");

    let _watcher = spawn_signal_watcher(event_loop.shutdown_handle())?;

    event_loop.run()
}
