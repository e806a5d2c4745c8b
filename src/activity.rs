//! Append-only activity log.
//!
//! One timestamped line per connect, command and disconnect. The log is
//! never read back by the server. Write failures are reported through
//! `tracing` and otherwise ignored so a full disk cannot stall the loop.

use chrono::{Local, TimeDelta};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, LineWriter, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::warn;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Handle to the activity log file.
pub struct ActivityLog {
    path: PathBuf,
    writer: LineWriter<File>,
}

impl ActivityLog {
    /// Open `path` for appending, creating it if needed.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: LineWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn connected(&mut self, peer: SocketAddr) {
        self.record(format_args!("CONNECT {peer}"));
    }

    pub fn hello(&mut self, peer: SocketAddr, name: &str) {
        self.record(format_args!("HELLO {peer} {name}"));
    }

    pub fn command(&mut self, peer: SocketAddr, name: Option<&str>, line: &str) {
        self.record(format_args!("COMMAND {peer} {} {line}", name.unwrap_or("-")));
    }

    pub fn disconnected(&mut self, peer: SocketAddr, name: Option<&str>, duration: TimeDelta) {
        self.record(format_args!(
            "DISCONNECT {peer} {} after {}",
            name.unwrap_or("-"),
            format_duration(duration)
        ));
    }

    pub fn shutdown(&mut self, sessions: usize) {
        self.record(format_args!("SHUTDOWN {sessions} sessions closed"));
    }

    /// Flush buffered lines to disk.
    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    fn record(&mut self, event: fmt::Arguments<'_>) {
        let timestamp = Local::now().format(TIMESTAMP_FORMAT);
        if let Err(e) = writeln!(self.writer, "[{timestamp}] {event}") {
            warn!(path = %self.path.display(), error = %e, "Failed to write activity log");
        }
    }
}

impl fmt::Debug for ActivityLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivityLog").field("path", &self.path).finish()
    }
}

/// Render a session duration as `1h02m03.456s`, dropping leading zero units.
pub fn format_duration(duration: TimeDelta) -> String {
    let millis = duration.num_milliseconds().max(0);
    let hours = millis / 3_600_000;
    let minutes = (millis / 60_000) % 60;
    let seconds = (millis % 60_000) as f64 / 1000.0;

    if hours > 0 {
        format!("{hours}h{minutes:02}m{seconds:06.3}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds:06.3}s")
    } else {
        format!("{seconds:.3}s")
    }
}
