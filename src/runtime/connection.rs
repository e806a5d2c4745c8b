//! Session registry for live connections.
//!
//! Every accepted connection gets a `Session` keyed by its remote peer
//! address. The session carries the client's display name (once it has
//! said hello), the partially received command, and the time the
//! connection was established.

use crate::runtime::frame::FrameBuffer;
use chrono::{DateTime, Local, TimeDelta};
use std::collections::HashMap;
use std::net::SocketAddr;

/// Server-side record of one connected client.
#[derive(Debug)]
pub struct Session {
    /// Display name, set by hello.
    name: Option<String>,
    /// Partially received command text.
    frames: FrameBuffer,
    established_at: DateTime<Local>,
}

impl Session {
    fn new() -> Self {
        Self {
            name: None,
            frames: FrameBuffer::new(),
            established_at: Local::now(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn established_at(&self) -> DateTime<Local> {
        self.established_at
    }

    /// Time since the connection was established.
    pub fn duration(&self) -> TimeDelta {
        Local::now().signed_duration_since(self.established_at)
    }
}

/// Registry of live sessions, keyed by remote peer address.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    sessions: HashMap<SocketAddr, Session>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an anonymous session for a freshly accepted connection.
    pub fn open(&mut self, peer: SocketAddr) {
        self.sessions.insert(peer, Session::new());
    }

    /// Name the session for `peer`. A repeated hello overwrites the name.
    pub fn add(&mut self, peer: SocketAddr, name: impl Into<String>) {
        self.sessions.entry(peer).or_insert_with(Session::new).name = Some(name.into());
    }

    /// Remove the session for `peer`. Removing an absent session is a no-op.
    pub fn remove(&mut self, peer: &SocketAddr) -> Option<Session> {
        self.sessions.remove(peer)
    }

    pub fn name(&self, peer: &SocketAddr) -> Option<&str> {
        self.sessions.get(peer).and_then(Session::name)
    }

    pub fn established_at(&self, peer: &SocketAddr) -> Option<DateTime<Local>> {
        self.sessions.get(peer).map(Session::established_at)
    }

    /// Frame buffer for `peer`'s partially received commands.
    pub fn frames_mut(&mut self, peer: &SocketAddr) -> Option<&mut FrameBuffer> {
        self.sessions.get_mut(peer).map(|s| &mut s.frames)
    }

    #[cfg(test)]
    pub fn contains(&self, peer: &SocketAddr) -> bool {
        self.sessions.contains_key(peer)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Iterate over all sessions.
    pub fn iter(&self) -> impl Iterator<Item = (&SocketAddr, &Session)> {
        self.sessions.iter()
    }
}
