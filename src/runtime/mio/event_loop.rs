//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready,
//! then we perform non-blocking read/write syscalls.
//! Uses epoll on Linux, kqueue on macOS.
//!
//! Everything runs on one thread. The poll is the only place the loop
//! blocks; each readiness event is handled to completion before the next
//! one, so commands from different connections never interleave.
//!
//! ## Connection lifecycle
//!
//! An accepted socket is stored in the connection slab and a session is
//! opened for its peer address in the registry; the two are always
//! inserted and removed together. Reads feed the session's frame buffer,
//! every complete command is dispatched in arrival order, and responses
//! are queued in the connection's outbound buffer. Write interest is only
//! registered while output is pending.

use crate::activity::ActivityLog;
use crate::config::Config;
use crate::runtime::connection::ConnectionRegistry;
use crate::runtime::request::{Dispatcher, Effect};
use crate::runtime::shutdown::ShutdownHandle;
use bytes::{Buf, BytesMut};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use slab::Slab;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);
const WAKER_TOKEN: Token = Token(usize::MAX - 1);

/// Per-connection transport state.
struct MioConnection {
    stream: TcpStream,
    /// Registry key for this connection's session.
    peer: SocketAddr,
    /// Encoded responses not yet accepted by the socket.
    outbound: BytesMut,
    /// Currently registered interest.
    interest: Interest,
    /// Exit or EOF received; close once `outbound` drains.
    closing: bool,
}

/// Readiness captured from one poll event.
#[derive(Debug, Clone, Copy)]
struct Ready {
    token: Token,
    readable: bool,
    writable: bool,
}

/// Single-threaded server event loop.
pub struct EventLoop {
    poll: Poll,
    events: Events,
    ready: Vec<Ready>,
    listener: TcpListener,
    connections: Slab<MioConnection>,
    registry: ConnectionRegistry,
    dispatcher: Dispatcher,
    log: ActivityLog,
    shutdown: ShutdownHandle,
    read_buf: Vec<u8>,
    max_connections: usize,
    stopped: bool,
}

impl EventLoop {
    /// Bind the listening socket and prepare the poll.
    ///
    /// `log` must already be open; the loop owns it from here on and flushes
    /// it once at shutdown.
    pub fn bind(config: &Config, log: ActivityLog) -> io::Result<Self> {
        let poll = Poll::new()?;

        let mut listener = TcpListener::from_std(create_listener(config.listen)?);
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);

        Ok(Self {
            poll,
            events: Events::with_capacity(config.event_capacity),
            ready: Vec::with_capacity(config.event_capacity),
            listener,
            connections: Slab::with_capacity(config.max_connections),
            registry: ConnectionRegistry::new(),
            dispatcher: Dispatcher::new(config.require_hello),
            log,
            shutdown: ShutdownHandle::new(waker),
            read_buf: vec![0u8; config.read_buffer_size],
            max_connections: config.max_connections,
            stopped: false,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle that stops this loop from any thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    #[cfg(test)]
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Run until shutdown is requested.
    pub fn run(&mut self) -> io::Result<()> {
        info!(addr = %self.local_addr()?, "Event loop started");
        while self.run_once(None)? {}
        Ok(())
    }

    /// Wait for readiness once and handle every ready event.
    ///
    /// Returns `false` once the loop has shut down.
    pub fn run_once(&mut self, timeout: Option<Duration>) -> io::Result<bool> {
        if self.stopped {
            return Ok(false);
        }
        if self.shutdown.is_requested() {
            self.shutdown();
            return Ok(false);
        }

        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(true),
            Err(e) => return Err(e),
        }

        self.ready.clear();
        self.ready.extend(self.events.iter().map(|event| Ready {
            token: event.token(),
            readable: event.is_readable() || event.is_read_closed() || event.is_error(),
            writable: event.is_writable(),
        }));

        for i in 0..self.ready.len() {
            let ready = self.ready[i];
            match ready.token {
                LISTENER_TOKEN => self.accept_connections(),
                WAKER_TOKEN => {}
                Token(conn_id) => {
                    if let Err(e) = self.handle_connection_event(conn_id, ready) {
                        debug!(conn_id, error = %e, "Connection error");
                        self.close_connection(conn_id);
                    }
                }
            }
        }

        Ok(true)
    }

    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer)) => {
                    if self.connection_count() >= self.max_connections {
                        warn!(peer = %peer, "Connection limit reached");
                        continue;
                    }

                    let entry = self.connections.vacant_entry();
                    let conn_id = entry.key();
                    if let Err(e) =
                        self.poll
                            .registry()
                            .register(&mut stream, Token(conn_id), Interest::READABLE)
                    {
                        warn!(peer = %peer, error = %e, "Failed to register connection");
                        continue;
                    }

                    entry.insert(MioConnection {
                        stream,
                        peer,
                        outbound: BytesMut::new(),
                        interest: Interest::READABLE,
                        closing: false,
                    });
                    self.registry.open(peer);
                    self.log.connected(peer);

                    debug!(conn_id, peer = %peer, "Accepted connection");
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "Accept error");
                    break;
                }
            }
        }
    }

    fn handle_connection_event(&mut self, conn_id: usize, ready: Ready) -> io::Result<()> {
        if !self.connections.contains(conn_id) {
            return Ok(());
        }

        if ready.readable {
            self.handle_readable(conn_id)?;
        }

        // Re-check connection exists (exit may have closed it)
        if !self.connections.contains(conn_id) {
            return Ok(());
        }

        if ready.writable {
            self.handle_writable(conn_id)?;
        }

        Ok(())
    }

    fn handle_readable(&mut self, conn_id: usize) -> io::Result<()> {
        loop {
            let conn = self
                .connections
                .get_mut(conn_id)
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "connection not found"))?;

            let n = match conn.stream.read(&mut self.read_buf) {
                Ok(0) => {
                    // Peer is done sending; flush what we owe, then close.
                    conn.closing = true;
                    break;
                }
                Ok(n) => n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };

            // Input after exit is drained and discarded.
            if conn.closing {
                continue;
            }

            let peer = conn.peer;
            self.registry
                .frames_mut(&peer)
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "session not found"))?
                .append(&self.read_buf[..n]);

            self.process_frames(conn_id, peer)?;
        }

        self.handle_writable(conn_id)
    }

    /// Dispatch every complete command buffered for `peer`, in order.
    fn process_frames(&mut self, conn_id: usize, peer: SocketAddr) -> io::Result<()> {
        loop {
            let frames = self
                .registry
                .frames_mut(&peer)
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "session not found"))?;
            if !frames.is_complete() {
                if !frames.is_empty() {
                    debug!(conn_id, pending = frames.len(), "Partial command buffered");
                }
                return Ok(());
            }
            let line = match frames.take() {
                Ok(Some(line)) => line,
                Ok(None) => return Ok(()),
                Err(e) => {
                    // Answer what came before, then close.
                    frames.clear();
                    debug!(conn_id, error = %e, "Framing error, closing connection");
                    if let Some(conn) = self.connections.get_mut(conn_id) {
                        conn.closing = true;
                    }
                    return Ok(());
                }
            };

            self.log.command(peer, self.registry.name(&peer), &line);
            let reply = self.dispatcher.handle_line(peer, &line, &self.registry);
            debug!(conn_id, response = reply.response.text(), "Queued response");

            let conn = self
                .connections
                .get_mut(conn_id)
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "connection not found"))?;
            conn.outbound.extend_from_slice(&reply.response.encode());

            match reply.effect {
                Effect::None => {}
                Effect::RegisterSession(name) => {
                    self.log.hello(peer, &name);
                    self.registry.add(peer, name);
                    if let Some(connected_at) = self.registry.established_at(&peer) {
                        info!(
                            peer = %peer,
                            name = self.registry.name(&peer).unwrap_or("-"),
                            connected_at = %connected_at,
                            "Client has joined"
                        );
                    }
                }
                Effect::CloseSession => {
                    conn.closing = true;
                    if let Some(frames) = self.registry.frames_mut(&peer) {
                        frames.clear();
                    }
                    return Ok(());
                }
            }
        }
    }

    /// Write as much pending output as the socket accepts.
    fn handle_writable(&mut self, conn_id: usize) -> io::Result<()> {
        let conn = self
            .connections
            .get_mut(conn_id)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "connection not found"))?;

        while !conn.outbound.is_empty() {
            match conn.stream.write(&conn.outbound) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
                }
                Ok(n) => conn.outbound.advance(n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        if conn.outbound.is_empty() && conn.closing {
            self.close_connection(conn_id);
            return Ok(());
        }

        let interest = if conn.outbound.is_empty() {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        };
        if interest != conn.interest {
            self.poll
                .registry()
                .reregister(&mut conn.stream, Token(conn_id), interest)?;
            conn.interest = interest;
        }

        Ok(())
    }

    /// Tear down a connection and its session together.
    fn close_connection(&mut self, conn_id: usize) {
        if let Some(mut conn) = self.connections.try_remove(conn_id) {
            let _ = self.poll.registry().deregister(&mut conn.stream);
            drop(conn.stream);

            match self.registry.remove(&conn.peer) {
                Some(session) => {
                    let duration = session.duration();
                    self.log.disconnected(conn.peer, session.name(), duration);
                    info!(
                        conn_id,
                        peer = %conn.peer,
                        name = session.name().unwrap_or("-"),
                        connected_at = %session.established_at(),
                        duration_ms = duration.num_milliseconds(),
                        "Client has left"
                    );
                }
                None => debug!(conn_id, peer = %conn.peer, "Connection closed without session"),
            }
        }
    }

    /// Close every live session, then flush the activity log. Runs once.
    fn shutdown(&mut self) {
        let sessions = self.registry.len();
        info!(sessions, "Shutting down");
        for (peer, session) in self.registry.iter() {
            debug!(
                peer = %peer,
                name = session.name().unwrap_or("-"),
                connected_at = %session.established_at(),
                "Closing session"
            );
        }

        let ids: Vec<usize> = self.connections.iter().map(|(id, _)| id).collect();
        for conn_id in ids {
            // Best effort: hand any queued responses to the socket first.
            if let Some(conn) = self.connections.get_mut(conn_id) {
                if !conn.outbound.is_empty() {
                    if let Err(e) = conn.stream.write(&conn.outbound) {
                        debug!(conn_id, error = %e, "Failed to flush responses on shutdown");
                    }
                }
            }
            self.close_connection(conn_id);
        }
        debug_assert!(self.registry.is_empty());

        self.log.shutdown(sessions);
        if let Err(e) = self.log.flush() {
            warn!(path = %self.log.path().display(), error = %e, "Failed to flush activity log");
        }
        let _ = self.poll.registry().deregister(&mut self.listener);
        self.stopped = true;

        info!("Event loop terminated");
    }
}

/// Create a non-blocking TCP listener with SO_REUSEADDR.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    Ok(socket.into())
}
