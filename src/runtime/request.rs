//! Request dispatch for the event loop.
//!
//! Turns one complete command line into a response plus the session
//! change the event loop must apply. Dispatch never touches the network
//! and never mutates the registry itself.

use crate::evaluator;
use crate::protocol::{Command, MissingField, Request, Response};
use crate::runtime::connection::ConnectionRegistry;
use std::net::SocketAddr;
use tracing::debug;

/// Session change requested by a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    None,
    /// Name the session (hello).
    RegisterSession(String),
    /// Close the connection once the response has been written (exit).
    CloseSession,
}

/// Outcome of dispatching one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub response: Response,
    pub effect: Effect,
}

impl Reply {
    fn respond(response: Response) -> Self {
        Self {
            response,
            effect: Effect::None,
        }
    }
}

/// Protocol dispatcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct Dispatcher {
    /// Answer math only for connections that have said hello.
    require_hello: bool,
}

impl Dispatcher {
    pub fn new(require_hello: bool) -> Self {
        Self { require_hello }
    }

    /// Decode and handle one command line from `peer`.
    pub fn handle_line(&self, peer: SocketAddr, line: &str, registry: &ConnectionRegistry) -> Reply {
        match Request::parse(line) {
            Ok(request) => self.handle(peer, &request, registry),
            Err(e) => {
                debug!(peer = %peer, error = %e, "Undecodable request");
                Reply::respond(Response::invalid_format())
            }
        }
    }

    /// Handle a decoded request from `peer`.
    pub fn handle(&self, peer: SocketAddr, request: &Request, registry: &ConnectionRegistry) -> Reply {
        match request.command() {
            Ok(Command::Hello { name }) => Reply {
                response: Response::new(format!("Hello, {name}")),
                effect: Effect::RegisterSession(name.to_string()),
            },
            Ok(Command::Math { eq }) => {
                if self.require_hello && registry.name(&peer).is_none() {
                    return Reply::respond(Response::new("Say hello first"));
                }
                Reply::respond(Response::new(evaluator::evaluate(eq)))
            }
            Ok(Command::Exit { name }) => Reply {
                response: Response::new(format!("Bye, {name}")),
                effect: Effect::CloseSession,
            },
            Ok(Command::Unknown) => {
                debug!(peer = %peer, cmd = ?request.cmd(), "Unknown command");
                Reply::respond(Response::unknown_command())
            }
            Err(MissingField(field)) => {
                debug!(peer = %peer, field, "Request missing field");
                Reply::respond(Response::invalid_format())
            }
        }
    }
}
