//! The reactor: the mio-backed resources the supervisor drives.
//!
//! Generalizes `radicle-node`'s `reactor::{Listener, Transport, EventHandler}`
//! (noise/socks5 session plumbing stripped out — there is no handshake
//! layer here, just plain TCP) to the buffered-socket, TCP-listener and
//! HTTP connection resources §4.6–§4.9 of the spec calls for.

pub mod http_conn;
pub mod listener;
pub mod signal;
pub mod socket;

pub use listener::Listener;
pub use socket::{Socket, SocketState};

use mio::event::Event;

/// A resource managed by the reactor poll loop.
///
/// Mirrors `radicle-node`'s `EventHandler` trait: `interests()` tells the
/// supervisor what to (re)register for, `handle()` turns a readiness event
/// into zero or more higher-level reactions for the supervisor to dispatch.
pub trait EventHandler {
    type Reaction;

    fn interests(&self) -> Option<mio::Interest>;

    fn handle(&mut self, event: &Event) -> Vec<Self::Reaction>;
}
