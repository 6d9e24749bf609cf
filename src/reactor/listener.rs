//! The TCP listener resource backing `tcp-server` and `http-server` (§4.7,
//! §4.8 of the spec). Grounded directly on `radicle-node`'s
//! `reactor::listener::Listener`, minus the transport-layer session
//! injection (there is no handshake to run on accepted sockets here).

use std::io;
use std::net::SocketAddr;

use mio::event::{Event, Source};
use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Registry, Token};

use super::EventHandler;

#[derive(Debug)]
pub struct Listener(TcpListener);

impl Source for Listener {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        self.0.register(registry, token, interests)
    }

    fn reregister(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        self.0.reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        self.0.deregister(registry)
    }
}

impl Listener {
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        Ok(Self(TcpListener::bind(addr)?))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.0
            .local_addr()
            .expect("bound TCP listener has a local address")
    }

    fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        self.0.accept()
    }
}

impl EventHandler for Listener {
    type Reaction = io::Result<(TcpStream, SocketAddr)>;

    fn interests(&self) -> Option<Interest> {
        Some(Interest::READABLE)
    }

    fn handle(&mut self, event: &Event) -> Vec<Self::Reaction> {
        if !event.is_readable() {
            return vec![];
        }
        // `poll` is level-triggered here, so a single `accept` per
        // readiness event is enough; the reactor will be notified again if
        // another connection is still pending in the backlog.
        vec![self.accept()]
    }
}
