//! The buffered TCP socket resource ("bufferevent") underlying every
//! `tcp-send`/`tcp-server`-accepted socket (§4.6, §4.10 of the spec).
//!
//! Grounded on `radicle-node`'s `reactor::transport::Transport`: the same
//! write-queue-then-flush shape, the same level-triggered single-read-per-
//! event assumption, the same `WriteAtomic` contract — generalized from a
//! generic encrypted `Session` to a plain `mio::net::TcpStream`, since this
//! spec has no handshake layer (no TLS, §1 Non-goals).

use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::net::SocketAddr;

use mio::event::{Event, Source};
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};

use super::EventHandler;

const READ_BUFFER_SIZE: usize = u16::MAX as usize;

/// The states a socket moves through (§4.10 of the spec).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// Outgoing connection in flight; becomes `Open` on the first writable
    /// event (non-blocking `connect` semantics).
    Connecting,
    Open,
    /// `close-socket` was called while the write buffer was non-empty; the
    /// socket waits for drain before actually closing.
    HalfClosedWritePending,
    Closed,
}

/// What happened to a socket on an I/O readiness event, for the supervisor
/// to turn into `read-cb`/`write-cb`/`event-cb` invocations.
pub enum SocketReaction {
    Connected,
    Data(Vec<u8>),
    WriteDrained,
    Eof,
    Error(io::Error),
}

/// The trait guarantees that data is either written in full to the
/// in-memory queue or, on a hard error, none of it is — multiple writes
/// never get interleaved out of order.
pub trait WriteAtomic: Write {
    fn write_atomic(&mut self, buf: &[u8]) -> io::Result<()>;
}

pub struct Socket {
    stream: TcpStream,
    state: SocketState,
    pub read_enable: bool,
    pub write_enable: bool,
    write_intent: bool,
    read_buffer: Box<[u8; READ_BUFFER_SIZE]>,
    write_buffer: VecDeque<u8>,
}

impl Socket {
    pub fn connecting(stream: TcpStream) -> Self {
        Self {
            stream,
            state: SocketState::Connecting,
            read_enable: true,
            write_enable: true,
            write_intent: true,
            read_buffer: Box::new([0u8; READ_BUFFER_SIZE]),
            write_buffer: VecDeque::new(),
        }
    }

    pub fn accepted(stream: TcpStream) -> Self {
        Self {
            stream,
            state: SocketState::Open,
            read_enable: true,
            write_enable: true,
            write_intent: false,
            read_buffer: Box::new([0u8; READ_BUFFER_SIZE]),
            write_buffer: VecDeque::new(),
        }
    }

    pub fn state(&self) -> SocketState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == SocketState::Closed
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    pub fn write_buffer_is_empty(&self) -> bool {
        self.write_buffer.is_empty()
    }

    /// Called when `close-socket` is invoked by the application.
    ///
    /// If the write buffer is empty, transitions straight to `Closed`;
    /// otherwise defers the transition until the buffer drains.
    pub fn request_close(&mut self) {
        if self.write_buffer.is_empty() {
            self.state = SocketState::Closed;
        } else {
            self.state = SocketState::HalfClosedWritePending;
        }
    }

    pub fn force_close(&mut self) {
        self.state = SocketState::Closed;
    }

    fn flush_buffer(&mut self) -> io::Result<()> {
        let orig_len = self.write_buffer.len();
        if orig_len == 0 {
            self.write_intent = false;
            return Ok(());
        }

        let contiguous = self.write_buffer.make_contiguous();
        let written = match self.stream.write(contiguous) {
            Ok(n) => n,
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => 0,
            Err(err) => return Err(err),
        };

        self.write_buffer.drain(..written);
        self.write_intent = !self.write_buffer.is_empty();

        if self.write_buffer.is_empty() && self.state == SocketState::HalfClosedWritePending {
            self.state = SocketState::Closed;
        }

        Ok(())
    }

    fn handle_readable(&mut self) -> Option<SocketReaction> {
        match self.stream.read(self.read_buffer.as_mut()) {
            Ok(0) => Some(SocketReaction::Eof),
            Ok(n) => Some(SocketReaction::Data(self.read_buffer[..n].to_vec())),
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => None,
            Err(err) => Some(SocketReaction::Error(err)),
        }
    }

    fn handle_writable(&mut self) -> Option<SocketReaction> {
        if self.state == SocketState::Connecting {
            match self.stream.take_error() {
                Ok(None) => {
                    self.state = SocketState::Open;
                    self.write_intent = !self.write_buffer.is_empty();
                    return Some(SocketReaction::Connected);
                }
                Ok(Some(err)) | Err(err) => return Some(SocketReaction::Error(err)),
            }
        }

        match self.flush_buffer() {
            Ok(()) if self.write_buffer.is_empty() => Some(SocketReaction::WriteDrained),
            Ok(()) => None,
            Err(err) => Some(SocketReaction::Error(err)),
        }
    }
}

impl Source for Socket {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        self.stream.register(registry, token, interests)
    }

    fn reregister(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        self.stream.reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        self.stream.deregister(registry)
    }
}

impl EventHandler for Socket {
    type Reaction = SocketReaction;

    fn interests(&self) -> Option<Interest> {
        match self.state {
            SocketState::Closed => None,
            SocketState::Connecting => Some(Interest::WRITABLE),
            SocketState::Open | SocketState::HalfClosedWritePending => {
                match (self.read_enable, self.write_enable && self.write_intent) {
                    (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
                    (true, false) => Some(Interest::READABLE),
                    (false, true) => Some(Interest::WRITABLE),
                    (false, false) => None,
                }
            }
        }
    }

    fn handle(&mut self, event: &Event) -> Vec<Self::Reaction> {
        let mut reactions = Vec::with_capacity(2);
        if event.is_writable() {
            reactions.extend(self.handle_writable());
        }
        if event.is_readable() && self.state != SocketState::Closed {
            reactions.extend(self.handle_readable());
        }
        reactions
    }
}

impl Write for Socket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_atomic(buf).map(|()| buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_buffer()
    }
}

impl WriteAtomic for Socket {
    fn write_atomic(&mut self, buf: &[u8]) -> io::Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        self.write_buffer.extend(buf);
        self.write_intent = true;
        if self.state == SocketState::Open {
            self.flush_buffer()?;
        }
        Ok(())
    }
}
