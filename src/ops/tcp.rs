//! TCP sockets and servers (§4.6, §4.7).

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::bundle::{EventCb, ReadCb, WriteCb};
use crate::error::Error;
use crate::event_loop::EventLoop;
use crate::token::HandleId;

/// Creates a socket, resolves `host` (sync for an IPv4 literal, async
/// otherwise), writes `data`, and returns the handle immediately. Any
/// connection-level failure is delivered to `event_cb` rather than
/// returned here.
pub fn tcp_send(
    host: &str,
    port: u16,
    data: &[u8],
    read_cb: Option<ReadCb>,
    event_cb: Option<EventCb>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
) -> HandleId {
    EventLoop::tcp_send(host, port, data, read_cb, event_cb, read_timeout, write_timeout)
}

/// Appends `data` to `socket`'s write buffer. Any of `read_cb`/`write_cb`/
/// `event_cb` supplied replaces the current callback in that slot before
/// the write is enqueued. Fails with [`Error::SocketClosed`] if the socket
/// is already closed.
pub fn write_socket_data(
    socket: HandleId,
    data: &[u8],
    read_cb: Option<ReadCb>,
    write_cb: Option<WriteCb>,
    event_cb: Option<EventCb>,
) -> Result<(), Error> {
    EventLoop::write_socket_data(socket, data, read_cb, write_cb, event_cb)
}

/// Arms or clears `socket`'s per-direction idle timeouts; `None` clears.
pub fn set_socket_timeouts(socket: HandleId, read: Option<Duration>, write: Option<Duration>) {
    EventLoop::set_socket_timeouts(socket, read, write);
}

/// The per-direction enable bits accepted by [`enable_socket`]/[`disable_socket`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SocketDirections {
    pub read: bool,
    pub write: bool,
}

pub fn enable_socket(socket: HandleId, directions: SocketDirections) {
    if directions.read {
        EventLoop::set_socket_read_enabled(socket, true);
    }
    if directions.write {
        EventLoop::set_socket_write_enabled(socket, true);
    }
}

/// Disabling a direction also suspends that direction's idle timer.
pub fn disable_socket(socket: HandleId, directions: SocketDirections) {
    if directions.read {
        EventLoop::set_socket_read_enabled(socket, false);
    }
    if directions.write {
        EventLoop::set_socket_write_enabled(socket, false);
    }
}

/// Closes `socket`. Raises [`Error::SocketClosed`] if it was already
/// closed — deliberate, per the documented asymmetry with server closes.
pub fn close_socket(socket: HandleId) -> Result<(), Error> {
    EventLoop::close_socket(socket)
}

/// Binds a TCP listener. `bind_address` of `None` means `0.0.0.0`. Each
/// accepted connection becomes a socket whose `read_cb`/`event_cb` are the
/// ones given here — there is no separate accept callback.
pub fn tcp_server(
    bind_address: Option<Ipv4Addr>,
    port: u16,
    read_cb: ReadCb,
    event_cb: Option<EventCb>,
) -> std::io::Result<HandleId> {
    let ip = bind_address.unwrap_or(Ipv4Addr::UNSPECIFIED);
    EventLoop::tcp_server(SocketAddr::new(ip.into(), port), read_cb, event_cb)
}

/// Stops `server` from accepting further connections; already-accepted
/// sockets are unaffected. Idempotent.
pub fn close_tcp_server(server: HandleId) {
    EventLoop::close_tcp_server(server);
}

/// The bound address of a listener started with `port: 0`.
pub fn tcp_server_local_addr(server: HandleId) -> Option<SocketAddr> {
    EventLoop::listener_local_addr(server)
}
