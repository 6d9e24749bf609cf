//! The public operation surface (§6 of the spec): thin free-function
//! wrappers over [`crate::event_loop::EventLoop`]'s thread-local methods.
//! Each submodule covers one component from §4; none of them hold any
//! state of their own — the event loop is the only stateful thing here.

mod dns;
mod http;
mod signal;
mod supervisor;
mod tcp;
mod timer;

pub use dns::dns_lookup;
pub use http::{
    close_http_server, http_client, http_response, http_server, http_server_local_addr, HttpClientOptions,
};
pub use signal::{clear_signal_handlers, free_signal_handler, signal_handler};
pub use supervisor::{exit_event_loop, start_event_loop, stats};
pub use tcp::{
    close_socket, close_tcp_server, disable_socket, enable_socket, set_socket_timeouts, tcp_send, tcp_server,
    tcp_server_local_addr, write_socket_data, SocketDirections,
};
pub use timer::{cancel_delay, delay};
