//! HTTP server and client (§4.8, §4.9).

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::bundle::{EventCb, HttpClientCb, HttpRequestCb};
use crate::event_loop::EventLoop;
use crate::http::{HttpResponse, Method};
use crate::token::HandleId;

/// Binds an HTTP server. `bind_address` of `None` means `0.0.0.0`. On each
/// incoming request `request_cb` is invoked; the application must
/// eventually call [`http_response`] or the request's reactor resource
/// stays alive and blocks the loop from draining.
pub fn http_server(
    bind_address: Option<Ipv4Addr>,
    port: u16,
    request_cb: HttpRequestCb,
    event_cb: Option<EventCb>,
) -> std::io::Result<HandleId> {
    let ip = bind_address.unwrap_or(Ipv4Addr::UNSPECIFIED);
    EventLoop::http_server(SocketAddr::new(ip.into(), port), request_cb, event_cb)
}

/// Idempotent; does not terminate in-flight requests.
pub fn close_http_server(server: HandleId) {
    EventLoop::close_http_server(server);
}

/// The bound address of a server started with `port: 0`.
pub fn http_server_local_addr(server: HandleId) -> Option<SocketAddr> {
    EventLoop::listener_local_addr(server)
}

/// Sends `response` for `request`; a no-op if it was already responded to
/// or the peer aborted the connection first.
pub fn http_response(request: HandleId, response: HttpResponse) {
    EventLoop::http_response(request, response);
}

/// Options accepted by [`http_client`]; defaults match the spec's own
/// (`method='GET`, no extra headers, no body, no timeout).
pub struct HttpClientOptions {
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub timeout: Option<Duration>,
}

impl Default for HttpClientOptions {
    fn default() -> Self {
        HttpClientOptions {
            method: Method::Get,
            headers: Vec::new(),
            body: Vec::new(),
            timeout: None,
        }
    }
}

/// Issues a one-shot HTTP request against `uri` (§4.9). The URI's authority
/// supplies the resolution target and, unless the caller already set one,
/// the rendered `Host` header (including the port when it isn't 80); any
/// caller-supplied `Connection` header is overridden to force close-on-reply.
pub fn http_client(
    uri: &str,
    request_cb: HttpClientCb,
    event_cb: Option<EventCb>,
    options: HttpClientOptions,
) -> Result<HandleId, url::ParseError> {
    let parsed = url::Url::parse(uri)?;
    let host = parsed.host_str().unwrap_or("").to_string();
    let port = parsed.port_or_known_default().unwrap_or(80);
    let host_header = if port == 80 { host.clone() } else { format!("{host}:{port}") };

    let mut path_and_query = parsed.path().to_string();
    if path_and_query.is_empty() {
        path_and_query.push('/');
    }
    if let Some(query) = parsed.query() {
        path_and_query.push('?');
        path_and_query.push_str(query);
    }

    Ok(EventLoop::http_client(
        &host,
        port,
        &host_header,
        options.method,
        &path_and_query,
        options.headers,
        options.body,
        options.timeout,
        request_cb,
        event_cb,
    ))
}
