//! HTTP request/response data model (§3, §4.8–§4.9 of the spec).
//!
//! Parsing off the wire is done with `httparse` (the same low-level HTTP
//! tokenizer `denoland-deno`'s workspace pulls in); this module only holds
//! the owned, application-facing records that `httparse`'s borrowed views
//! get copied into once a full request or response has arrived.

use crate::token::HandleId;

/// `http-request-method`, drawn from the closed set in §6 of the spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Head,
    Put,
    Delete,
    Options,
    Trace,
    Connect,
    Patch,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Head => "HEAD",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Connect => "CONNECT",
            Method::Patch => "PATCH",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "GET" => Method::Get,
            "POST" => Method::Post,
            "HEAD" => Method::Head,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            "OPTIONS" => Method::Options,
            "TRACE" => Method::Trace,
            "CONNECT" => Method::Connect,
            "PATCH" => Method::Patch,
            _ => return None,
        })
    }
}

impl Default for Method {
    fn default() -> Self {
        Method::Get
    }
}

/// An HTTP request record created by the HTTP server on request arrival
/// (§3 of the spec). `id` is the handle that `http_response` is later
/// called with.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub id: HandleId,
    pub method: Method,
    /// The full request-target, e.g. `/widgets?color=red`.
    pub uri: String,
    /// The path component of `uri`.
    pub resource: String,
    /// The substring of `uri` after `?`, empty if none.
    pub querystring: String,
    /// Headers in arrival order, case preserved as sent by the peer.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Options accepted by `http_response`; `status` defaults to 200, `headers`
/// to none, `body` to empty, matching the spec's defaults.
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Default for HttpResponse {
    fn default() -> Self {
        HttpResponse {
            status: 200,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }
}

pub(crate) fn split_resource_and_query(uri: &str) -> (String, String) {
    match uri.split_once('?') {
        Some((path, query)) => (path.to_string(), query.to_string()),
        None => (uri.to_string(), String::new()),
    }
}
