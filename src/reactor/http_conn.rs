//! Byte-level HTTP/1.1 framing on top of a buffered [`super::Socket`].
//!
//! There is no `evhttp`-equivalent dependency available to lean on here (the
//! teacher repo has no HTTP stack at all), so framing is done directly with
//! `httparse` — the same low-level HTTP tokenizer `denoland-deno`'s
//! workspace depends on — feeding it the accumulated bytes from a socket's
//! `read-cb` until a full request (or response) has arrived.
//!
//! Only `Content-Length`-delimited bodies are supported; chunked transfer
//! encoding is not (see DESIGN.md's Open Questions — the spec is silent on
//! this and the corpus has no chunked-codec dependency to ground one on).

use std::io;

use crate::http::{split_resource_and_query, Method};

const MAX_HEADERS: usize = 64;

/// Accumulates bytes for one inbound HTTP request (server side).
#[derive(Default)]
pub struct RequestFramer {
    buf: Vec<u8>,
}

pub struct ParsedRequest {
    pub method: Method,
    pub uri: String,
    pub resource: String,
    pub querystring: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RequestFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds newly-read bytes in; returns a fully-framed request once the
    /// headers and (if any) `Content-Length` body have all arrived.
    pub fn feed(&mut self, bytes: &[u8]) -> io::Result<Option<ParsedRequest>> {
        self.buf.extend_from_slice(bytes);

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);

        let header_len = match req.parse(&self.buf) {
            Ok(httparse::Status::Complete(n)) => n,
            Ok(httparse::Status::Partial) => return Ok(None),
            Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e)),
        };

        let content_length = req
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case("content-length"))
            .and_then(|h| std::str::from_utf8(h.value).ok())
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);

        if self.buf.len() < header_len + content_length {
            return Ok(None);
        }

        let method = Method::parse(req.method.unwrap_or("GET"))
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "unsupported method"))?;
        let uri = req.path.unwrap_or("/").to_string();
        let (resource, querystring) = split_resource_and_query(&uri);
        let headers = req
            .headers
            .iter()
            .map(|h| {
                (
                    h.name.to_string(),
                    String::from_utf8_lossy(h.value).into_owned(),
                )
            })
            .collect();
        let body = self.buf[header_len..header_len + content_length].to_vec();

        self.buf.drain(..header_len + content_length);

        Ok(Some(ParsedRequest {
            method,
            uri,
            resource,
            querystring,
            headers,
            body,
        }))
    }
}

/// Accumulates bytes for one inbound HTTP response (client side).
#[derive(Default)]
pub struct ResponseFramer {
    buf: Vec<u8>,
}

pub struct ParsedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ResponseFramer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) -> io::Result<Option<ParsedResponse>> {
        self.buf.extend_from_slice(bytes);

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut resp = httparse::Response::new(&mut headers);

        let header_len = match resp.parse(&self.buf) {
            Ok(httparse::Status::Complete(n)) => n,
            Ok(httparse::Status::Partial) => return Ok(None),
            Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e)),
        };

        let content_length = resp
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case("content-length"))
            .and_then(|h| std::str::from_utf8(h.value).ok())
            .and_then(|v| v.trim().parse::<usize>().ok());

        let status = resp.code.unwrap_or(0);
        let response_headers: Vec<(String, String)> = resp
            .headers
            .iter()
            .map(|h| {
                (
                    h.name.to_string(),
                    String::from_utf8_lossy(h.value).into_owned(),
                )
            })
            .collect();

        match content_length {
            Some(len) => {
                if self.buf.len() < header_len + len {
                    return Ok(None);
                }
                let body = self.buf[header_len..header_len + len].to_vec();
                self.buf.drain(..header_len + len);
                Ok(Some(ParsedResponse {
                    status,
                    headers: response_headers,
                    body,
                }))
            }
            // No `Content-Length`: with `Connection: close` forced on every
            // request, the body runs to EOF; the caller signals that by
            // calling `finish_on_eof` instead of further `feed`s.
            None => Ok(None),
        }
    }

    /// Called once the peer has closed its write side, for a response
    /// without `Content-Length` (body runs to EOF).
    pub fn finish_on_eof(&mut self) -> io::Result<Option<ParsedResponse>> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut resp = httparse::Response::new(&mut headers);

        let header_len = match resp.parse(&self.buf) {
            Ok(httparse::Status::Complete(n)) => n,
            Ok(httparse::Status::Partial) => return Ok(None),
            Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e)),
        };
        let status = resp.code.unwrap_or(0);
        let response_headers = resp
            .headers
            .iter()
            .map(|h| {
                (
                    h.name.to_string(),
                    String::from_utf8_lossy(h.value).into_owned(),
                )
            })
            .collect();
        let body = self.buf[header_len..].to_vec();

        Ok(Some(ParsedResponse {
            status,
            headers: response_headers,
            body,
        }))
    }
}

/// Serializes a response (server side) as an HTTP/1.1 message, the way
/// `http-response` (§4.8 of the spec) emits it.
pub fn render_response(status: u16, headers: &[(String, String)], body: &[u8]) -> Vec<u8> {
    let reason = reason_phrase(status);
    let mut out = format!("HTTP/1.1 {status} {reason}\r\n").into_bytes();
    let mut has_content_length = false;
    for (name, value) in headers {
        if name.eq_ignore_ascii_case("content-length") {
            has_content_length = true;
        }
        out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    if !has_content_length {
        out.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    }
    out.extend_from_slice(b"Connection: close\r\n");
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
    out
}

/// Serializes a request (client side), injecting `Host` when absent and
/// forcing `Connection: close` regardless of what the caller supplied
/// (§4.9 of the spec — no persistent connections in the HTTP client).
pub fn render_request(
    method: Method,
    path_and_query: &str,
    host_header: &str,
    headers: &[(String, String)],
    body: &[u8],
) -> Vec<u8> {
    let mut out = format!("{} {} HTTP/1.1\r\n", method.as_str(), path_and_query).into_bytes();

    let mut has_host = false;
    for (name, value) in headers {
        if name.eq_ignore_ascii_case("host") {
            has_host = true;
        }
        if name.eq_ignore_ascii_case("connection") {
            continue;
        }
        out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    if !has_host {
        out.extend_from_slice(format!("Host: {host_header}\r\n").as_bytes());
    }
    out.extend_from_slice(b"Connection: close\r\n");
    if !body.is_empty() {
        out.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_framer_waits_for_a_full_content_length_body() {
        let mut framer = RequestFramer::new();
        let head = b"POST /widgets HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\r\n";
        assert!(framer.feed(head).unwrap().is_none());

        let parsed = framer.feed(b"hello").unwrap().expect("request complete");
        assert_eq!(parsed.method, Method::Post);
        assert_eq!(parsed.resource, "/widgets");
        assert_eq!(parsed.body, b"hello");
    }

    #[test]
    fn render_request_injects_host_only_when_absent() {
        let rendered = render_request(Method::Get, "/", "example.com", &[], &[]);
        let text = String::from_utf8(rendered).unwrap();
        assert!(text.contains("Host: example.com\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(!text.contains("Content-Length"));

        let rendered = render_request(
            Method::Get,
            "/",
            "example.com",
            &[("Host".to_string(), "caller.example".to_string())],
            &[],
        );
        let text = String::from_utf8(rendered).unwrap();
        assert!(text.contains("Host: caller.example\r\n"));
        assert!(!text.contains("Host: example.com"));
    }

    #[test]
    fn render_request_drops_caller_connection_header_and_forces_close() {
        let rendered = render_request(
            Method::Get,
            "/",
            "example.com",
            &[("Connection".to_string(), "keep-alive".to_string())],
            &[],
        );
        let text = String::from_utf8(rendered).unwrap();
        assert_eq!(text.matches("Connection:").count(), 1);
        assert!(text.contains("Connection: close\r\n"));
    }

    #[test]
    fn render_response_round_trips_through_response_framer() {
        let rendered = render_response(200, &[("X-Test".to_string(), "1".to_string())], b"payload");
        let mut framer = ResponseFramer::new();
        let parsed = framer.feed(&rendered).unwrap().expect("response complete");
        assert_eq!(parsed.status, 200);
        assert_eq!(parsed.body, b"payload");
        assert!(parsed.headers.iter().any(|(k, v)| k == "X-Test" && v == "1"));
    }

    #[test]
    fn response_without_content_length_waits_for_eof() {
        let mut framer = ResponseFramer::new();
        let head = b"HTTP/1.1 200 OK\r\nConnection: close\r\n\r\n";
        assert!(framer.feed(head).unwrap().is_none());
        framer.feed(b"trailing body bytes").unwrap();

        let parsed = framer.finish_on_eof().unwrap().expect("response complete on eof");
        assert_eq!(parsed.status, 200);
        assert_eq!(parsed.body, b"trailing body bytes");
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}
