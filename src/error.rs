//! The condition taxonomy delivered to `event-cb`, and the handful of
//! conditions that are thrown synchronously instead.
//!
//! Modelled as a tagged sum type rather than a class hierarchy, per the
//! Design Note on callback-level polymorphism: the parent/child
//! relationships from the spec (`connection-info` -> `connection-error` ->
//! `{dns,tcp,http}-error` -> the terminal specializations) are represented
//! by the `kind()`/`is_error()` predicates below rather than by inheritance.

use std::fmt;

/// The broad classification a [`Condition`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// `connection-info`: non-fatal, the handle stays alive.
    Info,
    /// `connection-error` and its specializations: terminal for the handle.
    Error,
}

/// A condition raised to a handle's `event-cb`.
///
/// All variants except [`Condition::SocketClosed`] are *delivered*; that one
/// is never constructed as a value passed to a callback (see
/// [`Error::SocketClosed`]) and exists here only so the taxonomy in the spec
/// is representable as a single enum for documentation purposes.
#[derive(Debug, Clone)]
pub enum Condition {
    /// `tcp-eof`: the peer closed its write side. Informational.
    TcpEof,
    /// `tcp-timeout`: a read or write idle timeout elapsed. Terminal.
    TcpTimeout,
    /// `tcp-refused`: the connection attempt was refused. Terminal.
    TcpRefused,
    /// Generic `tcp-error`, carrying the originating OS error code and message.
    TcpError { errcode: i32, errmsg: String },
    /// `http-timeout`: the request exceeded its deadline. Terminal.
    HttpTimeout,
    /// `http-refused`: the connection was refused. Terminal.
    HttpRefused,
    /// Generic `http-error`, carrying the originating error code and message.
    HttpError { errcode: i32, errmsg: String },
    /// `dns-error`, built from the resolver's failure.
    DnsError { errcode: i32, errmsg: String },
    /// An error raised from inside a user callback, trapped by the
    /// `catch-app-errors` policy and routed here instead of unwinding the loop.
    AppError(String),
}

impl Condition {
    /// Constructs a [`Condition::TcpError`] from a [`std::io::Error`].
    pub fn from_tcp_io(err: &std::io::Error) -> Self {
        Condition::TcpError {
            errcode: err.raw_os_error().unwrap_or(-1),
            errmsg: err.to_string(),
        }
    }

    /// Constructs a [`Condition::HttpError`] from a [`std::io::Error`].
    pub fn from_http_io(err: &std::io::Error) -> Self {
        Condition::HttpError {
            errcode: err.raw_os_error().unwrap_or(-1),
            errmsg: err.to_string(),
        }
    }

    /// Constructs a [`Condition::DnsError`] from a resolver failure message.
    pub fn dns_error(errmsg: impl Into<String>) -> Self {
        Condition::DnsError {
            errcode: -1,
            errmsg: errmsg.into(),
        }
    }

    /// The severity this condition belongs to; `*-info` leaves the handle
    /// alive, `*-error` (and its specializations) closes or destroys it.
    pub fn severity(&self) -> Severity {
        match self {
            Condition::TcpEof => Severity::Info,
            _ => Severity::Error,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.severity(), Severity::Error)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::TcpEof => write!(f, "tcp-eof"),
            Condition::TcpTimeout => write!(f, "tcp-timeout"),
            Condition::TcpRefused => write!(f, "tcp-refused"),
            Condition::TcpError { errcode, errmsg } => {
                write!(f, "tcp-error ({errcode}): {errmsg}")
            }
            Condition::HttpTimeout => write!(f, "http-timeout"),
            Condition::HttpRefused => write!(f, "http-refused"),
            Condition::HttpError { errcode, errmsg } => {
                write!(f, "http-error ({errcode}): {errmsg}")
            }
            Condition::DnsError { errcode, errmsg } => {
                write!(f, "dns-error ({errcode}): {errmsg}")
            }
            Condition::AppError(msg) => write!(f, "application error: {msg}"),
        }
    }
}

impl std::error::Error for Condition {}

/// Errors thrown synchronously by socket operations, as opposed to delivered
/// to an `event-cb`.
///
/// `socket-closed` is, by design, the sole member: see the Open Question in
/// §9 of the spec on why `close-socket` re-raises while `close-tcp-server`
/// and `close-http-server` stay idempotent.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("socket-closed: operation attempted on a closed socket")]
    SocketClosed,
    #[error("signal-exists: a handler for this signal is already installed")]
    SignalExists,
    #[error("event-loop-active: a loop is already running on this thread")]
    EventLoopActive,
}
