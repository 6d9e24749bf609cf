//! The callback bundle: the "up to four callables" shape shared by every
//! handle kind (§4 of the spec), modelled as a tagged variant per kind
//! rather than a class hierarchy (Design Note, §9).

use crate::error::Condition;
use crate::http::HttpRequest;
use crate::token::HandleId;

/// What kind of resource a handle record refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Timer,
    Signal,
    Dns,
    Socket,
    TcpServer,
    HttpServer,
    HttpClient,
    HttpRequest,
}

/// The address family delivered alongside a resolved address (§4.5).
/// Always `Inet` — this runtime never hands back an IPv6 result.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AddressFamily {
    Inet,
}

pub type ReadCb = Box<dyn FnMut(HandleId, Vec<u8>)>;
pub type WriteCb = Box<dyn FnMut(HandleId)>;
pub type EventCb = Box<dyn FnMut(Condition)>;
pub type GenericCb = Box<dyn FnOnce()>;
pub type TimerCb = Box<dyn FnOnce()>;
pub type SignalCb = Box<dyn FnMut()>;
pub type ResolveCb = Box<dyn FnOnce(String, AddressFamily)>;
pub type HttpRequestCb = Box<dyn FnMut(HttpRequest)>;
pub type HttpClientCb = Box<dyn FnOnce(u16, Vec<(String, String)>, Vec<u8>)>;

/// Up to four user callables, kept by the handle record and destroyed with
/// it. Not every slot is meaningful for every [`Kind`]; unused slots are
/// simply never invoked.
#[derive(Default)]
pub struct Bundle {
    pub read: Option<ReadCb>,
    pub write: Option<WriteCb>,
    pub event: Option<EventCb>,
    pub timer: Option<TimerCb>,
    pub signal: Option<SignalCb>,
    pub resolve: Option<ResolveCb>,
    pub http_request: Option<HttpRequestCb>,
    pub http_client: Option<HttpClientCb>,
}

impl Bundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire_event(&mut self, condition: Condition) {
        if let Some(cb) = self.event.as_mut() {
            cb(condition);
        }
    }
}
