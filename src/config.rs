//! Per-loop configuration, built the way `radicle-node`'s retrieved `Http<B>`
//! builder (`examples/merl-twin-hyper/src/server/mod.rs`) configures a
//! protocol server: a plain struct with chained `with_*` setters, consumed
//! by value at `start_event_loop`.

use crate::bundle::EventCb;

/// Invoked when the reactor itself reports an internal failure that would
/// normally abort the process (§4.2 of the spec). The loop exits afterwards.
pub type FatalCb = Box<dyn FnMut(std::io::Error)>;

/// Invoked for every log line the runtime itself emits at the application
/// level, independent of the `log` facade target filtering (kept distinct
/// from `log::*!` macros so embedding applications can mirror runtime
/// diagnostics into their own telemetry without reconfiguring `log`).
pub type LoggerCb = Box<dyn FnMut(log::Level, String)>;

/// Configuration accepted by [`crate::start_event_loop`].
pub struct LoopConfig {
    pub(crate) catch_app_errors: bool,
    pub(crate) fatal_cb: Option<FatalCb>,
    pub(crate) logger_cb: Option<LoggerCb>,
    pub(crate) default_event_cb: Option<EventCb>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        LoopConfig {
            catch_app_errors: false,
            fatal_cb: None,
            logger_cb: None,
            default_event_cb: None,
        }
    }
}

impl LoopConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// If `true`, errors raised from inside a user callback are routed to
    /// the nearest `event-cb`, or to the default one, instead of unwinding
    /// the loop (§7 of the spec).
    pub fn catch_app_errors(mut self, yes: bool) -> Self {
        self.catch_app_errors = yes;
        self
    }

    pub fn fatal_cb(mut self, cb: FatalCb) -> Self {
        self.fatal_cb = Some(cb);
        self
    }

    pub fn logger_cb(mut self, cb: LoggerCb) -> Self {
        self.logger_cb = Some(cb);
        self
    }

    /// Installs the channel of last resort for trapped application errors
    /// with no handle-specific `event-cb` to fall back to. Per §7, the
    /// default re-raises on `connection-error` and above, silently absorbs
    /// `connection-info`, and re-raises anything else — callers that want
    /// different behavior override it here.
    pub fn default_event_cb(mut self, cb: EventCb) -> Self {
        self.default_event_cb = Some(cb);
        self
    }
}
