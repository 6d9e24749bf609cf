//! A single-threaded, callback-oriented async I/O runtime: timers, signal
//! handlers, DNS resolution, TCP clients/servers and HTTP clients/servers
//! over one cooperative event loop backed by a `mio` reactor.
//!
//! The hard part isn't any individual operation — it's the supervisor that
//! makes anonymous user callbacks, `mio`'s token-addressed readiness
//! events, and the lifecycle of long-lived resources (sockets, servers,
//! timers, signal handlers, DNS queries, HTTP requests) coherent on a
//! single thread. [`event_loop::EventLoop`] is that supervisor; everything
//! under [`ops`] is a thin wrapper over its thread-local methods.
//!
//! ```no_run
//! use evloop::{start_event_loop, delay, exit_event_loop, LoopConfig};
//! use std::time::Duration;
//!
//! start_event_loop(
//!     || {
//!         delay(Some(Duration::from_secs(1)), Box::new(|| {
//!             exit_event_loop();
//!         }));
//!     },
//!     LoopConfig::new(),
//! )
//! .unwrap();
//! ```

mod bundle;
mod config;
mod error;
mod event_loop;
mod http;
mod ops;
mod reactor;
mod registry;
mod signal;
mod stats;
mod timer_wheel;
mod token;

pub use bundle::{
    AddressFamily, EventCb, HttpClientCb, HttpRequestCb, ReadCb, ResolveCb, SignalCb, TimerCb, WriteCb,
};
pub use config::{FatalCb, LoggerCb, LoopConfig};
pub use error::{Condition, Error};
pub use http::{HttpRequest, HttpResponse, Method};
pub use ops::*;
pub use signal::Signal;
pub use stats::Stats;
pub use token::HandleId;
