//! The event-loop supervisor (§4.2): start, exit, and the `stats` snapshot.

use crate::config::LoopConfig;
use crate::error::Error;
use crate::event_loop::EventLoop;
use crate::stats::Stats;

/// Runs `entry` inside a freshly-initialized loop on the calling thread and
/// blocks until the loop drains naturally or [`exit_event_loop`] is called.
/// Fails with [`Error::EventLoopActive`] if a loop is already running on
/// this thread.
pub fn start_event_loop(entry: impl FnOnce() + 'static, config: LoopConfig) -> Result<(), Error> {
    EventLoop::start(entry, config)
}

/// Requests immediate loop termination. In-flight callbacks complete but
/// queued events do not; every handle record is forcibly destroyed during
/// teardown.
pub fn exit_event_loop() {
    EventLoop::request_exit();
}

/// A snapshot of the running loop's bookkeeping (§6's `stats` payload).
/// Panics if called outside a running loop.
pub fn stats() -> Stats {
    EventLoop::stats()
}
