//! `delay` (§4.3): a one-shot function run after a delay.

use std::time::Duration;

use crate::bundle::TimerCb;
use crate::event_loop::EventLoop;
use crate::token::HandleId;

/// Schedules `cb` to run after `time`, or on the next tick if `None`. The
/// record is one-shot: destroyed once `cb` returns.
pub fn delay(time: Option<Duration>, cb: TimerCb) -> HandleId {
    EventLoop::delay(time.unwrap_or_default(), cb)
}

/// Cancels a pending `delay` timer; a no-op if it already fired.
pub fn cancel_delay(id: HandleId) {
    EventLoop::cancel_delay(id);
}
