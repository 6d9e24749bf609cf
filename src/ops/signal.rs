//! `signal-handler` (§4.4): overlays a reactor signal event on top of the
//! host's process-level disposition.

use crate::bundle::SignalCb;
use crate::error::Error;
use crate::event_loop::EventLoop;
use crate::signal::Signal;
use crate::token::HandleId;

/// Installs a handler for `signal`, failing with [`Error::SignalExists`] if
/// one is already installed for it.
pub fn signal_handler(signal: Signal, cb: SignalCb) -> Result<HandleId, Error> {
    EventLoop::signal_handler(signal, cb)
}

/// Tears down the handler and restores the prior process disposition.
pub fn free_signal_handler(id: HandleId) {
    EventLoop::free_signal_handler(id);
}

/// Frees every installed signal handler.
pub fn clear_signal_handlers() {
    EventLoop::clear_signal_handlers();
}
