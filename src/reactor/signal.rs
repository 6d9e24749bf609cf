//! The signal-handler multiplex (§4.4 of the spec).
//!
//! `radicle-node`'s own `radicle-signals` crate wraps
//! `signals_receipts`/`libc` directly; that crate isn't in the retrieval
//! pack, but `denoland-deno`'s workspace depends on `signal-hook-registry`
//! for the same job, so this module uses the same family's mio-integrated
//! sibling, `signal-hook-mio`, which exposes a `mio::event::Source`
//! ([`signal_hook_mio::v1_0::Signals`]) that can be registered directly
//! with the poll — no self-pipe plumbing to hand-roll.
//!
//! One [`SignalSource`] is created per installed `signo`, each under its
//! own handle id/token, so "at most one record may be active per signo"
//! (§4.4's invariant) falls out of the registry's normal one-record-per-id
//! bookkeeping rather than needing separate enforcement here. Dropping the
//! source (on `free-signal-handler`) un-chains our handler, restoring the
//! signal's prior disposition.

use std::io;

use mio::event::{Event, Source};
use mio::{Interest, Registry, Token};
use signal_hook_mio::v1_0::Signals;

use super::EventHandler;

pub struct SignalSource {
    signals: Signals,
}

impl SignalSource {
    pub fn install(signo: std::os::raw::c_int) -> io::Result<Self> {
        let signals = Signals::new([signo])?;
        Ok(Self { signals })
    }
}

impl Source for SignalSource {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        self.signals.register(registry, token, interests)
    }

    fn reregister(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        self.signals.reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        self.signals.deregister(registry)
    }
}

impl EventHandler for SignalSource {
    /// Each readiness event may carry more than one delivery if the signal
    /// fired multiple times between poll ticks.
    type Reaction = ();

    fn interests(&self) -> Option<Interest> {
        Some(Interest::READABLE)
    }

    fn handle(&mut self, _event: &Event) -> Vec<Self::Reaction> {
        self.signals.pending().map(|_signo| ()).collect()
    }
}
