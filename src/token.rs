//! Dense id allocation for handles.
//!
//! Generalizes `radicle-node`'s `reactor::token::Tokens`, which minted
//! `mio::Token`s for listeners and transports with a single wrapping
//! counter. Here the same counter shape mints the opaque [`HandleId`]s the
//! registry (§4.1 of the spec) indexes by; a `HandleId` doubles as the
//! `mio::Token` for whatever reactor resource it owns, so there is exactly
//! one id space, matching "the id is the only value passed through opaque
//! callback contexts" (§6 of the spec).

use std::fmt;

/// Reserved id/token for the `mio::Waker` used to interrupt a blocking poll
/// from the DNS resolution helper thread.
pub const WAKER: mio::Token = mio::Token(0);

/// An opaque, application-visible reference to a handle record.
///
/// Late wakeups for an id whose record has since been destroyed are handled
/// by the registry's lookup returning `None`, not by dereferencing
/// anything (Design Note, §9).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(usize);

impl fmt::Debug for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HandleId({})", self.0)
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl HandleId {
    /// The `mio::Token` this handle is registered under, for resources that
    /// are registered with the poll at all (timers, DNS literals and
    /// one-shot synchronous resolutions never are).
    pub fn token(&self) -> mio::Token {
        mio::Token(self.0)
    }

    /// Recovers the handle that owns a readiness event's token.
    pub(crate) fn from_token(token: mio::Token) -> Self {
        HandleId(token.0)
    }
}

/// Monotonic id counter, wrapping back to its initial value on overflow.
///
/// `usize` is wide enough that wraparound is not expected to occur in
/// practice; the wraparound path exists only so the counter never panics.
#[derive(Clone, Debug)]
pub struct HandleIds {
    initial: usize,
    current: usize,
}

impl HandleIds {
    pub fn new(initial: usize) -> Self {
        HandleIds {
            initial,
            current: initial,
        }
    }

    #[inline]
    pub fn advance(&mut self) -> HandleId {
        let current = self.current;
        self.current = match current.wrapping_add(1) {
            0 => {
                log::info!(target: "registry", "handle id counter wrapped");
                self.initial
            }
            next => next,
        };
        HandleId(current)
    }
}

impl Default for HandleIds {
    fn default() -> Self {
        // 0 is reserved for the waker token.
        HandleIds::new(WAKER.0 + 1)
    }
}
