//! Expiry timer wheel, generic over the key identifying what expired.
//!
//! Generalizes `radicle-node`'s `reactor::timer::Timer`, which tracked only
//! "some timer fired" for a single poll-loop timeout. This crate needs to
//! know *which* of potentially many outstanding timers fired — delay
//! timers, and independently a socket's read-idle and write-idle timeouts —
//! so each entry carries a key (typically a [`crate::token::HandleId`], or
//! a [`SocketDirection`]-tagged variant of one) alongside its expiry.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::token::HandleId;

/// Distinguishes a socket's two independently-timed-out directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SocketDirection {
    Read,
    Write,
}

/// What a fired timer entry refers to, across every handle kind that uses
/// the wheel: one-shot `delay` timers, a socket's per-direction idle
/// timeout, and an HTTP client's request timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimerKey {
    Handle(HandleId),
    SocketIdle(HandleId, SocketDirection),
}

#[derive(Debug, Clone, Default)]
pub struct TimerWheel<K: Ord + Copy> {
    entries: BTreeMap<(Instant, K), ()>,
}

impl<K: Ord + Copy> TimerWheel<K> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Schedules `key` to expire `timeout` after `now`.
    pub fn set(&mut self, key: K, timeout: Duration, now: Instant) {
        self.entries.insert((now + timeout, key), ());
    }

    /// Removes any outstanding expiry for `key` (used when a timeout is
    /// cleared, or re-armed on activity).
    pub fn clear(&mut self, key: K) {
        self.entries.retain(|(_, entry_key), _| *entry_key != key);
    }

    /// The duration until the earliest outstanding expiry, if any.
    pub fn next_expiring_from(&self, now: Instant) -> Option<Duration> {
        let (deadline, _) = self.entries.keys().next()?;
        Some(if *deadline >= now {
            *deadline - now
        } else {
            Duration::default()
        })
    }

    /// Removes and returns every key whose deadline has passed by `now`
    /// (inclusive).
    ///
    /// `BTreeMap` keys are ordered lexicographically, by `Instant` first,
    /// so the entries due to fire are always a prefix of the iteration
    /// order; a `take_while` scan avoids needing a synthetic minimum `K` to
    /// build a `range` bound with.
    pub fn expired_by(&mut self, now: Instant) -> Vec<K> {
        let cutoff = now + Duration::from_millis(1);
        let fired: Vec<(Instant, K)> = self
            .entries
            .keys()
            .take_while(|(deadline, _)| *deadline < cutoff)
            .copied()
            .collect();
        for key in &fired {
            self.entries.remove(key);
        }
        fired.into_iter().map(|(_, key)| key).collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expires_by_deadline() {
        let mut wheel: TimerWheel<u32> = TimerWheel::new();
        let now = Instant::now();

        wheel.set(1, Duration::from_secs(8), now);
        wheel.set(2, Duration::from_secs(9), now);
        wheel.set(3, Duration::from_secs(10), now);

        let fired = wheel.expired_by(now + Duration::from_secs(9));
        assert_eq!(fired.len(), 2);
        assert!(fired.contains(&1));
        assert!(fired.contains(&2));
        assert_eq!(wheel.len(), 1);
    }

    #[test]
    fn next_expiring_tracks_remaining_time() {
        let mut wheel: TimerWheel<u32> = TimerWheel::new();
        let mut now = Instant::now();

        wheel.set(1, Duration::from_secs(3), now);
        assert_eq!(wheel.next_expiring_from(now), Some(Duration::from_secs(3)));

        now += Duration::from_secs(2);
        assert_eq!(wheel.next_expiring_from(now), Some(Duration::from_secs(1)));

        now += Duration::from_secs(2);
        assert_eq!(wheel.expired_by(now).len(), 1);
        assert_eq!(wheel.next_expiring_from(now), None);
    }

    #[test]
    fn clear_removes_pending_entry() {
        let mut wheel: TimerWheel<u32> = TimerWheel::new();
        let now = Instant::now();

        wheel.set(1, Duration::from_secs(5), now);
        wheel.clear(1);
        assert_eq!(wheel.next_expiring_from(now), None);
    }
}
