//! `dns-lookup` (§4.5): hostname resolution, synchronous for IPv4 literals.

use crate::bundle::{EventCb, ResolveCb};
use crate::event_loop::EventLoop;
use crate::token::HandleId;

/// Resolves `host` to an IPv4 address. If `host` already parses as one,
/// `resolve_cb` runs synchronously before this call returns and no reactor
/// work is queued; otherwise resolution happens on a helper thread and
/// `resolve_cb` runs on a later tick. Any resolver failure is delivered to
/// `event_cb` instead.
pub fn dns_lookup(host: impl Into<String>, resolve_cb: ResolveCb, event_cb: Option<EventCb>) -> HandleId {
    EventLoop::dns_lookup(host, resolve_cb, event_cb)
}
