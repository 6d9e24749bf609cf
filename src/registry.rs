//! The handle registry (§4.1 of the spec): `allocate`/`attach`/`lookup`/
//! `destroy` over the two per-loop maps the spec calls for — a data
//! registry (id → kind-tagged record) and a function registry (id →
//! callback bundle), counted separately even though the bundle is logically
//! owned by the record, so [`crate::stats::Stats`] can report them apart.

use std::collections::HashMap;

use crate::bundle::{Bundle, Kind};
use crate::token::{HandleId, HandleIds};

/// Kind-specific bookkeeping a handle record carries alongside its
/// [`Kind`] tag. Resources that own a `mio` source (sockets, listeners) are
/// stored separately by [`crate::event_loop::EventLoop`] under the same id;
/// this only holds what the registry itself needs to answer lookups and
/// enforce invariants.
pub enum RecordState {
    Timer,
    Signal { signo: i32 },
    Dns,
    Socket,
    TcpServer,
    HttpServer,
    HttpClient,
    /// `connection` is the socket the request arrived on; `responded`
    /// guards the "`http_response` on an already-responded/cancelled
    /// request is a no-op" rule (§4.10 of the spec).
    HttpRequest {
        connection: HandleId,
        responded: bool,
    },
}

pub struct Record {
    pub kind: Kind,
    pub state: RecordState,
}

/// The two process-local maps, plus the id allocator that feeds them.
#[derive(Default)]
pub struct Registry {
    ids: HandleIds,
    records: HashMap<HandleId, Record>,
    bundles: HashMap<HandleId, Bundle>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh id and inserts its data-registry record. The
    /// function-registry bundle is attached separately with
    /// [`Registry::attach_bundle`] — mirroring the spec's two-step
    /// `allocate` then `attach` (§4.1).
    pub fn allocate(&mut self, kind: Kind, state: RecordState) -> HandleId {
        let id = self.ids.advance();
        self.records.insert(id, Record { kind, state });
        id
    }

    pub fn attach_bundle(&mut self, id: HandleId, bundle: Bundle) {
        self.bundles.insert(id, bundle);
    }

    pub fn record(&self, id: HandleId) -> Option<&Record> {
        self.records.get(&id)
    }

    pub fn record_mut(&mut self, id: HandleId) -> Option<&mut Record> {
        self.records.get_mut(&id)
    }

    pub fn bundle_mut(&mut self, id: HandleId) -> Option<&mut Bundle> {
        self.bundles.get_mut(&id)
    }

    pub fn contains(&self, id: HandleId) -> bool {
        self.records.contains_key(&id)
    }

    /// Destroys a handle's record and bundle. Per §4.1, callers must
    /// release any underlying reactor resource (deregister from `mio`,
    /// drop the socket/listener) *before* calling this, so that a reactor
    /// wakeup racing the destruction never finds a live id pointing at a
    /// freed resource — here it simply can no longer find the id at all
    /// once this returns.
    pub fn destroy(&mut self, id: HandleId) -> Option<(Record, Bundle)> {
        let record = self.records.remove(&id)?;
        let bundle = self.bundles.remove(&id).unwrap_or_default();
        Some((record, bundle))
    }

    pub fn data_registry_count(&self) -> usize {
        self.records.len()
    }

    pub fn fn_registry_count(&self) -> usize {
        self.bundles.len()
    }

    /// Forcibly empties both registries, for a forced loop exit (§4.2,
    /// invariant 4 in §3). Returns the destroyed ids so the caller can
    /// release their reactor resources.
    pub fn purge(&mut self) -> Vec<HandleId> {
        let ids: Vec<HandleId> = self.records.keys().copied().collect();
        self.records.clear();
        self.bundles.clear();
        ids
    }
}

#[cfg(test)]
mod tests {
    use qcheck_macros::quickcheck;

    use super::*;

    #[quickcheck]
    fn prop_allocated_ids_are_unique(count: u8) -> bool {
        let mut registry = Registry::new();
        let mut ids = Vec::new();
        for _ in 0..count {
            ids.push(registry.allocate(Kind::Timer, RecordState::Timer));
        }
        let mut sorted = ids.clone();
        sorted.sort();
        sorted.dedup();
        sorted.len() == ids.len()
    }

    #[quickcheck]
    fn prop_destroy_is_the_inverse_of_allocate(count: u8) -> bool {
        let mut registry = Registry::new();
        let ids: Vec<HandleId> = (0..count)
            .map(|_| {
                let id = registry.allocate(Kind::Timer, RecordState::Timer);
                registry.attach_bundle(id, Bundle::new());
                id
            })
            .collect();
        if registry.data_registry_count() != count as usize || registry.fn_registry_count() != count as usize {
            return false;
        }
        for id in ids {
            if registry.destroy(id).is_none() {
                return false;
            }
        }
        registry.data_registry_count() == 0 && registry.fn_registry_count() == 0
    }

    #[test]
    fn destroy_on_an_unknown_id_is_none() {
        let mut registry = Registry::new();
        let id = registry.allocate(Kind::Timer, RecordState::Timer);
        registry.destroy(id);
        assert!(registry.destroy(id).is_none());
    }
}
