use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use kcc_model::{Fingerprint, PartyId, RequestId};

use crate::{broker::party::Consumerd, guard::lock};

pub(crate) struct PendingRequest {
    pub(crate) requester: Arc<Consumerd>,
    /// Set when the cache was consulted and missed; the result is written back under this key.
    pub(crate) cache_key: Option<Fingerprint>,
}

/// Correlation of in-flight request ids to the consumerd that sent them.
#[derive(Default)]
pub(crate) struct PendingTable {
    entries: Mutex<HashMap<RequestId, PendingRequest>>,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record `id` as sent by `requester`. Returns `false` if `id` is already in flight.
    pub(crate) fn insert(&self, id: RequestId, requester: Arc<Consumerd>) -> bool {
        let mut entries = lock(&self.entries);
        if entries.contains_key(&id) {
            return false;
        }
        entries.insert(
            id,
            PendingRequest {
                requester,
                cache_key: None,
            },
        );
        true
    }

    /// Remove and return the entry for `id`.
    pub(crate) fn take(&self, id: &RequestId) -> Option<PendingRequest> {
        lock(&self.entries).remove(id)
    }

    pub(crate) fn set_cache_key(&self, id: &RequestId, key: Fingerprint) {
        if let Some(entry) = lock(&self.entries).get_mut(id) {
            entry.cache_key = Some(key);
        }
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Entries still owned by `party`.
    pub(crate) fn count_for(&self, party: PartyId) -> usize {
        lock(&self.entries)
            .values()
            .filter(|p| p.requester.id == party)
            .count()
    }
}
