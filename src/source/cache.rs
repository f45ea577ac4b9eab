use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::core::{CallId, Hash32, TileKey};
use crate::error::{CallError, ProcedureError, SourceFetchError};

/// Immutable tile contents together with their digest.
#[derive(Clone, PartialEq, Eq)]
pub struct TileBytes {
    data: Arc<[u8]>,
    digest: Hash32,
}

impl TileBytes {
    pub fn new(data: Vec<u8>) -> Self {
        let digest = Hash32::hash(&data);
        Self {
            data: data.into(),
            digest,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn digest(&self) -> Hash32 {
        self.digest
    }
}

impl fmt::Debug for TileBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileBytes")
            .field("len", &self.data.len())
            .field("digest", &self.digest)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileStatus {
    /// A fetch is running under this call.
    Pending(CallId),
    Ready(TileBytes),
    Failed(CallError),
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    key: TileKey,
    status: TileStatus,
    /// Call that produced, or is producing, this entry.
    call_id: CallId,
    requested_pass: u64,
    resolved_pass: Option<u64>,
    /// First pass in which a requester was told about a failure.
    reported_pass: Option<u64>,
    last_used_pass: u64,
}

impl CacheEntry {
    pub fn key(&self) -> TileKey {
        self.key
    }

    pub fn status(&self) -> &TileStatus {
        &self.status
    }

    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.status, TileStatus::Pending(_))
    }

    pub fn bytes(&self) -> Option<&TileBytes> {
        match &self.status {
            TileStatus::Ready(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&CallError> {
        match &self.status {
            TileStatus::Failed(error) => Some(error),
            _ => None,
        }
    }

    /// The source failure behind a failed fetch, if that is what failed.
    pub fn source_error(&self) -> Option<&SourceFetchError> {
        match self.error()? {
            CallError::Procedure(ProcedureError::Source(error)) => Some(error),
            _ => None,
        }
    }

    pub fn requested_pass(&self) -> u64 {
        self.requested_pass
    }

    /// Pass in which the entry left the pending state.
    pub fn resolved_pass(&self) -> Option<u64> {
        self.resolved_pass
    }

    pub fn reported_pass(&self) -> Option<u64> {
        self.reported_pass
    }

    pub fn last_used_pass(&self) -> u64 {
        self.last_used_pass
    }
}

/// Tiles keyed by address, with the reverse mapping from in-flight calls.
#[derive(Debug, Default)]
pub struct TileCache {
    entries: BTreeMap<TileKey, CacheEntry>,
    calls: HashMap<CallId, TileKey>,
}

impl TileCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &TileKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }

    /// Key the call is fetching, if it is still awaited.
    pub fn key_for(&self, call_id: CallId) -> Option<TileKey> {
        self.calls.get(&call_id).copied()
    }

    pub(crate) fn begin(&mut self, key: TileKey, call_id: CallId, pass: u64) {
        if let Some(TileStatus::Pending(stale)) = self.entries.get(&key).map(|entry| &entry.status) {
            self.calls.remove(stale);
        }

        self.calls.insert(call_id, key);
        self.entries.insert(
            key,
            CacheEntry {
                key,
                status: TileStatus::Pending(call_id),
                call_id,
                requested_pass: pass,
                resolved_pass: None,
                reported_pass: None,
                last_used_pass: pass,
            },
        );
    }

    /// Moves the entry fetched by `call_id` out of the pending state.
    /// Returns `None` when nothing awaits that call anymore.
    pub(crate) fn resolve(
        &mut self,
        call_id: CallId,
        status: TileStatus,
        pass: u64,
    ) -> Option<TileKey> {
        let key = self.calls.remove(&call_id)?;
        let entry = self.entries.get_mut(&key)?;
        if entry.status != TileStatus::Pending(call_id) {
            return None;
        }

        entry.status = status;
        entry.resolved_pass = Some(pass);
        entry.reported_pass = None;
        Some(key)
    }

    /// Records that the failure of `key` was handed to a requester in `pass`.
    /// Returns the pass in which that first happened.
    pub(crate) fn report(&mut self, key: &TileKey, pass: u64) -> Option<u64> {
        let entry = self.entries.get_mut(key)?;
        Some(*entry.reported_pass.get_or_insert(pass))
    }

    pub(crate) fn touch(&mut self, key: &TileKey, pass: u64) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.last_used_pass = entry.last_used_pass.max(pass);
        }
    }

    /// Removes an entry. A pending fetch for it is forgotten, its eventual
    /// completion will not be routed here.
    pub fn evict(&mut self, key: &TileKey) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        if let TileStatus::Pending(call_id) = entry.status {
            self.calls.remove(&call_id);
        }
        Some(entry)
    }

    /// Pending entries requested at least `max_passes` passes before `pass`.
    pub(crate) fn overdue(&self, pass: u64, max_passes: u64) -> Vec<(TileKey, CallId)> {
        self.entries
            .values()
            .filter_map(|entry| match entry.status {
                TileStatus::Pending(call_id)
                    if pass.saturating_sub(entry.requested_pass) >= max_passes =>
                {
                    Some((entry.key, call_id))
                }
                _ => None,
            })
            .collect()
    }

    /// Settled entries not used in `pass`, least recently used first.
    pub(crate) fn eviction_candidates(&self, pass: u64) -> Vec<TileKey> {
        let mut candidates: Vec<&CacheEntry> = self
            .entries
            .values()
            .filter(|entry| !entry.is_pending() && entry.last_used_pass < pass)
            .collect();

        candidates.sort_by_key(|entry| (entry.last_used_pass, entry.key));
        candidates.into_iter().map(|entry| entry.key).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_routes_by_call() {
        let key = TileKey::new(3, 1, 2);
        let mut cache = TileCache::new();
        cache.begin(key, CallId::new(5), 1);

        assert_eq!(cache.key_for(CallId::new(5)), Some(key));
        assert_eq!(cache.resolve(CallId::new(4), TileStatus::Ready(TileBytes::new(vec![1])), 2), None);

        let bytes = TileBytes::new(b"abc".to_vec());
        assert_eq!(cache.resolve(CallId::new(5), TileStatus::Ready(bytes.clone()), 2), Some(key));

        let entry = cache.get(&key).unwrap();
        assert_eq!(entry.bytes(), Some(&bytes));
        assert_eq!(entry.resolved_pass(), Some(2));
        assert_eq!(cache.key_for(CallId::new(5)), None);
    }

    #[test]
    fn test_superseded_call_is_ignored() {
        let key = TileKey::new(0, 0, 0);
        let mut cache = TileCache::new();
        cache.begin(key, CallId::new(1), 1);
        cache.begin(key, CallId::new(2), 2);

        assert_eq!(cache.resolve(CallId::new(1), TileStatus::Failed(CallError::Shutdown), 3), None);
        assert!(cache.get(&key).unwrap().is_pending());
    }

    #[test]
    fn test_overdue_and_candidates() {
        let a = TileKey::new(1, 0, 0);
        let b = TileKey::new(1, 1, 0);
        let c = TileKey::new(1, 0, 1);
        let mut cache = TileCache::new();

        cache.begin(a, CallId::new(1), 1);
        cache.begin(b, CallId::new(2), 1);
        cache.begin(c, CallId::new(3), 3);
        cache.resolve(CallId::new(2), TileStatus::Ready(TileBytes::new(vec![])), 2);
        cache.touch(&b, 2);

        assert_eq!(cache.overdue(4, 3), vec![(a, CallId::new(1))]);
        assert_eq!(cache.eviction_candidates(4), vec![b]);
        assert!(cache.eviction_candidates(2).is_empty());
    }
}
