use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::Arc;

use idmapper_core::ResolutionCacheEntry;

static SHARED: Lazy<Arc<ResolutionCache>> = Lazy::new(|| Arc::new(ResolutionCache::new()));

/// Resolution results keyed by query id.
///
/// Reads never block each other; a write replaces the entry for its key
/// (last writer wins).
#[derive(Debug, Default)]
pub struct ResolutionCache {
    entries: DashMap<String, ResolutionCacheEntry>,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache
    pub fn shared() -> Arc<ResolutionCache> {
        SHARED.clone()
    }

    pub fn get(&self, query_id: &str) -> Option<ResolutionCacheEntry> {
        self.entries.get(query_id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, query_id: &str) -> bool {
        self.entries.contains_key(query_id)
    }

    pub fn insert(&self, entry: ResolutionCacheEntry) {
        self.entries.insert(entry.query_id.clone(), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
