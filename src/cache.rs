//! Process-wide result cache keyed by company and presentation URL.
//!
//! One entry per company. An entry only answers a lookup for the URL it was
//! produced from, so a newer presentation on the listing page is a miss and
//! the stale entry is replaced when the new analysis lands.

use crate::output::AnalysisResult;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

#[derive(Debug, Clone)]
struct CacheEntry {
    url: String,
    result: Arc<AnalysisResult>,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    /// Latest URL the listing resolved to, per symbol.
    resolved: HashMap<String, String>,
}

/// Completed analyses, shared by every clone of a pipeline.
///
/// Entries are immutable once inserted and are handed out as
/// `Arc<AnalysisResult>`, so repeated hits return the same allocation.
#[derive(Debug, Default)]
pub struct AnalysisCache {
    state: RwLock<CacheState>,
}

impl AnalysisCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached result for `symbol` if it was produced from `url`.
    pub fn lookup(&self, symbol: &str, url: &str) -> Option<Arc<AnalysisResult>> {
        self.read()
            .entries
            .get(symbol)
            .filter(|entry| entry.url == url)
            .map(|entry| Arc::clone(&entry.result))
    }

    /// URL the cached result for `symbol` was produced from.
    pub fn cached_url(&self, symbol: &str) -> Option<String> {
        self.read().entries.get(symbol).map(|entry| entry.url.clone())
    }

    /// Latest URL recorded by [`record_resolved`](Self::record_resolved).
    pub fn resolved_url(&self, symbol: &str) -> Option<String> {
        self.read().resolved.get(symbol).cloned()
    }

    /// Store `result` for `symbol`, replacing any previous entry in one step.
    pub fn insert(&self, symbol: &str, url: &str, result: Arc<AnalysisResult>) {
        let mut state = self.write();
        Self::store(&mut state, symbol, url, result);
    }

    /// Store `result` only if `url` is still the latest resolved presentation
    /// for `symbol`. Returns `false` when a newer URL has been resolved since.
    pub fn insert_if_current(&self, symbol: &str, url: &str, result: Arc<AnalysisResult>) -> bool {
        let mut state = self.write();
        if let Some(latest) = state.resolved.get(symbol) {
            if latest != url {
                debug!("{}: not caching {}, listing now points at {}", symbol, url, latest);
                return false;
            }
        }
        Self::store(&mut state, symbol, url, result);
        true
    }

    /// Record that the listing for `symbol` now resolves to `current_url` and
    /// drop a cached entry produced from any other URL.
    ///
    /// Returns `true` when an entry was removed.
    pub fn record_resolved(&self, symbol: &str, current_url: &str) -> bool {
        let mut state = self.write();
        state
            .resolved
            .insert(symbol.to_string(), current_url.to_string());
        match state.entries.get(symbol) {
            Some(entry) if entry.url != current_url => {
                debug!("{}: evicting cache entry for superseded {}", symbol, entry.url);
                state.entries.remove(symbol);
                true
            }
            _ => false,
        }
    }

    /// Remove the entry for `symbol`. Returns `true` if there was one.
    pub fn evict(&self, symbol: &str) -> bool {
        self.write().entries.remove(symbol).is_some()
    }

    pub fn clear(&self) {
        let mut state = self.write();
        state.entries.clear();
        state.resolved.clear();
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    fn store(state: &mut CacheState, symbol: &str, url: &str, result: Arc<AnalysisResult>) {
        let previous = state.entries.insert(
            symbol.to_string(),
            CacheEntry {
                url: url.to_string(),
                result,
            },
        );
        match previous {
            Some(old) if old.url != url => debug!("{}: cache entry replaced ({} -> {})", symbol, old.url, url),
            _ => debug!("{}: cached analysis of {}", symbol, url),
        }
    }

    // Entries are replaced whole, so a panic while the lock was held cannot
    // leave a half-written entry behind; recover from poisoning.
    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}
