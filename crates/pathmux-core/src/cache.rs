//! Resolution cache.
//!
//! Memoizes `(specifier, base directory) → ResolvedPath` for a session, with a
//! reverse index from resolved file to the keys that produced it so a file
//! change can drop exactly the affected entries.

use crate::resolver::ResolvedPath;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, TryLockError};
use tracing::debug;

/// Cache key: the specifier as written and the directory it was resolved from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolveKey {
    pub specifier: String,
    pub base_dir: PathBuf,
}

impl ResolveKey {
    pub fn new(specifier: impl Into<String>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            specifier: specifier.into(),
            base_dir: base_dir.into(),
        }
    }
}

/// One key's slot. Holding its mutex makes the holder the only resolver for
/// that key; later callers wait and read the stored value.
type Slot = Arc<Mutex<Option<ResolvedPath>>>;

/// Thread-safe resolution cache.
///
/// Only successful resolutions are stored; a failed lookup is retried by the
/// next request for the same key.
#[derive(Debug, Default)]
pub struct ResolveCache {
    /// key -> slot
    entries: RwLock<HashMap<ResolveKey, Slot>>,
    /// resolved path -> keys that resolved to it
    reverse_index: RwLock<HashMap<PathBuf, HashSet<ResolveKey>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResolveCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached value for `key`, if one is stored.
    #[must_use]
    pub fn get(&self, key: &ResolveKey) -> Option<ResolvedPath> {
        let slot = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()?;
        let value = slot.lock().unwrap_or_else(PoisonError::into_inner).clone();
        value
    }

    /// Return the cached value for `key`, or run `resolve` and store its
    /// success.
    ///
    /// Concurrent callers for the same key run `resolve` at most once between
    /// them; callers for different keys never wait on each other.
    pub fn get_or_resolve<E>(
        &self,
        key: &ResolveKey,
        resolve: impl FnOnce() -> Result<ResolvedPath, E>,
    ) -> Result<ResolvedPath, E> {
        let slot = self.slot(key);
        let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(hit) = guard.as_ref() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(hit.clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let resolved = match resolve() {
            Ok(resolved) => resolved,
            Err(e) => {
                drop(guard);
                self.remove_empty_slot(key, &slot);
                return Err(e);
            }
        };
        *guard = Some(resolved.clone());
        drop(guard);

        self.reverse_index
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(resolved.absolute_path.clone())
            .or_default()
            .insert(key.clone());

        Ok(resolved)
    }

    fn slot(&self, key: &ResolveKey) -> Slot {
        if let Some(slot) = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
        {
            return Arc::clone(slot);
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(entries.entry(key.clone()).or_default())
    }

    /// Forget `key` after a failed lookup, unless another caller has since
    /// filled or replaced its slot.
    fn remove_empty_slot(&self, key: &ResolveKey, slot: &Slot) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let Some(current) = entries.get(key) else {
            return;
        };
        if !Arc::ptr_eq(current, slot) {
            return;
        }
        // A locked slot belongs to a caller still resolving; it owns cleanup.
        let empty = match current.try_lock() {
            Ok(value) => value.is_none(),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().is_none(),
            Err(TryLockError::WouldBlock) => false,
        };
        if empty {
            entries.remove(key);
        }
    }

    /// Drop every entry that resolved to `path`.
    ///
    /// Returns the number of entries invalidated.
    pub fn invalidate_path(&self, path: &Path) -> usize {
        let keys = self
            .reverse_index
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path)
            .unwrap_or_default();

        let count = keys.len();
        if count > 0 {
            debug!(path = %path.display(), count, "Invalidating cache entries for path");

            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            for key in &keys {
                entries.remove(key);
            }
        }

        count
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let index = self.reverse_index.read().unwrap_or_else(PoisonError::into_inner);
        CacheStats {
            entry_count: entries.len(),
            reverse_index_paths: index.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Clear all cache entries.
    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut index = self.reverse_index.write().unwrap_or_else(PoisonError::into_inner);
        entries.clear();
        index.clear();
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entry_count: usize,
    pub reverse_index_paths: usize,
    pub hits: u64,
    pub misses: u64,
}
