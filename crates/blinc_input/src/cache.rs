//! Versioned per-element caches
//!
//! Each entry is stamped with the cache version current at insertion. A read
//! only returns the value if its stamp still matches, so
//! [`VersionedCache::invalidate_all`] is an O(1) version bump. Per-element
//! invalidation removes the entry outright.
//!
//! The caches are not synchronized. Tree mutation and invalidation must be
//! serialized with queries by the owner (the hit-test engine lives behind
//! the pipeline's dispatch lock for this reason).

use blinc_core::geometry::{Affine2D, Rect};
use blinc_core::tree::ElementId;
use rustc_hash::FxHashMap;

#[derive(Clone, Copy, Debug)]
struct Stamped<T> {
    value: T,
    version: u64,
}

/// Cache hit/miss counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Element-keyed cache with O(1) bulk invalidation
#[derive(Debug)]
pub struct VersionedCache<T> {
    entries: FxHashMap<ElementId, Stamped<T>>,
    version: u64,
    stats: CacheStats,
}

impl<T> Default for VersionedCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> VersionedCache<T> {
    pub fn new() -> Self {
        Self {
            entries: FxHashMap::default(),
            version: 1,
            stats: CacheStats::default(),
        }
    }

    /// Current global version
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Store a value stamped with the current version
    pub fn insert(&mut self, element: ElementId, value: T) {
        self.entries.insert(
            element,
            Stamped {
                value,
                version: self.version,
            },
        );
    }

    /// Invalidate every entry
    pub fn invalidate_all(&mut self) {
        self.version += 1;
        // Stale entries are never readable again; drop them once the map grows
        // large so long sessions don't accumulate dead keys.
        if self.entries.len() > 4096 {
            let version = self.version;
            self.entries.retain(|_, e| e.version == version);
        }
    }

    /// Invalidate a single element
    pub fn invalidate(&mut self, element: ElementId) {
        self.entries.remove(&element);
    }

    /// Number of stored entries, including stale ones
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}

impl<T: Copy> VersionedCache<T> {
    /// Read a value if it was stored at the current version
    pub fn get(&mut self, element: ElementId) -> Option<T> {
        match self.entries.get(&element) {
            Some(entry) if entry.version == self.version => {
                self.stats.hits += 1;
                Some(entry.value)
            }
            _ => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Read a value without touching the counters
    pub fn peek(&self, element: ElementId) -> Option<T> {
        self.entries
            .get(&element)
            .filter(|e| e.version == self.version)
            .map(|e| e.value)
    }

    /// Read or compute and store
    pub fn get_or_insert_with<F>(&mut self, element: ElementId, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        if let Some(value) = self.get(element) {
            return value;
        }
        let value = f();
        self.insert(element, value);
        value
    }
}

/// Element → global (root space) transform
pub type TransformCache = VersionedCache<Affine2D>;

/// Element → global axis-aligned bounds
pub type BoundsCache = VersionedCache<Rect>;
