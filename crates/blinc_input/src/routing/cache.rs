//! LRU cache of built routes

use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use blinc_core::tree::ElementId;
use lru::LruCache;
use parking_lot::Mutex;
use rustc_hash::FxHasher;

use super::definition::RoutedEventId;
use super::route::EventRoute;

/// Default route lifetime
pub const DEFAULT_ROUTE_TTL: Duration = Duration::from_secs(600);

/// Default number of cached routes
pub const DEFAULT_ROUTE_CAPACITY: usize = 256;

/// Cache key: target, hit path and routed event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RouteKey {
    pub target: ElementId,
    /// Hash of the supplied hit path, zero for parent-walk routes
    pub path_hash: u64,
    pub event: RoutedEventId,
}

impl RouteKey {
    pub fn new(target: ElementId, hit_path: Option<&[ElementId]>, event: RoutedEventId) -> Self {
        let path_hash = hit_path.map_or(0, |path| {
            let mut hasher = FxHasher::default();
            path.hash(&mut hasher);
            hasher.finish()
        });
        Self {
            target,
            path_hash,
            event,
        }
    }
}

/// Route cache counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RouteCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub len: usize,
}

struct CachedRoute {
    route: EventRoute,
    inserted: Instant,
}

/// Route cache with time-based expiry and LRU eviction
pub struct RouteCache {
    routes: Mutex<LruCache<RouteKey, CachedRoute>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl std::fmt::Debug for RouteCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteCache")
            .field("ttl", &self.ttl)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Default for RouteCache {
    fn default() -> Self {
        Self::new(DEFAULT_ROUTE_CAPACITY, DEFAULT_ROUTE_TTL)
    }
}

impl RouteCache {
    /// Capacity is clamped to at least one entry
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            routes: Mutex::new(LruCache::new(capacity)),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &RouteKey) -> Option<EventRoute> {
        let mut routes = self.routes.lock();
        let expired = match routes.get(key) {
            Some(cached) if cached.inserted.elapsed() < self.ttl => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(cached.route.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            routes.pop(key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn insert(&self, key: RouteKey, route: EventRoute) {
        let cached = CachedRoute {
            route,
            inserted: Instant::now(),
        };
        if let Some((evicted, _)) = self.routes.lock().push(key, cached) {
            if evicted != key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Drop every cached route
    pub fn clear(&self) {
        self.routes.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.routes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> RouteCacheStats {
        RouteCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            len: self.len(),
        }
    }
}
