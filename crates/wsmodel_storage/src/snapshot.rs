//! Immutable, shareable storage state.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::builder::Builder;
use crate::config::StoreConfig;
use crate::query::{CacheStats, CachedQuery, QueryCache};
use crate::schema::TypeRegistry;
use crate::storage::{EntityStorage, StorageData};

/// An immutable storage state.
///
/// Clone is O(1): snapshots are shared by every holder and never mutated.
/// Edits go through a [`Builder`] created with [`Snapshot::to_builder`].
#[derive(Clone)]
pub struct Snapshot {
    inner: Arc<SnapshotInner>,
}

struct SnapshotInner {
    data: StorageData,
    generation: u64,
    cache: Mutex<QueryCache>,
}

impl Snapshot {
    /// Creates an empty snapshot with the default configuration.
    #[must_use]
    pub fn empty(registry: Arc<TypeRegistry>) -> Self {
        Self::empty_with_config(registry, StoreConfig::default())
    }

    /// Creates an empty snapshot with the given configuration.
    #[must_use]
    pub fn empty_with_config(registry: Arc<TypeRegistry>, config: StoreConfig) -> Self {
        Self::sealed(StorageData::empty(registry, config), 0, QueryCache::default())
    }

    pub(crate) fn sealed(data: StorageData, generation: u64, cache: QueryCache) -> Self {
        Self {
            inner: Arc::new(SnapshotInner {
                data,
                generation,
                cache: Mutex::new(cache),
            }),
        }
    }

    /// Creates a builder layered on this snapshot.
    #[must_use]
    pub fn to_builder(&self) -> Builder {
        Builder::from_snapshot(self)
    }

    /// Returns the generation: 0 for an empty snapshot, one more than the
    /// base's for a sealed builder.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    /// Returns the store configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        self.inner.data.config()
    }

    /// Returns the memoized result of a query.
    ///
    /// The result always equals what the query computes from scratch.
    pub fn cached<Q: CachedQuery>(&self, query: &Q) -> Arc<Q::Output> {
        query.cached_in(self)
    }

    /// Returns the query cache counters.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.lock().stats()
    }

    /// Returns true if any query cache entry was dropped for this snapshot.
    #[must_use]
    pub fn was_reset(&self) -> bool {
        self.cache_stats().resets > 0
    }

    /// Drops every query cache entry.
    pub fn invalidate_all(&self) {
        self.inner.cache.lock().invalidate_all();
    }

    /// Structural equality of entities, orphanage and external mappings.
    #[must_use]
    pub fn content_eq(&self, other: &Snapshot) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) || self.inner.data.content_eq(&other.inner.data)
    }

    /// Returns true if both handles share the same snapshot.
    #[must_use]
    pub fn ptr_eq(&self, other: &Snapshot) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn query_cache(&self) -> &Mutex<QueryCache> {
        &self.inner.cache
    }
}

impl EntityStorage for Snapshot {
    fn storage(&self) -> &StorageData {
        &self.inner.data
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("generation", &self.inner.generation)
            .field("entities", &self.inner.data.entity_count())
            .field("orphans", &self.inner.data.orphans().len())
            .finish()
    }
}
