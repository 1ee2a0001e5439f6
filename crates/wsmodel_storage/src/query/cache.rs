//! Per-snapshot memo of query results.
//!
//! Entries are type-erased. Each holds the per-entity contributions of one
//! query plus the ids whose contributions are out of date. Sealing a builder
//! hands the base snapshot's entries to the new snapshot together with the
//! builder's changed ids.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;
use wsmodel_foundation::{EntityId, EntityTypeId};

use crate::config::QueryCacheConfig;

use super::QueryId;

/// Counters describing how a snapshot's query cache has been used.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served without recomputation.
    pub hits: u64,
    /// Lookups that recomputed only changed entities.
    pub incremental_updates: u64,
    /// Lookups that recomputed every entity.
    pub full_computes: u64,
    /// Times the whole cache was dropped, because too much changed or by
    /// `invalidate_all`.
    pub resets: u64,
    /// Entries currently held.
    pub entries: usize,
}

pub(crate) type Erased = Arc<dyn Any + Send + Sync>;

// =============================================================================
// Entries
// =============================================================================

#[derive(Clone)]
pub(crate) struct CacheEntry {
    pub(crate) source: EntityTypeId,
    pub(crate) depends_on: Arc<[EntityTypeId]>,
    pub(crate) state: Erased,
    pub(crate) pending: im::OrdSet<EntityId>,
    pub(crate) stale: bool,
}

impl CacheEntry {
    pub(crate) fn fresh(source: EntityTypeId, depends_on: Arc<[EntityTypeId]>, state: Erased) -> Self {
        Self {
            source,
            depends_on,
            state,
            pending: im::OrdSet::new(),
            stale: false,
        }
    }

    fn absorb(&mut self, changed: &[EntityId]) {
        if self.stale {
            return;
        }
        if changed.iter().any(|id| self.depends_on.contains(&id.type_id)) {
            self.stale = true;
            self.pending = im::OrdSet::new();
            return;
        }
        for id in changed.iter().filter(|id| id.type_id == self.source) {
            self.pending.insert(*id);
        }
    }
}

#[derive(Clone)]
pub(crate) struct GroupedEntry {
    pub(crate) pairs: Erased,
    pub(crate) result: Erased,
}

// =============================================================================
// Cache
// =============================================================================

#[derive(Clone, Default)]
pub(crate) struct QueryCache {
    entries: HashMap<QueryId, CacheEntry>,
    grouped: HashMap<QueryId, GroupedEntry>,
    stats: CacheStats,
}

impl QueryCache {
    pub(crate) fn lookup(&self, id: QueryId) -> Option<CacheEntry> {
        self.entries.get(&id).cloned()
    }

    pub(crate) fn store(&mut self, id: QueryId, entry: CacheEntry) {
        self.entries.insert(id, entry);
    }

    pub(crate) fn lookup_grouped(&self, id: QueryId) -> Option<GroupedEntry> {
        self.grouped.get(&id).cloned()
    }

    pub(crate) fn store_grouped(&mut self, id: QueryId, entry: GroupedEntry) {
        self.grouped.insert(id, entry);
    }

    pub(crate) fn record_hit(&mut self) {
        self.stats.hits += 1;
    }

    pub(crate) fn record_incremental(&mut self) {
        self.stats.incremental_updates += 1;
    }

    pub(crate) fn record_full(&mut self) {
        self.stats.full_computes += 1;
    }

    pub(crate) fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            ..self.stats
        }
    }

    /// Drops every entry and flags the cache as reset.
    pub(crate) fn invalidate_all(&mut self) {
        self.entries.clear();
        self.grouped.clear();
        self.stats.resets += 1;
    }

    /// Builds the cache for a snapshot sealed from a builder whose changed
    /// ids are `changed`.
    ///
    /// If any entry would then hold more pending ids than the configured
    /// threshold, the new cache starts empty and counts one reset.
    pub(crate) fn transfer(&self, changed: &[EntityId], config: &QueryCacheConfig) -> QueryCache {
        let mut next = QueryCache {
            grouped: self.grouped.clone(),
            ..QueryCache::default()
        };
        if !config.enabled {
            return next;
        }
        for (id, entry) in &self.entries {
            let mut entry = entry.clone();
            entry.absorb(changed);
            if entry.pending.len() > config.incremental_threshold {
                warn!(
                    query = id.0,
                    pending = entry.pending.len(),
                    threshold = config.incremental_threshold,
                    "query cache reset"
                );
                let mut reset = QueryCache::default();
                reset.stats.resets = 1;
                return reset;
            }
            next.entries.insert(*id, entry);
        }
        next
    }
}
