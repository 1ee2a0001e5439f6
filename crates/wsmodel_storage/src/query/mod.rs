//! Declarative queries over snapshots and their memoized results.
//!
//! A [`Query`] starts from the entities of one type and is refined with
//! `map`, `filter` and `flat_map`. Its result is the concatenation of every
//! entity's contribution, in entity order, which is what lets a snapshot
//! update a cached result by recomputing only the entities that changed.
//!
//! ```text
//! let names = Query::entities(module).map(|m| m.get("name").cloned());
//! let result = snapshot.cached(&names);
//! ```

mod cache;

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use wsmodel_foundation::{EntityId, EntityTypeId};

use crate::entity::Entity;
use crate::snapshot::Snapshot;
use crate::storage::EntityStorage;

pub use cache::CacheStats;
pub(crate) use cache::QueryCache;
use cache::{CacheEntry, Erased, GroupedEntry};

static NEXT_QUERY_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a constructed query, used as its cache key.
///
/// Every constructor and combinator produces a new id; clones share it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryId(u64);

impl QueryId {
    fn next() -> Self {
        Self(NEXT_QUERY_ID.fetch_add(1, Ordering::Relaxed))
    }
}

type Contribute<T> = dyn Fn(&Snapshot, &Entity) -> Vec<T> + Send + Sync;

// =============================================================================
// Query
// =============================================================================

/// A derived query over the entities of one type.
pub struct Query<T> {
    id: QueryId,
    source: EntityTypeId,
    depends_on: Arc<[EntityTypeId]>,
    contribute: Arc<Contribute<T>>,
}

impl<T> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            source: self.source,
            depends_on: Arc::clone(&self.depends_on),
            contribute: Arc::clone(&self.contribute),
        }
    }
}

impl<T> fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("depends_on", &self.depends_on)
            .finish_non_exhaustive()
    }
}

impl Query<Entity> {
    /// All live entities of a type.
    #[must_use]
    pub fn entities(ty: EntityTypeId) -> Self {
        Self {
            id: QueryId::next(),
            source: ty,
            depends_on: Arc::from([]),
            contribute: Arc::new(|_: &Snapshot, entity: &Entity| vec![entity.clone()]),
        }
    }
}

impl<T: Send + Sync + 'static> Query<T> {
    /// Returns the query's cache key.
    #[must_use]
    pub fn id(&self) -> QueryId {
        self.id
    }

    /// Returns the type the query iterates.
    #[must_use]
    pub fn source_type(&self) -> EntityTypeId {
        self.source
    }

    /// Returns the extra types the query reads.
    #[must_use]
    pub fn dependencies(&self) -> &[EntityTypeId] {
        &self.depends_on
    }

    fn derive<U>(&self, contribute: Arc<Contribute<U>>) -> Query<U> {
        Query {
            id: QueryId::next(),
            source: self.source,
            depends_on: Arc::clone(&self.depends_on),
            contribute,
        }
    }

    /// Transforms every element.
    #[must_use]
    pub fn map<U, F>(self, f: F) -> Query<U>
    where
        U: Send + Sync + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        let inner = Arc::clone(&self.contribute);
        self.derive(Arc::new(move |snapshot: &Snapshot, entity: &Entity| {
            inner(snapshot, entity).iter().map(&f).collect()
        }))
    }

    /// Keeps the elements matching a predicate.
    #[must_use]
    pub fn filter<F>(self, predicate: F) -> Query<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let inner = Arc::clone(&self.contribute);
        self.derive(Arc::new(move |snapshot: &Snapshot, entity: &Entity| {
            inner(snapshot, entity)
                .into_iter()
                .filter(|item| predicate(item))
                .collect()
        }))
    }

    /// Expands every element into any number of elements.
    ///
    /// The closure may read the snapshot. Entity types it reads besides the
    /// source type must be declared with [`Query::depends_on`].
    #[must_use]
    pub fn flat_map<U, F>(self, f: F) -> Query<U>
    where
        U: Send + Sync + 'static,
        F: Fn(&Snapshot, &T) -> Vec<U> + Send + Sync + 'static,
    {
        let inner = Arc::clone(&self.contribute);
        self.derive(Arc::new(move |snapshot: &Snapshot, entity: &Entity| {
            inner(snapshot, entity)
                .iter()
                .flat_map(|item| f(snapshot, item))
                .collect()
        }))
    }

    /// Declares that the query reads entities of `ty`.
    ///
    /// Any change to an entity of `ty` recomputes the whole result.
    #[must_use]
    pub fn depends_on(self, ty: EntityTypeId) -> Query<T> {
        let mut depends_on = self.depends_on.to_vec();
        if !depends_on.contains(&ty) {
            depends_on.push(ty);
        }
        Query {
            id: QueryId::next(),
            source: self.source,
            depends_on: depends_on.into(),
            contribute: self.contribute,
        }
    }

    /// Groups elements by key.
    #[must_use]
    pub fn group_by<K, V, FK, FV>(self, key: FK, value: FV) -> GroupedQuery<K, V>
    where
        K: Send + Sync + 'static,
        V: Send + Sync + 'static,
        FK: Fn(&T) -> K + Send + Sync + 'static,
        FV: Fn(&T) -> V + Send + Sync + 'static,
    {
        GroupedQuery {
            id: QueryId::next(),
            pairs: self.map(move |item| (key(item), value(item))),
        }
    }

    fn contributions(&self, snapshot: &Snapshot) -> im::OrdMap<EntityId, Arc<Vec<T>>> {
        snapshot
            .entities(self.source)
            .filter_map(|entity| {
                let items = (self.contribute)(snapshot, &entity);
                (!items.is_empty()).then(|| (entity.id(), Arc::new(items)))
            })
            .collect()
    }
}

impl<T: Clone + Send + Sync + 'static> Query<T> {
    /// Computes the result from scratch, bypassing every cache.
    #[must_use]
    pub fn compute(&self, snapshot: &Snapshot) -> Vec<T> {
        snapshot
            .entities(self.source)
            .flat_map(|entity| (self.contribute)(snapshot, &entity))
            .collect()
    }
}

struct QueryState<T> {
    contributions: im::OrdMap<EntityId, Arc<Vec<T>>>,
    result: Arc<Vec<T>>,
}

impl<T: Clone> QueryState<T> {
    fn new(contributions: im::OrdMap<EntityId, Arc<Vec<T>>>) -> Self {
        let result = contributions
            .values()
            .flat_map(|items| items.iter().cloned())
            .collect();
        Self {
            contributions,
            result: Arc::new(result),
        }
    }
}

// =============================================================================
// Grouped Query
// =============================================================================

/// A query whose result is grouped by key.
pub struct GroupedQuery<K, V> {
    id: QueryId,
    pairs: Query<(K, V)>,
}

impl<K, V> Clone for GroupedQuery<K, V> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            pairs: self.pairs.clone(),
        }
    }
}

impl<K, V> fmt::Debug for GroupedQuery<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupedQuery")
            .field("id", &self.id)
            .field("pairs", &self.pairs)
            .finish()
    }
}

impl<K, V> GroupedQuery<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Returns the query's cache key.
    #[must_use]
    pub fn id(&self) -> QueryId {
        self.id
    }

    /// Computes the grouped result from scratch.
    #[must_use]
    pub fn compute(&self, snapshot: &Snapshot) -> HashMap<K, Vec<V>> {
        group(&self.pairs.compute(snapshot))
    }
}

fn group<K, V>(pairs: &[(K, V)]) -> HashMap<K, Vec<V>>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    let mut groups: HashMap<K, Vec<V>> = HashMap::new();
    for (key, value) in pairs {
        groups.entry(key.clone()).or_default().push(value.clone());
    }
    groups
}

// =============================================================================
// Caching
// =============================================================================

/// A query whose result a [`Snapshot`] can memoize.
pub trait CachedQuery {
    /// The result type.
    type Output: Send + Sync + 'static;

    /// Returns the memoized result for `snapshot`, computing what is missing.
    fn cached_in(&self, snapshot: &Snapshot) -> Arc<Self::Output>;
}

impl<T: Clone + Send + Sync + 'static> CachedQuery for Query<T> {
    type Output = Vec<T>;

    fn cached_in(&self, snapshot: &Snapshot) -> Arc<Vec<T>> {
        if !snapshot.config().query_cache.enabled {
            return Arc::new(self.compute(snapshot));
        }

        // The lock is released while computing: contributions may read
        // other cached queries of the same snapshot.
        let entry = snapshot.query_cache().lock().lookup(self.id);
        let known = entry
            .filter(|e| !e.stale)
            .and_then(|e| Some((e.pending.clone(), Arc::clone(&e.state).downcast::<QueryState<T>>().ok()?)));

        let (state, incremental) = match known {
            Some((pending, state)) if pending.is_empty() => {
                snapshot.query_cache().lock().record_hit();
                return Arc::clone(&state.result);
            }
            Some((pending, state)) => {
                let mut contributions = state.contributions.clone();
                for id in &pending {
                    let items = snapshot
                        .entity(*id)
                        .map(|entity| (self.contribute)(snapshot, &entity))
                        .unwrap_or_default();
                    if items.is_empty() {
                        contributions.remove(id);
                    } else {
                        contributions.insert(*id, Arc::new(items));
                    }
                }
                (QueryState::new(contributions), true)
            }
            None => (QueryState::new(self.contributions(snapshot)), false),
        };

        let result = Arc::clone(&state.result);
        let mut cache = snapshot.query_cache().lock();
        if incremental {
            cache.record_incremental();
        } else {
            cache.record_full();
        }
        let state: Erased = Arc::new(state);
        cache.store(
            self.id,
            CacheEntry::fresh(self.source, Arc::clone(&self.depends_on), state),
        );
        result
    }
}

impl<K, V> CachedQuery for GroupedQuery<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    type Output = HashMap<K, Vec<V>>;

    fn cached_in(&self, snapshot: &Snapshot) -> Arc<HashMap<K, Vec<V>>> {
        let pairs = self.pairs.cached_in(snapshot);
        if !snapshot.config().query_cache.enabled {
            return Arc::new(group(&pairs));
        }

        let memo = snapshot.query_cache().lock().lookup_grouped(self.id);
        if let Some(memo) = memo {
            let same_pairs = Arc::clone(&memo.pairs)
                .downcast::<Vec<(K, V)>>()
                .is_ok_and(|p| Arc::ptr_eq(&p, &pairs));
            if let (true, Ok(result)) = (same_pairs, memo.result.downcast::<HashMap<K, Vec<V>>>()) {
                return result;
            }
        }

        let result = Arc::new(group(&pairs));
        let pairs: Erased = pairs;
        let erased: Erased = Arc::clone(&result) as Erased;
        snapshot
            .query_cache()
            .lock()
            .store_grouped(self.id, GroupedEntry { pairs, result: erased });
        result
    }
}
