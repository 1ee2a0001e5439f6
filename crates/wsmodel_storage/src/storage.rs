//! Storage state shared by snapshots and builders, and the read API over it.

use std::sync::Arc;

use wsmodel_foundation::{EntityId, EntityTypeId, SymbolicId};

use crate::config::StoreConfig;
use crate::entity::Entity;
use crate::index::EntityIndex;
use crate::mapping::{ExternalMapping, ExternalMappingKey};
use crate::orphanage::Orphanage;
use crate::schema::TypeRegistry;

/// The complete state of a storage.
///
/// Every field is a persistent structure, so cloning is O(1) and a clone
/// shares all unchanged structure with its origin.
#[derive(Clone)]
pub struct StorageData {
    pub(crate) registry: Arc<TypeRegistry>,
    pub(crate) config: StoreConfig,
    pub(crate) index: EntityIndex,
    pub(crate) mappings: im::OrdMap<ExternalMappingKey, ExternalMapping>,
    pub(crate) orphanage: Orphanage,
}

impl StorageData {
    pub(crate) fn empty(registry: Arc<TypeRegistry>, config: StoreConfig) -> Self {
        Self {
            registry,
            config,
            index: EntityIndex::default(),
            mappings: im::OrdMap::new(),
            orphanage: Orphanage::default(),
        }
    }

    /// Returns the type registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Returns the store configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Iterates live entities of a type in insertion-stable order.
    pub fn entities(&self, ty: EntityTypeId) -> impl Iterator<Item = Entity> + '_ {
        self.index
            .iter_type(ty)
            .map(|(id, data)| Entity::new(id, Arc::clone(data)))
    }

    /// Gets an entity by id.
    #[must_use]
    pub fn entity(&self, id: EntityId) -> Option<Entity> {
        self.index.get(id).map(|data| Entity::new(id, Arc::clone(data)))
    }

    /// Returns true if the entity exists.
    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.index.contains(id)
    }

    /// Returns the number of live entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.index.len()
    }

    /// Returns the number of live entities of a type.
    #[must_use]
    pub fn count(&self, ty: EntityTypeId) -> usize {
        self.index.count(ty)
    }

    /// Resolves a symbolic id. Unknown ids resolve to `None`.
    #[must_use]
    pub fn resolve(&self, sid: &SymbolicId) -> Option<Entity> {
        self.index.resolve(sid).and_then(|id| self.entity(id))
    }

    /// Iterates entities of type `ty` holding a soft reference to `sid`.
    ///
    /// Referrers are reported whether or not `sid` currently resolves.
    pub fn referrers<'a>(&'a self, sid: &SymbolicId, ty: EntityTypeId) -> impl Iterator<Item = Entity> + 'a {
        self.index
            .referrers(sid, ty)
            .filter_map(move |id| self.entity(id))
    }

    /// Iterates the children of `parent` of type `child_type`.
    pub fn children(&self, parent: EntityId, child_type: EntityTypeId) -> impl Iterator<Item = Entity> + '_ {
        self.index
            .children(parent)
            .filter(move |id| id.type_id == child_type)
            .filter_map(move |id| self.entity(id))
    }

    /// Returns the parent stored in a hard reference field.
    #[must_use]
    pub fn parent(&self, child: EntityId, field: &str) -> Option<Entity> {
        let data = self.index.get(child)?;
        let parent = data.attributes.get(field)?.as_entity()?;
        self.entity(parent)
    }

    /// Returns an external mapping table, if one was ever written.
    #[must_use]
    pub fn external_mapping(&self, key: &ExternalMappingKey) -> Option<&ExternalMapping> {
        self.mappings.get(key)
    }

    /// Iterates the keys of every external mapping table.
    pub fn external_mapping_keys(&self) -> impl Iterator<Item = &ExternalMappingKey> {
        self.mappings.keys()
    }

    /// Returns the entities parked in the orphanage.
    #[must_use]
    pub fn orphans(&self) -> &Orphanage {
        &self.orphanage
    }

    /// Structural equality of entities, orphanage and external mappings.
    ///
    /// Allocator state, generations and query caches are ignored, as are
    /// empty mapping tables.
    #[must_use]
    pub fn content_eq(&self, other: &StorageData) -> bool {
        let non_empty = |m: &im::OrdMap<ExternalMappingKey, ExternalMapping>| {
            m.iter()
                .filter(|(_, table)| !table.is_empty())
                .map(|(k, table)| (k.clone(), table.clone()))
                .collect::<Vec<_>>()
        };
        self.index.entities_eq(&other.index)
            && self.orphanage == other.orphanage
            && non_empty(&self.mappings) == non_empty(&other.mappings)
    }
}

/// Read operations shared by [`Snapshot`](crate::Snapshot) and
/// [`Builder`](crate::Builder).
pub trait EntityStorage {
    /// Returns the underlying storage state.
    fn storage(&self) -> &StorageData;

    /// Returns the type registry.
    fn registry(&self) -> &Arc<TypeRegistry> {
        self.storage().registry()
    }

    /// Iterates live entities of a type in insertion-stable order.
    fn entities(&self, ty: EntityTypeId) -> impl Iterator<Item = Entity> + '_ {
        self.storage().entities(ty)
    }

    /// Gets an entity by id.
    fn entity(&self, id: EntityId) -> Option<Entity> {
        self.storage().entity(id)
    }

    /// Returns true if the entity exists.
    fn contains(&self, id: EntityId) -> bool {
        self.storage().contains(id)
    }

    /// Returns the number of live entities.
    fn entity_count(&self) -> usize {
        self.storage().entity_count()
    }

    /// Returns the number of live entities of a type.
    fn count(&self, ty: EntityTypeId) -> usize {
        self.storage().count(ty)
    }

    /// Resolves a symbolic id.
    fn resolve(&self, sid: &SymbolicId) -> Option<Entity> {
        self.storage().resolve(sid)
    }

    /// Iterates entities of type `ty` holding a soft reference to `sid`.
    fn referrers<'a>(&'a self, sid: &SymbolicId, ty: EntityTypeId) -> impl Iterator<Item = Entity> + 'a {
        self.storage().referrers(sid, ty)
    }

    /// Iterates the children of `parent` of type `child_type`.
    fn children(&self, parent: EntityId, child_type: EntityTypeId) -> impl Iterator<Item = Entity> + '_ {
        self.storage().children(parent, child_type)
    }

    /// Returns the parent stored in a hard reference field.
    fn parent(&self, child: EntityId, field: &str) -> Option<Entity> {
        self.storage().parent(child, field)
    }

    /// Returns an external mapping table.
    fn external_mapping(&self, key: &ExternalMappingKey) -> Option<&ExternalMapping> {
        self.storage().external_mapping(key)
    }

    /// Returns the entities parked in the orphanage.
    fn orphans(&self) -> &Orphanage {
        self.storage().orphans()
    }
}

impl EntityStorage for StorageData {
    fn storage(&self) -> &StorageData {
        self
    }
}
