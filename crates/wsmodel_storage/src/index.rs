//! Entity tables and the indices maintained alongside them.
//!
//! Per type: an ordered index to entity map, a symbolic id map, and a reverse
//! map from a referenced symbolic id to the entities holding a soft reference
//! to it. Across types: a back-edge map from a parent to its owned children.
//! Every add, replace and remove updates all of them in time proportional to
//! the edges of the entity involved.

use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use wsmodel_foundation::{EntityId, EntityTypeId, SymbolicId};

use crate::entity::EntityData;
use crate::schema::TypeRegistry;

/// Storage for one entity type.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub(crate) struct TypeTable {
    pub(crate) entities: im::OrdMap<u64, Arc<EntityData>>,
    pub(crate) by_symbolic: im::HashMap<SymbolicId, u64>,
    pub(crate) referrers: im::HashMap<SymbolicId, im::OrdSet<u64>>,
    pub(crate) next_index: u64,
}

/// All entity tables plus the cross-type children index.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub(crate) struct EntityIndex {
    tables: im::OrdMap<EntityTypeId, TypeTable>,
    children: im::HashMap<EntityId, im::OrdSet<EntityId>>,
}

impl EntityIndex {
    pub(crate) fn table(&self, ty: EntityTypeId) -> Option<&TypeTable> {
        self.tables.get(&ty)
    }

    fn table_mut(&mut self, ty: EntityTypeId) -> &mut TypeTable {
        self.tables.entry(ty).or_default()
    }

    pub(crate) fn get(&self, id: EntityId) -> Option<&Arc<EntityData>> {
        self.table(id.type_id)?.entities.get(&id.index)
    }

    pub(crate) fn contains(&self, id: EntityId) -> bool {
        self.get(id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.tables.values().map(|t| t.entities.len()).sum()
    }

    pub(crate) fn count(&self, ty: EntityTypeId) -> usize {
        self.table(ty).map_or(0, |t| t.entities.len())
    }

    pub(crate) fn types(&self) -> impl Iterator<Item = EntityTypeId> + '_ {
        self.tables.keys().copied()
    }

    pub(crate) fn iter_type(
        &self,
        ty: EntityTypeId,
    ) -> impl Iterator<Item = (EntityId, &Arc<EntityData>)> + '_ {
        self.table(ty)
            .into_iter()
            .flat_map(move |t| t.entities.iter().map(move |(index, data)| (EntityId::new(ty, *index), data)))
    }

    pub(crate) fn resolve(&self, sid: &SymbolicId) -> Option<EntityId> {
        let index = self.table(sid.type_id)?.by_symbolic.get(sid)?;
        Some(EntityId::new(sid.type_id, *index))
    }

    /// Entities of type `ty` holding a soft reference to `sid`.
    pub(crate) fn referrers<'a>(
        &'a self,
        sid: &SymbolicId,
        ty: EntityTypeId,
    ) -> impl Iterator<Item = EntityId> + 'a {
        self.table(ty)
            .and_then(|t| t.referrers.get(sid))
            .into_iter()
            .flat_map(move |set| set.iter().map(move |index| EntityId::new(ty, *index)))
    }

    /// Referrers of `sid` across every type.
    pub(crate) fn all_referrers(&self, sid: &SymbolicId) -> Vec<EntityId> {
        self.tables
            .iter()
            .flat_map(|(ty, table)| {
                table
                    .referrers
                    .get(sid)
                    .into_iter()
                    .flat_map(move |set| set.iter().map(move |index| EntityId::new(*ty, *index)))
            })
            .collect()
    }

    pub(crate) fn children(&self, parent: EntityId) -> impl Iterator<Item = EntityId> + '_ {
        self.children
            .get(&parent)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    /// Allocates a fresh id for type `ty`.
    pub(crate) fn allocate(&mut self, ty: EntityTypeId) -> EntityId {
        let table = self.table_mut(ty);
        let index = table.next_index;
        table.next_index += 1;
        EntityId::new(ty, index)
    }

    /// Makes sure `id` is never handed out by `allocate`.
    pub(crate) fn reserve(&mut self, id: EntityId) {
        let table = self.table_mut(id.type_id);
        if table.next_index <= id.index {
            table.next_index = id.index + 1;
        }
    }

    /// Inserts or replaces an entity and updates every index.
    pub(crate) fn insert(
        &mut self,
        registry: &TypeRegistry,
        id: EntityId,
        data: Arc<EntityData>,
    ) -> Option<Arc<EntityData>> {
        let previous = self.remove(registry, id);
        self.reserve(id);
        self.link(registry, id, &data);
        self.table_mut(id.type_id).entities.insert(id.index, data);
        previous
    }

    /// Removes an entity and its index entries.
    ///
    /// The entity's own children keep their back-edge entry, so callers
    /// can still walk them after the parent is gone.
    pub(crate) fn remove(&mut self, registry: &TypeRegistry, id: EntityId) -> Option<Arc<EntityData>> {
        let data = self.tables.get_mut(&id.type_id)?.entities.remove(&id.index)?;
        self.unlink(registry, id, &data);
        Some(data)
    }

    /// Drops the back-edge entry of a removed parent.
    pub(crate) fn forget_children(&mut self, parent: EntityId) {
        self.children.remove(&parent);
    }

    fn link(&mut self, registry: &TypeRegistry, id: EntityId, data: &EntityData) {
        if let Some(sid) = &data.symbolic_id {
            self.table_mut(id.type_id).by_symbolic.insert(sid.clone(), id.index);
        }
        let Some(entity_type) = registry.get(id.type_id) else {
            return;
        };
        for soft in &entity_type.soft_refs {
            if let Some(value) = data.attributes.get(&soft.name) {
                for target in value.symbolic_refs() {
                    self.table_mut(id.type_id)
                        .referrers
                        .entry(target)
                        .or_default()
                        .insert(id.index);
                }
            }
        }
        for parent in parents_of(registry, id, data) {
            self.children.entry(parent).or_default().insert(id);
        }
    }

    fn unlink(&mut self, registry: &TypeRegistry, id: EntityId, data: &EntityData) {
        if let Some(sid) = &data.symbolic_id {
            let table = self.table_mut(id.type_id);
            if table.by_symbolic.get(sid) == Some(&id.index) {
                table.by_symbolic.remove(sid);
            }
        }
        let Some(entity_type) = registry.get(id.type_id) else {
            return;
        };
        for soft in &entity_type.soft_refs {
            if let Some(value) = data.attributes.get(&soft.name) {
                for target in value.symbolic_refs() {
                    let table = self.table_mut(id.type_id);
                    if let Some(set) = table.referrers.get_mut(&target) {
                        set.remove(&id.index);
                        if set.is_empty() {
                            table.referrers.remove(&target);
                        }
                    }
                }
            }
        }
        for parent in parents_of(registry, id, data) {
            if let Some(set) = self.children.get_mut(&parent) {
                set.remove(&id);
                if set.is_empty() {
                    self.children.remove(&parent);
                }
            }
        }
    }

    /// Rebuilds every index from the entity tables alone.
    #[cfg(feature = "serde")]
    pub(crate) fn rebuilt(&self, registry: &TypeRegistry) -> EntityIndex {
        let mut fresh = EntityIndex::default();
        for (ty, table) in &self.tables {
            for (index, data) in &table.entities {
                fresh.insert(registry, EntityId::new(*ty, *index), data.clone());
            }
            fresh.table_mut(*ty).next_index = table.next_index;
        }
        fresh
    }

    /// Iterates every stored entity.
    #[cfg(feature = "serde")]
    pub(crate) fn iter(&self) -> impl Iterator<Item = (EntityId, &Arc<EntityData>)> + '_ {
        self.tables.iter().flat_map(|(ty, table)| {
            table
                .entities
                .iter()
                .map(move |(index, data)| (EntityId::new(*ty, *index), data))
        })
    }

    /// Structural equality of the entity tables, ignoring indices and
    /// allocator counters.
    pub(crate) fn entities_eq(&self, other: &EntityIndex) -> bool {
        let types: std::collections::BTreeSet<_> = self.types().chain(other.types()).collect();
        types.into_iter().all(|ty| match (self.table(ty), other.table(ty)) {
            (Some(a), Some(b)) => a.entities == b.entities,
            (Some(t), None) | (None, Some(t)) => t.entities.is_empty(),
            (None, None) => true,
        })
    }
}

/// Parent ids stored in the hard reference fields of an entity.
pub(crate) fn parents_of(
    registry: &TypeRegistry,
    id: EntityId,
    data: &EntityData,
) -> Vec<EntityId> {
    registry.get(id.type_id).map_or_else(Vec::new, |entity_type| {
        entity_type
            .parents
            .iter()
            .filter_map(|p| data.attributes.get(&p.name).and_then(|v| v.as_entity()))
            .collect()
    })
}
