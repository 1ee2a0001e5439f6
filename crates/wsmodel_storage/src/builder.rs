//! Mutable overlay on a snapshot.
//!
//! A `Builder` owns a clone of its base snapshot's storage state. Because every
//! table is a persistent map the clone is O(1), and each edit copies only the
//! path it touches. The builder records which entity ids it touched, in
//! first-touch order, so sealing and diffing cost time proportional to the
//! number of changes rather than the size of the store.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace, warn};
use wsmodel_foundation::{EntityId, EntitySource, EntityTypeId, Error, Result, SymbolicId, Value};

use crate::config::StoreConfig;
use crate::entity::{Attributes, Entity, EntityData, EntityEditor};
use crate::mapping::{ExternalMapping, ExternalMappingKey};
use crate::orphanage::Orphan;
use crate::schema::{EntityType, OnDelete, TypeRegistry};
use crate::snapshot::Snapshot;
use crate::storage::{EntityStorage, StorageData};

// =============================================================================
// Change Log
// =============================================================================

/// What a builder changed relative to its base snapshot.
#[derive(Clone, Debug, Default)]
pub(crate) struct ChangeLog {
    touched: Vec<EntityId>,
    seen: HashSet<EntityId>,
    mapping_edits: Vec<(ExternalMappingKey, EntityId)>,
    mapping_seen: HashSet<(ExternalMappingKey, EntityId)>,
    orphanage_changed: bool,
}

impl ChangeLog {
    fn touch(&mut self, id: EntityId) {
        if self.seen.insert(id) {
            self.touched.push(id);
        }
    }

    fn record_mapping(&mut self, key: &ExternalMappingKey, id: EntityId) {
        if self.mapping_seen.insert((key.clone(), id)) {
            self.mapping_edits.push((key.clone(), id));
        }
    }

    /// Entity ids added, modified or removed, in first-touch order.
    pub(crate) fn touched(&self) -> &[EntityId] {
        &self.touched
    }

    /// External mapping entries written or cleared, in first-touch order.
    pub(crate) fn mapping_edits(&self) -> &[(ExternalMappingKey, EntityId)] {
        &self.mapping_edits
    }

    fn is_empty(&self) -> bool {
        self.touched.is_empty() && self.mapping_edits.is_empty() && !self.orphanage_changed
    }
}

// =============================================================================
// Builder
// =============================================================================

/// A single-writer overlay used to produce the next [`Snapshot`].
///
/// Builders created from the same snapshot are isolated from each other and
/// from the snapshot. They are reconciled only through
/// [`Builder::apply_changes_from`] and [`Builder::replace_by_source`].
pub struct Builder {
    pub(crate) base: Snapshot,
    pub(crate) data: StorageData,
    pub(crate) log: ChangeLog,
}

/// Parent fields after resolution, plus the parent an orphan waits for.
struct ResolvedParents {
    attributes: Attributes,
    source: EntitySource,
    waiting_for: Option<(Arc<str>, SymbolicId)>,
}

impl Builder {
    /// Creates a builder over an empty storage.
    #[must_use]
    pub fn create(registry: Arc<TypeRegistry>) -> Self {
        Snapshot::empty(registry).to_builder()
    }

    /// Creates a builder over an empty storage with the given configuration.
    #[must_use]
    pub fn with_config(registry: Arc<TypeRegistry>, config: StoreConfig) -> Self {
        Snapshot::empty_with_config(registry, config).to_builder()
    }

    pub(crate) fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            base: snapshot.clone(),
            data: snapshot.storage().clone(),
            log: ChangeLog::default(),
        }
    }

    /// Returns the snapshot this builder was created from.
    #[must_use]
    pub fn base(&self) -> &Snapshot {
        &self.base
    }

    /// Returns true if any entity, mapping entry or orphan was touched.
    ///
    /// A change that was later reverted still counts; use
    /// [`Builder::collect_changes`] for the net effect.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.log.is_empty()
    }

    /// Seals the builder into a new snapshot.
    ///
    /// The builder stays usable. The new snapshot inherits the base
    /// snapshot's query cache, with every touched id queued for
    /// recomputation.
    #[must_use]
    pub fn to_snapshot(&self) -> Snapshot {
        let cache = self
            .base
            .query_cache()
            .lock()
            .transfer(self.log.touched(), &self.data.config.query_cache);
        let generation = self.base.generation() + 1;
        debug!(
            generation,
            changed = self.log.touched().len(),
            entities = self.data.entity_count(),
            "builder sealed"
        );
        Snapshot::sealed(self.data.clone(), generation, cache)
    }

    /// Runs `edit`, putting the builder back as it was if it fails.
    pub(crate) fn atomically<T, F>(&mut self, edit: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let data = self.data.clone();
        let log = self.log.clone();
        let result = edit(self);
        if let Err(err) = &result {
            debug!(error = %err, "edit rolled back");
            self.data = data;
            self.log = log;
        }
        result
    }

    // =========================================================================
    // Adding
    // =========================================================================

    /// Adds an entity.
    ///
    /// Parent fields may hold an [`EntityId`] or the parent's symbolic id. An
    /// entity added with [`EntitySource::Orphan`] whose cascading parent does
    /// not resolve yet is parked in the orphanage instead; the returned
    /// entity then carries its reserved id but is not live until adopted.
    ///
    /// # Errors
    ///
    /// Returns `SchemaViolation` if the attributes do not match the schema,
    /// `DuplicateSymbolicId` if another entity of the type has the same
    /// symbolic id, and `DanglingHardReference` if a parent does not exist.
    pub fn add_entity<I, K, V>(&mut self, ty: EntityTypeId, attributes: I, source: EntitySource) -> Result<Entity>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Arc<str>>,
        V: Into<Value>,
    {
        let attributes: Attributes = attributes
            .into_iter()
            .map(|(name, value)| (name.into(), value.into()))
            .collect();
        self.add_with_id(ty, attributes, source, None)
    }

    /// Adds an entity, keeping `preferred` as its id when it is free.
    pub(crate) fn add_with_id(
        &mut self,
        ty: EntityTypeId,
        attributes: Attributes,
        source: EntitySource,
        preferred: Option<EntityId>,
    ) -> Result<Entity> {
        let registry = Arc::clone(&self.data.registry);
        let entity_type = registry.require(ty)?;
        let resolved = self.resolve_parents(entity_type, attributes, source, true)?;

        if let Some((field, parent)) = resolved.waiting_for {
            return self.park(ty, field, parent, resolved.attributes, resolved.source, preferred);
        }

        let attributes = registry.validate(ty, resolved.attributes)?;
        let symbolic_id = registry.compute_symbolic_id(ty, &attributes);
        if let Some(sid) = &symbolic_id {
            self.ensure_unclaimed(sid, None)?;
        }

        let id = match preferred {
            Some(id) if id.type_id == ty && !self.data.index.contains(id) => id,
            _ => self.data.index.allocate(ty),
        };
        let data = Arc::new(EntityData {
            source: resolved.source,
            attributes,
            symbolic_id,
        });
        self.data.index.insert(&registry, id, Arc::clone(&data));
        self.log.touch(id);
        trace!(entity = %id, "entity added");

        if let Some(sid) = &data.symbolic_id {
            self.adopt_orphans(sid);
        }
        Ok(Entity::new(id, data))
    }

    /// Resolves symbolic parent references and checks that parents exist.
    ///
    /// When `adding`, an unresolved cascading parent of an orphan-source
    /// entity is reported through `waiting_for` instead of failing.
    fn resolve_parents(
        &self,
        entity_type: &EntityType,
        mut attributes: Attributes,
        mut source: EntitySource,
        adding: bool,
    ) -> Result<ResolvedParents> {
        let mut waiting_for = None;
        let mut adopted_source = None;

        for parent in &entity_type.parents {
            let target = match attributes.get(&parent.name) {
                Some(Value::Symbolic(sid)) => {
                    if sid.type_id != parent.target {
                        return Err(Error::schema_violation(
                            entity_type.name(),
                            format!("{} cannot reference {sid}", parent.name),
                        ));
                    }
                    match self.data.index.resolve(sid) {
                        Some(id) => id,
                        None => {
                            let can_wait = adding
                                && source.is_orphan()
                                && self.data.config.orphanage_enabled
                                && parent.on_delete == OnDelete::Cascade
                                && waiting_for.is_none();
                            if !can_wait {
                                return Err(Error::dangling_hard_reference(&*parent.name, sid.to_string()));
                            }
                            waiting_for = Some((Arc::clone(&parent.name), sid.clone()));
                            continue;
                        }
                    }
                }
                Some(Value::EntityRef(id)) => {
                    if id.type_id != parent.target {
                        return Err(Error::schema_violation(
                            entity_type.name(),
                            format!("{} cannot reference {id}", parent.name),
                        ));
                    }
                    *id
                }
                _ => continue,
            };

            let Some(parent_data) = self.data.index.get(target) else {
                return Err(Error::dangling_hard_reference(&*parent.name, target.to_string()));
            };
            if adopted_source.is_none() {
                adopted_source = Some(parent_data.source.clone());
            }
            attributes = attributes.insert(Arc::clone(&parent.name), Value::EntityRef(target));
        }

        if source.is_orphan() && waiting_for.is_none() {
            if let Some(parent_source) = adopted_source {
                source = parent_source;
            }
        }

        Ok(ResolvedParents {
            attributes,
            source,
            waiting_for,
        })
    }

    fn park(
        &mut self,
        ty: EntityTypeId,
        field: Arc<str>,
        parent: SymbolicId,
        attributes: Attributes,
        source: EntitySource,
        preferred: Option<EntityId>,
    ) -> Result<Entity> {
        let registry = Arc::clone(&self.data.registry);
        // Validate with a stand-in parent; the field keeps the symbolic id.
        let stand_in = attributes.insert(
            Arc::clone(&field),
            Value::EntityRef(EntityId::new(parent.type_id, 0)),
        );
        let attributes = registry
            .validate(ty, stand_in)?
            .insert(Arc::clone(&field), Value::Symbolic(parent.clone()));
        let symbolic_id = registry.compute_symbolic_id(ty, &attributes);
        if let Some(sid) = &symbolic_id {
            self.ensure_unclaimed(sid, None)?;
        }

        let id = match preferred {
            Some(id) if id.type_id == ty && !self.data.index.contains(id) => id,
            _ => self.data.index.allocate(ty),
        };
        self.data.index.reserve(id);

        let data = Arc::new(EntityData {
            source,
            attributes,
            symbolic_id,
        });
        debug!(entity = %id, parent = %parent, "entity parked in orphanage");
        self.data.orphanage.park(
            parent,
            Orphan {
                id,
                parent_field: field,
                data: Arc::clone(&data),
            },
        );
        self.log.orphanage_changed = true;
        Ok(Entity::new(id, data))
    }

    /// Fails with `DuplicateSymbolicId` when an entity other than `owner`,
    /// live or parked, already has `sid`.
    fn ensure_unclaimed(&self, sid: &SymbolicId, owner: Option<EntityId>) -> Result<()> {
        let live = self.data.index.resolve(sid).is_some_and(|holder| Some(holder) != owner);
        if live || self.data.orphanage.holds(sid) {
            return Err(Error::duplicate_symbolic_id(sid.clone()));
        }
        Ok(())
    }

    /// Drops the parked orphans whose source matches `predicate`.
    pub(crate) fn discard_orphans<P>(&mut self, predicate: P) -> usize
    where
        P: Fn(&EntitySource) -> bool,
    {
        let dropped = self.data.orphanage.discard(|o| predicate(&o.data.source));
        if dropped > 0 {
            debug!(count = dropped, "parked orphans discarded");
            self.log.orphanage_changed = true;
        }
        dropped
    }

    /// Adds the orphans waiting for `sid` as children of the entity that now
    /// has it.
    pub(crate) fn adopt_orphans(&mut self, sid: &SymbolicId) {
        let Some(parent) = self.data.index.resolve(sid) else {
            return;
        };
        let orphans = self.data.orphanage.take(sid);
        if orphans.is_empty() {
            return;
        }
        let source = self
            .data
            .index
            .get(parent)
            .map_or(EntitySource::Orphan, |data| data.source.clone());
        self.log.orphanage_changed = true;
        debug!(parent = %parent, count = orphans.len(), "adopting orphans");

        for orphan in orphans {
            let attributes = orphan
                .data
                .attributes
                .insert(Arc::clone(&orphan.parent_field), Value::EntityRef(parent));
            if let Err(err) = self.add_with_id(orphan.id.type_id, attributes, source.clone(), Some(orphan.id)) {
                warn!(entity = %orphan.id, parent = %parent, error = %err, "orphan dropped on adoption");
            }
        }
    }

    // =========================================================================
    // Modifying
    // =========================================================================

    /// Modifies an entity through an [`EntityEditor`].
    ///
    /// A modification that leaves the entity unchanged records nothing. When
    /// the symbolic id changes, every soft reference to the old id is
    /// rewritten to the new one, and orphans waiting for the new id are
    /// adopted.
    ///
    /// # Errors
    ///
    /// Returns `EntityNotFound` if the entity does not exist, and the same
    /// validation errors as [`Builder::add_entity`].
    pub fn modify_entity<F>(&mut self, id: EntityId, mutator: F) -> Result<Entity>
    where
        F: FnOnce(&mut EntityEditor),
    {
        let current = self.data.index.get(id).ok_or_else(|| Error::entity_not_found(id))?;
        let mut editor = EntityEditor::new(id, current);
        mutator(&mut editor);
        let (attributes, source) = editor.into_parts();
        self.replace_entity(id, attributes, source)
    }

    /// Replaces an entity's attributes and source, keeping its id.
    pub(crate) fn replace_entity(
        &mut self,
        id: EntityId,
        attributes: Attributes,
        source: EntitySource,
    ) -> Result<Entity> {
        self.replace_entity_with(id, attributes, source, None)
    }

    /// Like `replace_entity`, but a symbolic id change leaves alone the
    /// referrers `authority` also holds: their final state comes from it.
    pub(crate) fn replace_entity_with(
        &mut self,
        id: EntityId,
        attributes: Attributes,
        source: EntitySource,
        authority: Option<&Builder>,
    ) -> Result<Entity> {
        let registry = Arc::clone(&self.data.registry);
        let current = Arc::clone(self.data.index.get(id).ok_or_else(|| Error::entity_not_found(id))?);
        let entity_type = registry.require(id.type_id)?;
        let resolved = self.resolve_parents(entity_type, attributes, source, false)?;
        let attributes = registry.validate(id.type_id, resolved.attributes)?;
        let symbolic_id = registry.compute_symbolic_id(id.type_id, &attributes);

        if symbolic_id != current.symbolic_id {
            if let Some(sid) = &symbolic_id {
                self.ensure_unclaimed(sid, Some(id))?;
            }
        }

        let data = EntityData {
            source: resolved.source,
            attributes,
            symbolic_id,
        };
        if data == *current {
            return Ok(Entity::new(id, current));
        }

        let data = Arc::new(data);
        self.data.index.insert(&registry, id, Arc::clone(&data));
        self.log.touch(id);
        trace!(entity = %id, "entity modified");

        if data.symbolic_id != current.symbolic_id {
            if let (Some(old), Some(new)) = (&current.symbolic_id, &data.symbolic_id) {
                self.retarget(old, new, authority)?;
            }
            if let Some(new) = &data.symbolic_id {
                self.adopt_orphans(new);
            }
        }

        // Retargeting rewrites self references too.
        let latest = self.data.index.get(id).map_or(data, Arc::clone);
        Ok(Entity::new(id, latest))
    }

    /// Rewrites soft references to `old` so they point at `new`.
    ///
    /// Referrers whose own symbolic id embeds `old` change id as well, which
    /// retargets their referrers in turn.
    fn retarget(&mut self, old: &SymbolicId, new: &SymbolicId, authority: Option<&Builder>) -> Result<()> {
        let registry = Arc::clone(&self.data.registry);
        for referrer in self.data.index.all_referrers(old) {
            if authority.is_some_and(|b| b.base.contains(referrer) || b.data.contains(referrer)) {
                continue;
            }
            let (Some(data), Some(entity_type)) = (self.data.index.get(referrer).cloned(), registry.get(referrer.type_id))
            else {
                continue;
            };
            let mut attributes = data.attributes.clone();
            for soft in &entity_type.soft_refs {
                if let Some(rewritten) = attributes.get(&soft.name).and_then(|v| v.retarget(old, new)) {
                    attributes = attributes.insert(Arc::clone(&soft.name), rewritten);
                }
            }
            trace!(entity = %referrer, from = %old, to = %new, "soft reference retargeted");
            self.replace_entity_with(referrer, attributes, data.source.clone(), authority)?;
        }
        Ok(())
    }

    /// Replaces several entities at once, so they may trade symbolic ids
    /// among themselves. Soft references are not retargeted.
    pub(crate) fn replace_batch(&mut self, batch: Vec<(EntityId, Attributes, EntitySource)>) -> Result<()> {
        let registry = Arc::clone(&self.data.registry);
        let mut prepared = Vec::with_capacity(batch.len());
        for (id, attributes, source) in batch {
            if !self.data.index.contains(id) {
                continue;
            }
            let entity_type = registry.require(id.type_id)?;
            let resolved = self.resolve_parents(entity_type, attributes, source, false)?;
            let attributes = registry.validate(id.type_id, resolved.attributes)?;
            let symbolic_id = registry.compute_symbolic_id(id.type_id, &attributes);
            prepared.push((
                id,
                EntityData {
                    source: resolved.source,
                    attributes,
                    symbolic_id,
                },
            ));
        }

        let members: HashSet<EntityId> = prepared.iter().map(|(id, _)| *id).collect();
        let mut claimed = HashSet::new();
        for sid in prepared.iter().filter_map(|(_, data)| data.symbolic_id.as_ref()) {
            let held_outside = self
                .data
                .index
                .resolve(sid)
                .is_some_and(|holder| !members.contains(&holder));
            if held_outside || self.data.orphanage.holds(sid) || !claimed.insert(sid) {
                return Err(Error::duplicate_symbolic_id(sid.clone()));
            }
        }

        for (id, _) in &prepared {
            self.data.index.remove(&registry, *id);
        }
        let mut adopted = Vec::new();
        for (id, data) in prepared {
            if let Some(sid) = &data.symbolic_id {
                adopted.push(sid.clone());
            }
            self.data.index.insert(&registry, id, Arc::new(data));
            self.log.touch(id);
        }
        debug!(count = members.len(), "batch replaced");
        for sid in &adopted {
            self.adopt_orphans(sid);
        }
        Ok(())
    }

    // =========================================================================
    // Removing
    // =========================================================================

    /// Removes an entity and, transitively, every child it owns.
    ///
    /// Children owned through a nullifying parent field are kept with the
    /// field set to nil. External mapping entries of removed entities are
    /// cleared. Returns the removed ids, the requested entity first.
    ///
    /// # Errors
    ///
    /// Returns `EntityNotFound` if the entity does not exist.
    pub fn remove_entity(&mut self, id: EntityId) -> Result<Vec<EntityId>> {
        if !self.data.index.contains(id) {
            return Err(Error::entity_not_found(id));
        }
        let registry = Arc::clone(&self.data.registry);
        let mut removed = Vec::new();
        let mut stack = vec![id];

        while let Some(next) = stack.pop() {
            if self.data.index.remove(&registry, next).is_none() {
                continue;
            }
            self.log.touch(next);
            self.clear_mappings(next);
            removed.push(next);
            trace!(entity = %next, "entity removed");

            let children: Vec<EntityId> = self.data.index.children(next).collect();
            for child in children.into_iter().rev() {
                let (Some(data), Some(child_type)) = (self.data.index.get(child).cloned(), registry.get(child.type_id))
                else {
                    continue;
                };
                let mut cascade = false;
                let mut attributes = data.attributes.clone();
                for parent in &child_type.parents {
                    if data.attributes.get(&parent.name).and_then(Value::as_entity) != Some(next) {
                        continue;
                    }
                    match parent.on_delete {
                        OnDelete::Cascade => cascade = true,
                        OnDelete::Nullify => {
                            attributes = attributes.insert(Arc::clone(&parent.name), Value::Nil);
                        }
                    }
                }
                if cascade {
                    stack.push(child);
                } else {
                    let nullified = Arc::new(EntityData {
                        source: data.source.clone(),
                        attributes,
                        symbolic_id: data.symbolic_id.clone(),
                    });
                    self.data.index.insert(&registry, child, nullified);
                    self.log.touch(child);
                    trace!(entity = %child, parent = %next, "parent reference nullified");
                }
            }
            self.data.index.forget_children(next);
        }

        if removed.len() > 1 {
            debug!(entity = %id, removed = removed.len(), "cascading removal");
        }
        Ok(removed)
    }

    fn clear_mappings(&mut self, id: EntityId) {
        let keys: Vec<ExternalMappingKey> = self.data.mappings.keys().cloned().collect();
        for key in keys {
            let cleared = self
                .data
                .mappings
                .get_mut(&key)
                .and_then(|table| table.remove(id))
                .is_some();
            if cleared {
                self.log.record_mapping(&key, id);
            }
        }
    }

    // =========================================================================
    // External Mappings
    // =========================================================================

    /// Returns a writable view of an external mapping table, creating the
    /// table on first write.
    pub fn mutable_external_mapping(&mut self, key: &ExternalMappingKey) -> MutableExternalMapping<'_> {
        MutableExternalMapping {
            key: key.clone(),
            data: &mut self.data,
            log: &mut self.log,
        }
    }

    /// Writes or clears one mapping entry without checking the entity.
    pub(crate) fn set_mapping(&mut self, key: &ExternalMappingKey, id: EntityId, value: Option<Value>) {
        let table = self.data.mappings.entry(key.clone()).or_default();
        let previous = match value.clone() {
            Some(value) => table.add(id, value),
            None => table.remove(id),
        };
        if previous != value {
            self.log.record_mapping(key, id);
        }
    }
}

impl EntityStorage for Builder {
    fn storage(&self) -> &StorageData {
        &self.data
    }
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("base_generation", &self.base.generation())
            .field("entities", &self.data.entity_count())
            .field("touched", &self.log.touched().len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Mutable External Mapping
// =============================================================================

/// Writable view of one external mapping table of a [`Builder`].
pub struct MutableExternalMapping<'a> {
    key: ExternalMappingKey,
    data: &'a mut StorageData,
    log: &'a mut ChangeLog,
}

impl MutableExternalMapping<'_> {
    fn table(&self) -> Option<&ExternalMapping> {
        self.data.mappings.get(&self.key)
    }

    /// Attaches data to a live entity, returning the data it replaced.
    ///
    /// # Errors
    ///
    /// Returns `EntityNotFound` if the entity does not exist.
    pub fn add_mapping(&mut self, entity: EntityId, data: impl Into<Value>) -> Result<Option<Value>> {
        if !self.data.index.contains(entity) {
            return Err(Error::entity_not_found(entity));
        }
        let data = data.into();
        let previous = self
            .data
            .mappings
            .entry(self.key.clone())
            .or_default()
            .add(entity, data.clone());
        if previous.as_ref() != Some(&data) {
            self.log.record_mapping(&self.key, entity);
        }
        Ok(previous)
    }

    /// Detaches an entity's data, returning it.
    pub fn remove_mapping(&mut self, entity: EntityId) -> Option<Value> {
        let previous = self.data.mappings.get_mut(&self.key)?.remove(entity)?;
        self.log.record_mapping(&self.key, entity);
        Some(previous)
    }

    /// Returns the data attached to an entity.
    #[must_use]
    pub fn get_data_by_entity(&self, entity: EntityId) -> Option<&Value> {
        self.table()?.get_data_by_entity(entity)
    }

    /// Returns the entities carrying `data`, in id order.
    #[must_use]
    pub fn get_entities(&self, data: &Value) -> Vec<EntityId> {
        self.table()
            .map(|table| table.get_entities(data).collect())
            .unwrap_or_default()
    }

    /// Returns the number of mapped entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table().map_or(0, ExternalMapping::len)
    }

    /// Returns true if no entity is mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
