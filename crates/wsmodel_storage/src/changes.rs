//! Change collection and merging between builders.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, trace, warn};
use wsmodel_foundation::{EntityId, Error, ErrorKind, Result, Value};

use crate::builder::Builder;
use crate::entity::{Attributes, Entity};
use crate::storage::EntityStorage;

/// One net change of a builder relative to its base snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntityChange {
    /// The entity did not exist in the base.
    Added(Entity),
    /// The entity existed in the base and is gone.
    Removed(Entity),
    /// The entity exists on both sides with different data.
    Replaced {
        /// The entity as the base has it.
        old: Entity,
        /// The entity as the builder has it.
        new: Entity,
    },
}

impl EntityChange {
    /// Returns the id of the changed entity.
    #[must_use]
    pub fn id(&self) -> EntityId {
        match self {
            Self::Added(entity) | Self::Removed(entity) => entity.id(),
            Self::Replaced { new, .. } => new.id(),
        }
    }
}

/// The entities whose symbolic id a change set frees, either by removing
/// them or by renaming them.
struct Departures {
    removed: HashSet<EntityId>,
    renamed: HashSet<EntityId>,
}

impl Departures {
    fn of(changes: &[EntityChange]) -> Self {
        let mut departures = Self {
            removed: HashSet::new(),
            renamed: HashSet::new(),
        };
        for change in changes {
            match change {
                EntityChange::Removed(entity) => {
                    departures.removed.insert(entity.id());
                }
                EntityChange::Replaced { old, new } if old.symbolic_id() != new.symbolic_id() => {
                    departures.renamed.insert(new.id());
                }
                _ => {}
            }
        }
        departures
    }
}

#[derive(Default)]
struct MergeStats {
    added: usize,
    replaced: usize,
    removed: usize,
    skipped: usize,
}

impl Builder {
    /// Returns the net changes against the base snapshot, in first-touch
    /// order.
    ///
    /// Only touched ids are compared, so the cost is proportional to the
    /// number of edits. An entity that was changed and changed back does not
    /// appear.
    #[must_use]
    pub fn collect_changes(&self) -> Vec<EntityChange> {
        self.log
            .touched()
            .iter()
            .filter_map(|id| match (self.base.entity(*id), self.data.entity(*id)) {
                (None, Some(new)) => Some(EntityChange::Added(new)),
                (Some(old), None) => Some(EntityChange::Removed(old)),
                (Some(old), Some(new)) if old.data() != new.data() => Some(EntityChange::Replaced { old, new }),
                _ => None,
            })
            .collect()
    }

    /// Merges the net changes of `source` into this builder.
    ///
    /// Changes are applied in the order `source` made them. Per id, the
    /// incoming change wins. Added entities keep their id when it is free
    /// here, otherwise they get a fresh one and references to them are
    /// remapped. An added entity whose symbolic id is already taken here
    /// overwrites the holder, unless the holder's source is protected or
    /// equal to the incoming source; then the holder is kept and the
    /// incoming id maps onto it. A holder that `source` itself renames away
    /// later is waited for instead. A replacement renaming into a symbolic id
    /// held here by an unrelated entity follows the same precedence; when the
    /// incoming change wins, the holder's children move to the renamed entity
    /// and the holder is removed. Replacements of entities this builder no
    /// longer has are skipped. External mapping edits and newly parked
    /// orphans of `source` are carried over.
    ///
    /// # Errors
    ///
    /// Returns an error only for failures other than missing parents and
    /// symbolic id conflicts, which are logged and skipped. On error the
    /// builder is left as it was before the call.
    pub fn apply_changes_from(&mut self, source: &Builder) -> Result<()> {
        self.atomically(|builder| builder.merge_from(source))
    }

    fn merge_from(&mut self, source: &Builder) -> Result<()> {
        let changes = source.collect_changes();
        let departures = Departures::of(&changes);

        let mut id_map: HashMap<EntityId, EntityId> = HashMap::new();
        let mut stats = MergeStats::default();

        // A change whose parent is not here yet, or whose symbolic id is
        // still held by an entity a later change moves away, is retried once
        // the rest have been applied.
        let mut pending: Vec<&EntityChange> = changes.iter().collect();
        loop {
            let mut deferred = Vec::new();
            for change in &pending {
                match self.merge_change(change, source, &departures, false, &mut id_map, &mut stats) {
                    Ok(()) => {}
                    Err(err) if is_retryable(&err.kind) => deferred.push(*change),
                    Err(err) => return Err(err),
                }
            }
            if deferred.is_empty() {
                break;
            }
            if deferred.len() == pending.len() {
                self.merge_stuck(&deferred, source, &departures, &mut id_map, &mut stats)?;
                break;
            }
            pending = deferred;
        }

        for (key, id) in source.log.mapping_edits() {
            let target = id_map.get(id).copied().unwrap_or(*id);
            if !self.data.index.contains(target) {
                continue;
            }
            let value = source
                .data
                .external_mapping(key)
                .and_then(|table| table.get_data_by_entity(*id))
                .cloned();
            self.set_mapping(key, target, value);
        }

        let base_orphans = source.base.orphans();
        for (parent, orphan) in source.data.orphanage.iter() {
            let inherited = base_orphans.waiting_for(parent).any(|o| o.id == orphan.id);
            if inherited || self.data.orphanage.contains(orphan.id) {
                continue;
            }
            let preferred = (!self.data.index.contains(orphan.id)).then_some(orphan.id);
            if let Err(err) = self.add_with_id(
                orphan.id.type_id,
                orphan.data.attributes.clone(),
                orphan.data.source.clone(),
                preferred,
            ) {
                warn!(entity = %orphan.id, error = %err, "orphan not carried over");
            }
        }

        debug!(
            added = stats.added,
            replaced = stats.replaced,
            removed = stats.removed,
            skipped = stats.skipped,
            "changes applied"
        );
        Ok(())
    }

    fn merge_change(
        &mut self,
        change: &EntityChange,
        authority: &Builder,
        departures: &Departures,
        settling: bool,
        id_map: &mut HashMap<EntityId, EntityId>,
        stats: &mut MergeStats,
    ) -> Result<()> {
        match change {
            EntityChange::Added(entity) => self.merge_added(entity, departures, settling, id_map, stats),
            EntityChange::Replaced { new, .. } => {
                let target = id_map.get(&new.id()).copied().unwrap_or(new.id());
                if !self.data.index.contains(target) {
                    trace!(entity = %target, "replacement skipped: entity removed in target");
                    stats.skipped += 1;
                    return Ok(());
                }
                let attributes = self.remap_parents(new, id_map);
                self.replace_entity_with(target, attributes, new.source().clone(), Some(authority))?;
                stats.replaced += 1;
                Ok(())
            }
            EntityChange::Removed(entity) => {
                let target = id_map.get(&entity.id()).copied().unwrap_or(entity.id());
                if self.data.index.contains(target) {
                    stats.removed += self.remove_entity(target)?.len();
                }
                Ok(())
            }
        }
    }

    /// Resolves the changes that could not be applied in any order.
    ///
    /// Replacements go first, then everything else is retried without
    /// waiting on renames. What still fails is skipped.
    fn merge_stuck(
        &mut self,
        stuck: &[&EntityChange],
        authority: &Builder,
        departures: &Departures,
        id_map: &mut HashMap<EntityId, EntityId>,
        stats: &mut MergeStats,
    ) -> Result<()> {
        self.merge_stuck_replacements(stuck, authority, id_map, stats)?;

        let mut pending: Vec<&EntityChange> = stuck
            .iter()
            .copied()
            .filter(|change| !matches!(change, EntityChange::Replaced { .. }))
            .collect();
        while !pending.is_empty() {
            let mut deferred = Vec::new();
            for change in &pending {
                match self.merge_change(change, authority, departures, true, id_map, stats) {
                    Ok(()) => {}
                    Err(err) if is_retryable(&err.kind) => deferred.push(*change),
                    Err(err) => return Err(err),
                }
            }
            if deferred.len() == pending.len() {
                for change in deferred {
                    warn!(entity = %change.id(), "change skipped: parent missing or symbolic id taken");
                    stats.skipped += 1;
                }
                break;
            }
            pending = deferred;
        }
        Ok(())
    }

    /// Applies replacements that block each other, such as two entities
    /// swapping names, as one batch.
    ///
    /// A replacement whose new symbolic id is held by an entity outside the
    /// batch is settled first: the holder stays if its source is protected or
    /// equal to the incoming source, and the replacement is dropped;
    /// otherwise the holder gives way.
    fn merge_stuck_replacements(
        &mut self,
        stuck: &[&EntityChange],
        authority: &Builder,
        id_map: &HashMap<EntityId, EntityId>,
        stats: &mut MergeStats,
    ) -> Result<()> {
        let target_of = |entity: &Entity| id_map.get(&entity.id()).copied().unwrap_or(entity.id());
        let members: HashSet<EntityId> = stuck
            .iter()
            .filter_map(|change| match change {
                EntityChange::Replaced { new, .. } => Some(target_of(new)),
                _ => None,
            })
            .collect();

        let mut batch = Vec::new();
        for change in stuck {
            let EntityChange::Replaced { new, .. } = change else {
                continue;
            };
            let target = target_of(new);
            if !self.data.index.contains(target) {
                stats.skipped += 1;
                continue;
            }
            let holder = new
                .symbolic_id()
                .and_then(|sid| self.data.index.resolve(sid))
                .filter(|holder| !members.contains(holder));
            if let Some(holder) = holder {
                let keep_holder = self
                    .data
                    .index
                    .get(holder)
                    .is_some_and(|data| data.source.is_protected() || data.source == *new.source());
                if keep_holder {
                    warn!(entity = %target, holder = %holder, "replacement skipped: symbolic id kept by holder");
                    stats.skipped += 1;
                    continue;
                }
                self.supersede(holder, target)?;
            }
            batch.push((target, self.remap_parents(new, id_map), new.source().clone()));
        }

        let batched = batch.len();
        let applied = match batched {
            0 => return Ok(()),
            // Alone it can retarget soft references.
            1 => {
                let (id, attributes, source) = batch.remove(0);
                self.replace_entity_with(id, attributes, source, Some(authority)).map(|_| ())
            }
            _ => self.replace_batch(batch),
        };
        match applied {
            Ok(()) => stats.replaced += batched,
            Err(err) if is_retryable(&err.kind) => {
                warn!(count = batched, error = %err, "conflicting replacements skipped");
                stats.skipped += batched;
            }
            Err(err) => return Err(err),
        }
        Ok(())
    }

    /// Moves the children of `holder` under `heir`, which has the same type,
    /// and removes `holder`.
    fn supersede(&mut self, holder: EntityId, heir: EntityId) -> Result<()> {
        let registry = Arc::clone(&self.data.registry);
        let children: Vec<EntityId> = self.data.index.children(holder).collect();
        for child in children {
            let (Some(data), Some(child_type)) = (self.data.index.get(child).cloned(), registry.get(child.type_id))
            else {
                continue;
            };
            let mut attributes = data.attributes.clone();
            for parent in &child_type.parents {
                if attributes.get(&parent.name).and_then(Value::as_entity) == Some(holder) {
                    attributes = attributes.insert(Arc::clone(&parent.name), Value::EntityRef(heir));
                }
            }
            self.replace_entity(child, attributes, data.source.clone())?;
        }
        debug!(holder = %holder, heir = %heir, "holder superseded");
        self.remove_entity(holder)?;
        Ok(())
    }

    fn merge_added(
        &mut self,
        entity: &Entity,
        departures: &Departures,
        settling: bool,
        id_map: &mut HashMap<EntityId, EntityId>,
        stats: &mut MergeStats,
    ) -> Result<()> {
        let id = entity.id();
        let attributes = self.remap_parents(entity, id_map);

        if let Some(existing) = self.data.index.get(id) {
            if existing.attributes == attributes && existing.source == *entity.source() {
                id_map.insert(id, id);
                return Ok(());
            }
        }

        if let Some((sid, holder)) = entity
            .symbolic_id()
            .and_then(|sid| self.data.index.resolve(sid).map(|holder| (sid, holder)))
        {
            if departures.removed.contains(&holder) {
                self.remove_entity(holder)?;
            } else if departures.renamed.contains(&holder) && !settling {
                trace!(entity = %id, holder = %holder, "added entity waits for holder rename");
                return Err(Error::duplicate_symbolic_id(sid.clone()));
            } else {
                let keep_holder = self
                    .data
                    .index
                    .get(holder)
                    .is_some_and(|data| data.source.is_protected() || data.source == *entity.source());
                if !keep_holder {
                    self.replace_entity(holder, attributes, entity.source().clone())?;
                    stats.replaced += 1;
                }
                trace!(entity = %id, holder = %holder, kept = keep_holder, "added entity mapped onto holder");
                id_map.insert(id, holder);
                return Ok(());
            }
        }

        let preferred = (!self.data.index.contains(id)).then_some(id);
        let added = self.add_with_id(entity.type_id(), attributes, entity.source().clone(), preferred)?;
        id_map.insert(id, added.id());
        stats.added += 1;
        Ok(())
    }

    /// Rewrites parent references through `id_map`.
    fn remap_parents(&self, entity: &Entity, id_map: &HashMap<EntityId, EntityId>) -> Attributes {
        let mut attributes = entity.attributes().clone();
        let Some(entity_type) = self.data.registry.get(entity.type_id()) else {
            return attributes;
        };
        for parent in &entity_type.parents {
            let Some(Value::EntityRef(old)) = attributes.get(&parent.name) else {
                continue;
            };
            if let Some(new) = id_map.get(old).filter(|new| *new != old) {
                attributes = attributes.insert(Arc::clone(&parent.name), Value::EntityRef(*new));
            }
        }
        attributes
    }
}

fn is_retryable(kind: &ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::DanglingHardReference { .. } | ErrorKind::DuplicateSymbolicId(_)
    )
}
