//! Bulk replacement of every entity produced by one source.
//!
//! Importers rebuild their slice of the model from scratch into a separate
//! storage and then hand it over with `replace_by_source`. Matching keeps the
//! ids of entities that survive, so unrelated entities referring to them and
//! external mappings attached to them stay valid.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, trace};
use wsmodel_foundation::{EntityId, EntitySource, EntityTypeId, ErrorKind, Result, Value};

use crate::builder::Builder;
use crate::entity::{Attributes, Entity};
use crate::index::parents_of;
use crate::storage::{EntityStorage, StorageData};

/// How an incoming entity relates to the target.
enum Match {
    /// A target entity of a matching source: update it in place.
    Update(EntityId),
    /// A target entity of another source holds the symbolic id: use it as is.
    Keep(EntityId),
    /// Nothing corresponds: add it.
    New,
}

impl Builder {
    /// Replaces every entity whose source satisfies `predicate` with the
    /// entities of `replacement` whose source satisfies it.
    ///
    /// Incoming entities are matched to target entities by symbolic id, or
    /// for types without one by type, parent and attributes. Matches keep
    /// their id and take the incoming data, unmatched incoming entities are
    /// added, and unmatched target entities are removed. Entities of other
    /// sources are never modified; an incoming entity whose symbolic id
    /// belongs to one of them is mapped onto it so its children attach there.
    /// External mapping entries of updated and added entities are copied from
    /// `replacement`.
    ///
    /// Parked orphans of the target whose source satisfies `predicate` are
    /// dropped and the matching orphans parked in `replacement` take their
    /// place.
    ///
    /// # Errors
    ///
    /// Returns an error if an incoming entity fails validation. The builder is
    /// then left as it was before the call.
    pub fn replace_by_source<P, S>(&mut self, predicate: P, replacement: &S) -> Result<()>
    where
        P: Fn(&EntitySource) -> bool,
        S: EntityStorage + ?Sized,
    {
        self.atomically(|builder| builder.replace_matching(&predicate, replacement))
    }

    fn replace_matching<P, S>(&mut self, predicate: &P, replacement: &S) -> Result<()>
    where
        P: Fn(&EntitySource) -> bool,
        S: EntityStorage + ?Sized,
    {
        let incoming_storage = replacement.storage();
        let types: Vec<EntityTypeId> = self.data.registry.iter().map(|t| t.id).collect();

        let mut incoming: Vec<Entity> = types
            .iter()
            .flat_map(|ty| incoming_storage.entities(*ty))
            .filter(|e| predicate(e.source()))
            .collect();
        let outgoing: Vec<Entity> = types
            .iter()
            .flat_map(|ty| self.data.entities(*ty))
            .filter(|e| predicate(e.source()))
            .collect();
        let incoming_orphans: Vec<_> = incoming_storage
            .orphans()
            .iter()
            .filter(|(_, orphan)| predicate(&orphan.data.source))
            .map(|(_, orphan)| orphan.clone())
            .collect();
        let stale_orphans = self
            .data
            .orphanage
            .iter()
            .filter(|(_, orphan)| predicate(&orphan.data.source))
            .count();
        if incoming.is_empty() && outgoing.is_empty() && incoming_orphans.is_empty() && stale_orphans == 0 {
            return Ok(());
        }
        // Before any incoming parent can adopt them.
        self.discard_orphans(predicate);

        let mut depths = HashMap::new();
        let mut visiting = HashSet::new();
        for entity in &incoming {
            depth_of(incoming_storage, entity.id(), &mut depths, &mut visiting);
        }
        incoming.sort_by_key(|e| depths.get(&e.id()).copied().unwrap_or(0));

        let outgoing_ids: HashSet<EntityId> = outgoing.iter().map(Entity::id).collect();
        let mut unkeyed: HashMap<(EntityTypeId, Vec<EntityId>), Vec<EntityId>> = HashMap::new();
        for entity in outgoing.iter().filter(|e| e.symbolic_id().is_none()) {
            let parents = parents_of(&self.data.registry, entity.id(), entity.data());
            unkeyed.entry((entity.type_id(), parents)).or_default().push(entity.id());
        }

        let mut matched: HashSet<EntityId> = HashSet::new();
        let mut id_map: HashMap<EntityId, EntityId> = HashMap::new();
        let mut copied: Vec<(EntityId, EntityId)> = Vec::new();
        let (mut added, mut updated, mut kept, mut skipped) = (0usize, 0usize, 0usize, 0usize);

        for entity in &incoming {
            let Some(attributes) = self.map_incoming_parents(entity, incoming_storage, &id_map) else {
                trace!(entity = %entity.id(), "incoming entity skipped: parent not found");
                skipped += 1;
                continue;
            };

            let found = match entity.symbolic_id() {
                Some(sid) => match self.data.index.resolve(sid) {
                    Some(holder) if outgoing_ids.contains(&holder) && !matched.contains(&holder) => Match::Update(holder),
                    Some(holder) if outgoing_ids.contains(&holder) => Match::New,
                    Some(holder) => Match::Keep(holder),
                    None => Match::New,
                },
                None => {
                    let parents: Vec<EntityId> = self
                        .data
                        .registry
                        .get(entity.type_id())
                        .map(|t| {
                            t.parents
                                .iter()
                                .filter_map(|p| attributes.get(&p.name).and_then(Value::as_entity))
                                .collect()
                        })
                        .unwrap_or_default();
                    unkeyed
                        .get(&(entity.type_id(), parents))
                        .and_then(|candidates| {
                            candidates.iter().copied().find(|id| {
                                !matched.contains(id)
                                    && self.data.index.get(*id).is_some_and(|d| d.attributes == attributes)
                            })
                        })
                        .map_or(Match::New, Match::Update)
                }
            };

            match found {
                Match::Update(target) => {
                    matched.insert(target);
                    self.replace_entity(target, attributes, entity.source().clone())?;
                    id_map.insert(entity.id(), target);
                    copied.push((entity.id(), target));
                    updated += 1;
                }
                Match::Keep(target) => {
                    id_map.insert(entity.id(), target);
                    kept += 1;
                }
                Match::New => match self.add_with_id(entity.type_id(), attributes, entity.source().clone(), None) {
                    Ok(new) => {
                        id_map.insert(entity.id(), new.id());
                        copied.push((entity.id(), new.id()));
                        added += 1;
                    }
                    // A parked orphan of another source holds the id.
                    Err(err) if matches!(err.kind, ErrorKind::DuplicateSymbolicId(_)) => {
                        trace!(entity = %entity.id(), "incoming entity skipped: symbolic id parked");
                        skipped += 1;
                    }
                    Err(err) => return Err(err),
                },
            }
        }

        let mut removed = 0usize;
        for entity in &outgoing {
            if !matched.contains(&entity.id()) && self.data.index.contains(entity.id()) {
                removed += self.remove_entity(entity.id())?.len();
            }
        }

        let keys: Vec<_> = self
            .data
            .mappings
            .keys()
            .chain(incoming_storage.mappings.keys())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        for (from, to) in &copied {
            if !self.data.index.contains(*to) {
                continue;
            }
            for key in &keys {
                let value = incoming_storage
                    .external_mapping(key)
                    .and_then(|table| table.get_data_by_entity(*from))
                    .cloned();
                let current = self
                    .data
                    .external_mapping(key)
                    .and_then(|table| table.get_data_by_entity(*to))
                    .cloned();
                if value != current {
                    self.set_mapping(key, *to, value);
                }
            }
        }

        for orphan in incoming_orphans {
            let parked = self.add_with_id(
                orphan.id.type_id,
                orphan.data.attributes.clone(),
                orphan.data.source.clone(),
                None,
            );
            match parked {
                Ok(_) => {}
                Err(err) if matches!(err.kind, ErrorKind::DuplicateSymbolicId(_)) => {
                    trace!(entity = %orphan.id, "incoming orphan skipped: symbolic id taken");
                    skipped += 1;
                }
                Err(err) => return Err(err),
            }
        }

        debug!(added, updated, kept, removed, skipped, "replaced by source");
        Ok(())
    }

    /// Rewrites the parent references of an incoming entity to target ids.
    ///
    /// Parents seen earlier in the replacement are mapped through `id_map`;
    /// other parents are found by symbolic id, or by id when the target holds
    /// an identical entity. Returns `None` if a parent has no counterpart.
    fn map_incoming_parents(
        &self,
        entity: &Entity,
        incoming: &StorageData,
        id_map: &HashMap<EntityId, EntityId>,
    ) -> Option<Attributes> {
        let mut attributes = entity.attributes().clone();
        let entity_type = self.data.registry.get(entity.type_id())?;
        for parent in &entity_type.parents {
            let Some(old) = attributes.get(&parent.name).and_then(Value::as_entity) else {
                continue;
            };
            let new = match id_map.get(&old) {
                Some(new) => *new,
                None => {
                    let parent_entity = incoming.entity(old)?;
                    match parent_entity.symbolic_id() {
                        Some(sid) => self.data.index.resolve(sid)?,
                        None => {
                            let same = self.data.index.get(old).is_some_and(|d| d == parent_entity.data());
                            if !same {
                                return None;
                            }
                            old
                        }
                    }
                }
            };
            attributes = attributes.insert(Arc::clone(&parent.name), Value::EntityRef(new));
        }
        Some(attributes)
    }
}

/// Length of the longest parent chain above `id`.
fn depth_of(
    storage: &StorageData,
    id: EntityId,
    depths: &mut HashMap<EntityId, usize>,
    visiting: &mut HashSet<EntityId>,
) -> usize {
    if let Some(depth) = depths.get(&id) {
        return *depth;
    }
    if !visiting.insert(id) {
        return 0;
    }
    let parents = storage
        .index
        .get(id)
        .map(|data| parents_of(&storage.registry, id, data))
        .unwrap_or_default();
    let depth = parents
        .into_iter()
        .map(|parent| depth_of(storage, parent, depths, visiting) + 1)
        .max()
        .unwrap_or(0);
    visiting.remove(&id);
    depths.insert(id, depth);
    depth
}
