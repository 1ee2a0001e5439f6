//! External mappings: side tables attaching opaque data to entities.
//!
//! Each table is bidirectional (entity to data, data to entities) and built
//! from persistent maps, so a builder's tables share structure with its base
//! snapshot's tables until edited.

use std::fmt;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use wsmodel_foundation::{EntityId, Value};

/// Name of an external mapping table.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ExternalMappingKey(Arc<str>);

impl ExternalMappingKey {
    /// Creates a mapping key.
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    /// Returns the key's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ExternalMappingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExternalMappingKey({})", self.0)
    }
}

impl fmt::Display for ExternalMappingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A bidirectional entity to data table.
#[derive(Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ExternalMapping {
    by_entity: im::OrdMap<EntityId, Value>,
    by_data: im::HashMap<Value, im::OrdSet<EntityId>>,
}

impl ExternalMapping {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the data attached to an entity.
    #[must_use]
    pub fn get_data_by_entity(&self, entity: EntityId) -> Option<&Value> {
        self.by_entity.get(&entity)
    }

    /// Iterates the entities carrying `data`, in id order.
    pub fn get_entities<'a>(&'a self, data: &Value) -> impl Iterator<Item = EntityId> + 'a {
        self.by_data
            .get(data)
            .into_iter()
            .flat_map(|ids| ids.iter().copied())
    }

    /// Returns the number of mapped entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_entity.len()
    }

    /// Returns true if no entity is mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_entity.is_empty()
    }

    /// Iterates entries in entity id order.
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &Value)> {
        self.by_entity.iter().map(|(id, data)| (*id, data))
    }

    /// Attaches data to an entity, returning the data it replaced.
    pub(crate) fn add(&mut self, entity: EntityId, data: Value) -> Option<Value> {
        let previous = self.remove(entity);
        self.by_data.entry(data.clone()).or_default().insert(entity);
        self.by_entity.insert(entity, data);
        previous
    }

    /// Detaches an entity's data, returning it.
    pub(crate) fn remove(&mut self, entity: EntityId) -> Option<Value> {
        let previous = self.by_entity.remove(&entity)?;
        if let Some(ids) = self.by_data.get_mut(&previous) {
            ids.remove(&entity);
            if ids.is_empty() {
                self.by_data.remove(&previous);
            }
        }
        Some(previous)
    }

    /// Checks that the reverse table mirrors the forward table.
    #[cfg(feature = "serde")]
    pub(crate) fn is_consistent(&self) -> bool {
        let reverse_len: usize = self.by_data.values().map(im::OrdSet::len).sum();
        reverse_len == self.by_entity.len()
            && self.by_entity.iter().all(|(id, data)| {
                self.by_data
                    .get(data)
                    .is_some_and(|ids| ids.contains(id))
            })
    }
}

impl fmt::Debug for ExternalMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.by_entity.iter()).finish()
    }
}
