//! Entity records and the editor handed to `modify_entity`.

use std::fmt;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use wsmodel_foundation::{EntityId, EntitySource, EntityTypeId, SymbolicId, Value, WsMap};

/// Attribute bag of an entity.
pub type Attributes = WsMap<Arc<str>, Value>;

/// The immutable payload of an entity.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EntityData {
    /// Provenance of the entity.
    pub source: EntitySource,
    /// Attribute values, validated against the type's schema.
    pub attributes: Attributes,
    /// Symbolic id computed from the key attributes, if the type has one.
    pub symbolic_id: Option<SymbolicId>,
}

/// A live entity: its id plus a shared handle to its data.
///
/// Cloning is O(1).
#[derive(Clone, PartialEq, Eq)]
pub struct Entity {
    id: EntityId,
    data: Arc<EntityData>,
}

impl Entity {
    pub(crate) fn new(id: EntityId, data: Arc<EntityData>) -> Self {
        Self { id, data }
    }

    /// Returns the entity's id.
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Returns the entity's type.
    #[must_use]
    pub fn type_id(&self) -> EntityTypeId {
        self.id.type_id
    }

    /// Returns the entity's source.
    #[must_use]
    pub fn source(&self) -> &EntitySource {
        &self.data.source
    }

    /// Returns the entity's symbolic id.
    #[must_use]
    pub fn symbolic_id(&self) -> Option<&SymbolicId> {
        self.data.symbolic_id.as_ref()
    }

    /// Gets an attribute value. Absent optional attributes return `None`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.data.attributes.get(name)
    }

    /// Returns all attributes.
    #[must_use]
    pub fn attributes(&self) -> &Attributes {
        &self.data.attributes
    }

    /// Returns the shared data handle.
    #[must_use]
    pub fn data(&self) -> &Arc<EntityData> {
        &self.data
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("source", &self.data.source)
            .field("attributes", &self.data.attributes)
            .finish()
    }
}

/// Mutable view of an entity's attributes and source inside `modify_entity`.
///
/// Changes are validated when the mutator returns.
#[derive(Clone, Debug)]
pub struct EntityEditor {
    id: EntityId,
    attributes: Attributes,
    source: EntitySource,
}

impl EntityEditor {
    pub(crate) fn new(id: EntityId, data: &EntityData) -> Self {
        Self {
            id,
            attributes: data.attributes.clone(),
            source: data.source.clone(),
        }
    }

    /// Returns the id of the entity being edited.
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Gets the current value of an attribute.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Sets an attribute.
    pub fn set(&mut self, name: impl Into<Arc<str>>, value: impl Into<Value>) -> &mut Self {
        self.attributes = self.attributes.insert(name.into(), value.into());
        self
    }

    /// Removes an attribute.
    pub fn remove(&mut self, name: &str) -> &mut Self {
        self.attributes = self.attributes.remove(name);
        self
    }

    /// Changes the entity's source.
    pub fn set_source(&mut self, source: EntitySource) -> &mut Self {
        self.source = source;
        self
    }

    pub(crate) fn into_parts(self) -> (Attributes, EntitySource) {
        (self.attributes, self.source)
    }
}
