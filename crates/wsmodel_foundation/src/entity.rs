//! Entity identifiers.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Identifier of a registered entity type.
///
/// Assigned by the type registry in registration order.
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EntityTypeId(u32);

impl EntityTypeId {
    /// Creates a type id from its raw index.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the raw index of this type.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for EntityTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityTypeId({})", self.0)
    }
}

/// Internal entity identifier: the entity's type plus a per-type index.
///
/// Indices are allocated monotonically within a storage lineage and are never
/// reused, so an id keeps naming the same logical entity across every
/// snapshot derived from the one it was allocated in.
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EntityId {
    /// The entity's type.
    pub type_id: EntityTypeId,
    /// Index within the type's table.
    pub index: u64,
}

impl EntityId {
    /// Creates a new entity ID.
    #[must_use]
    pub const fn new(type_id: EntityTypeId, index: u64) -> Self {
        Self { type_id, index }
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({}:{})", self.type_id.0, self.index)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({}:{})", self.type_id.0, self.index)
    }
}
