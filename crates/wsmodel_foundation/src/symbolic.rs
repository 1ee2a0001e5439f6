//! Symbolic identifiers.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::collections::WsVec;
use crate::entity::EntityTypeId;
use crate::value::Value;

/// A type-unique key derived from an entity's designated key attributes.
///
/// Symbolic ids are how entities refer to each other without ownership: a
/// soft reference stores the target's symbolic id, never its internal id, so
/// it survives the target being removed and re-added.
#[derive(Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SymbolicId {
    /// The type the id belongs to.
    pub type_id: EntityTypeId,
    /// Key attribute values, in the order the schema declares them.
    pub key: WsVec<Value>,
}

impl SymbolicId {
    /// Creates a symbolic id from key values.
    #[must_use]
    pub fn new(type_id: EntityTypeId, key: impl IntoIterator<Item = Value>) -> Self {
        Self {
            type_id,
            key: key.into_iter().collect(),
        }
    }

    /// Returns true if any key component is itself a symbolic id equal to `other`.
    ///
    /// Composite ids embed the ids of the entities they point at, so a rename
    /// of `other` changes this id too.
    #[must_use]
    pub fn embeds(&self, other: &SymbolicId) -> bool {
        self.key.iter().any(|part| match part {
            Value::Symbolic(inner) => inner == other || inner.embeds(other),
            _ => false,
        })
    }
}

impl fmt::Debug for SymbolicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymbolicId({}", self.type_id.index())?;
        for part in &self.key {
            write!(f, " {part:?}")?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for SymbolicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}[", self.type_id.index())?;
        for (i, part) in self.key.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{part}")?;
        }
        write!(f, "]")
    }
}
