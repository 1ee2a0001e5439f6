//! Entity provenance tags.

use std::fmt;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Provenance tag attached to every entity.
///
/// Sources scope bulk operations (`replace_by_source`) and decide which side
/// wins when two builders disagree about the same entity.
#[derive(Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EntitySource {
    /// An ordinary named source, e.g. the file or importer that produced it.
    Named(Arc<str>),
    /// A source whose entities are never overwritten by merge conflicts.
    Protected(Arc<str>),
    /// The orphanage source: entities parked until their parent exists.
    Orphan,
}

impl EntitySource {
    /// Creates an ordinary named source.
    #[must_use]
    pub fn named(name: impl Into<Arc<str>>) -> Self {
        Self::Named(name.into())
    }

    /// Creates a protected source.
    #[must_use]
    pub fn protected(name: impl Into<Arc<str>>) -> Self {
        Self::Protected(name.into())
    }

    /// Returns the source name; the orphan source has none.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Named(name) | Self::Protected(name) => Some(name),
            Self::Orphan => None,
        }
    }

    /// Returns true if this is the orphanage source.
    #[must_use]
    pub const fn is_orphan(&self) -> bool {
        matches!(self, Self::Orphan)
    }

    /// Returns true if entities with this source win every merge conflict.
    #[must_use]
    pub const fn is_protected(&self) -> bool {
        matches!(self, Self::Protected(_))
    }
}

impl fmt::Debug for EntitySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => write!(f, "Source({name})"),
            Self::Protected(name) => write!(f, "Protected({name})"),
            Self::Orphan => write!(f, "Orphan"),
        }
    }
}

impl fmt::Display for EntitySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
