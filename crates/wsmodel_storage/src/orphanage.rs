//! Holding area for entities whose owning parent does not exist yet.

use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use wsmodel_foundation::{EntityId, SymbolicId};

use crate::entity::EntityData;

/// An entity parked until an entity with `parent` symbolic id appears.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Orphan {
    /// The id reserved for the entity. It is kept on adoption when still free.
    pub id: EntityId,
    /// The hard reference field that will point at the parent.
    pub parent_field: Arc<str>,
    /// The parked data. `parent_field` holds the parent's symbolic id.
    pub data: Arc<EntityData>,
}

/// Orphans grouped by the symbolic id of the parent they wait for.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Orphanage {
    waiting: im::HashMap<SymbolicId, im::Vector<Orphan>>,
}

impl Orphanage {
    /// Returns the number of parked entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.waiting.values().map(im::Vector::len).sum()
    }

    /// Returns true if nothing is parked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    /// Iterates parked entities with the parent they wait for.
    pub fn iter(&self) -> impl Iterator<Item = (&SymbolicId, &Orphan)> {
        self.waiting
            .iter()
            .flat_map(|(parent, orphans)| orphans.iter().map(move |o| (parent, o)))
    }

    /// Returns the entities waiting for `parent`.
    pub fn waiting_for<'a>(&'a self, parent: &SymbolicId) -> impl Iterator<Item = &'a Orphan> + 'a {
        self.waiting.get(parent).into_iter().flat_map(im::Vector::iter)
    }

    /// Returns true if an orphan with this reserved id is parked.
    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.iter().any(|(_, o)| o.id == id)
    }

    /// Returns true if a parked entity has symbolic id `sid`.
    #[must_use]
    pub fn holds(&self, sid: &SymbolicId) -> bool {
        self.iter().any(|(_, o)| o.data.symbolic_id.as_ref() == Some(sid))
    }

    pub(crate) fn park(&mut self, parent: SymbolicId, orphan: Orphan) {
        self.waiting.entry(parent).or_default().push_back(orphan);
    }

    pub(crate) fn take(&mut self, parent: &SymbolicId) -> im::Vector<Orphan> {
        self.waiting.remove(parent).unwrap_or_default()
    }

    /// Drops every parked entity matching `predicate` and returns how many went.
    pub(crate) fn discard<F>(&mut self, predicate: F) -> usize
    where
        F: Fn(&Orphan) -> bool,
    {
        let before = self.len();
        self.waiting = self
            .waiting
            .iter()
            .filter_map(|(parent, orphans)| {
                let kept: im::Vector<Orphan> = orphans.iter().filter(|o| !predicate(*o)).cloned().collect();
                (!kept.is_empty()).then(|| (parent.clone(), kept))
            })
            .collect();
        before - self.len()
    }
}
