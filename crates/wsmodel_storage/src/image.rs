//! Serializable image of a snapshot's storage state.
//!
//! The image carries the entity tables with their allocator counters, the
//! symbolic, referrer and children indices, the orphanage, and every
//! external mapping table. The registry and configuration are supplied on
//! restore; query caches are never persisted.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use wsmodel_foundation::{Error, Result, Value};

use crate::config::StoreConfig;
use crate::index::EntityIndex;
use crate::mapping::{ExternalMapping, ExternalMappingKey};
use crate::orphanage::Orphanage;
use crate::query::QueryCache;
use crate::schema::TypeRegistry;
use crate::snapshot::Snapshot;
use crate::storage::{EntityStorage, StorageData};

/// Everything needed to restore a [`Snapshot`] against the same registry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageImage {
    index: EntityIndex,
    mappings: im::OrdMap<ExternalMappingKey, ExternalMapping>,
    orphanage: Orphanage,
}

impl StorageImage {
    /// Captures the storage state of a snapshot.
    #[must_use]
    pub fn capture(snapshot: &Snapshot) -> Self {
        let data = snapshot.storage();
        Self {
            index: data.index.clone(),
            mappings: data.mappings.clone(),
            orphanage: data.orphanage.clone(),
        }
    }

    /// Returns the number of entities in the image.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.index.len()
    }

    /// Restores a snapshot with the default configuration.
    ///
    /// # Errors
    ///
    /// See [`StorageImage::restore_with_config`].
    pub fn restore(self, registry: Arc<TypeRegistry>) -> Result<Snapshot> {
        self.restore_with_config(registry, StoreConfig::default())
    }

    /// Restores a snapshot, checking the image against `registry`.
    ///
    /// The restored snapshot has generation 0 and an empty query cache.
    ///
    /// # Errors
    ///
    /// Returns `CorruptCacheFile` if the image names an unknown type, holds
    /// an entity whose symbolic id does not match its key attributes, has
    /// indices that differ from the ones its tables imply, or maps an
    /// entity that does not exist.
    pub fn restore_with_config(
        self,
        registry: Arc<TypeRegistry>,
        config: StoreConfig,
    ) -> Result<Snapshot> {
        self.check(&registry)?;
        let data = StorageData {
            registry,
            config,
            index: self.index,
            mappings: self.mappings,
            orphanage: self.orphanage,
        };
        Ok(Snapshot::sealed(data, 0, QueryCache::default()))
    }

    fn check(&self, registry: &TypeRegistry) -> Result<()> {
        for (id, data) in self.index.iter() {
            if registry.get(id.type_id).is_none() {
                return Err(Error::corrupt_cache(format!("unknown entity type in {id}")));
            }
            if registry.compute_symbolic_id(id.type_id, &data.attributes) != data.symbolic_id {
                return Err(Error::corrupt_cache(format!("stale symbolic id on {id}")));
            }
        }

        if self.index.rebuilt(registry) != self.index {
            return Err(Error::corrupt_cache("indices disagree with entity tables"));
        }

        for (key, table) in &self.mappings {
            if !table.is_consistent() {
                return Err(Error::corrupt_cache(format!("external mapping {key} is inconsistent")));
            }
            if let Some((id, _)) = table.iter().find(|(id, _)| !self.index.contains(*id)) {
                return Err(Error::corrupt_cache(format!(
                    "external mapping {key} refers to missing entity {id}"
                )));
            }
        }

        for (parent, orphan) in self.orphanage.iter() {
            let waiting = orphan.data.attributes.get(&orphan.parent_field);
            if registry.get(orphan.id.type_id).is_none()
                || waiting.and_then(Value::as_symbolic) != Some(parent)
            {
                return Err(Error::corrupt_cache(format!("orphan {} is malformed", orphan.id)));
            }
        }

        Ok(())
    }
}

impl Snapshot {
    /// Captures this snapshot's storage state for serialization.
    #[must_use]
    pub fn to_image(&self) -> StorageImage {
        StorageImage::capture(self)
    }
}
