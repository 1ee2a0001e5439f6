//! Type registry, snapshots, builders, query cache, and diff engine for wsmodel.
//!
//! This crate provides:
//! - [`TypeRegistry`] - Entity type schemas with hard and soft reference fields
//! - [`Snapshot`] - Immutable, shareable storage state
//! - [`Builder`] - Single-writer overlay that seals into the next snapshot
//! - [`ExternalMapping`] - Bidirectional side tables attached to entities
//! - [`Orphanage`] - Entities waiting for their parent to appear
//! - [`Query`] - Declarative queries memoized per snapshot
//! - [`EntityChange`] - Net changes of a builder, for diffing and merging

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod builder;
pub mod changes;
pub mod config;
pub mod entity;
mod index;
pub mod mapping;
pub mod orphanage;
pub mod query;
mod replace;
pub mod schema;
pub mod snapshot;
pub mod storage;

#[cfg(feature = "serde")]
pub mod image;

pub use builder::{Builder, MutableExternalMapping};
pub use changes::EntityChange;
pub use config::{QueryCacheConfig, StoreConfig};
pub use entity::{Attributes, Entity, EntityData, EntityEditor};
pub use mapping::{ExternalMapping, ExternalMappingKey};
pub use orphanage::{Orphan, Orphanage};
pub use query::{CacheStats, CachedQuery, GroupedQuery, Query, QueryId};
pub use schema::{
    EntityType, EntityTypeSchema, FieldKind, FieldSchema, OnDelete, ParentField, SoftRefField,
    TypeRegistry,
};
pub use snapshot::Snapshot;
pub use storage::{EntityStorage, StorageData};

#[cfg(feature = "serde")]
pub use image::StorageImage;
