//! wsmodel - Versioned, strongly-typed entity store for project workspace models
//!
//! This crate re-exports all layers of the wsmodel system for convenient access.
//! For detailed documentation, see the individual layer crates.
//!
//! # Architecture
//!
//! ```text
//! Layer 2: wsmodel_runtime    — Binary cache files
//! Layer 1: wsmodel_storage    — Registry, snapshots, builders, queries, diffing
//! Layer 0: wsmodel_foundation — Core types (Value, EntityId, SymbolicId, Error)
//! ```

pub use wsmodel_foundation as foundation;
pub use wsmodel_runtime as runtime;
pub use wsmodel_storage as storage;
