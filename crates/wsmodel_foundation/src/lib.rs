//! Core values, identifiers, errors, and persistent collections for wsmodel.
//!
//! This crate provides:
//! - [`Value`] - Attribute values stored on entities
//! - [`EntityId`] / [`EntityTypeId`] - Internal entity identifiers
//! - [`SymbolicId`] - Type-unique keys derived from key attributes
//! - [`EntitySource`] - Provenance tags
//! - [`Type`] - Type descriptors for schema validation
//! - [`Error`] - Error kinds with context
//! - Persistent collections ([`WsVec`], [`WsMap`])

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod collections;
pub mod entity;
pub mod error;
pub mod source;
pub mod symbolic;
pub mod types;
pub mod value;

pub use collections::{WsMap, WsVec};
pub use entity::{EntityId, EntityTypeId};
pub use error::{Error, ErrorContext, ErrorKind};
pub use source::EntitySource;
pub use symbolic::SymbolicId;
pub use types::Type;
pub use value::Value;

/// Result type alias using the wsmodel error.
pub type Result<T> = std::result::Result<T, Error>;
