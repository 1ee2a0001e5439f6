//! Binary cache serialization for wsmodel snapshots.
//!
//! This crate provides:
//! - [`serialize_cache`] / [`deserialize_cache`] - Versioned, checksummed cache files
//! - [`to_bytes`] / [`from_bytes`] - The same encoding in memory

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod serialize;

pub use serialize::{
    FORMAT_VERSION, MAGIC, deserialize_cache, deserialize_cache_with_config, from_bytes,
    from_bytes_with_config, serialize_cache, to_bytes,
};
