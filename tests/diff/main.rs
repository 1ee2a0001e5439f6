//! Integration tests for the diff engine
//!
//! Tests change collection, merging between builders, and replacement by source.

mod replace;
#[path = "../common/workspace.rs"]
mod workspace;
