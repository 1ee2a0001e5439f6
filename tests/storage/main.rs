//! Integration tests for Layer 1: Storage
//!
//! Tests for the type registry, builders, snapshots, references, external
//! mappings, and the orphanage.

mod builder;
#[path = "../common/workspace.rs"]
mod workspace;
