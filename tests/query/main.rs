//! Integration tests for declarative queries and the query cache
//!
//! Tests query combinators, memoization across snapshots, and cache resets.

mod cache;
#[path = "../common/workspace.rs"]
mod workspace;
