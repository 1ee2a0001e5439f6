//! Integration tests for query memoization across snapshots

use std::sync::Arc;

use wsmodel_foundation::Value;
use wsmodel_storage::{Builder, EntityStorage, Query, QueryCacheConfig, Snapshot, StoreConfig};

use crate::workspace::Workspace;

fn names(ws: &Workspace) -> Query<Value> {
    Query::entities(ws.module).map(|m| m.get("name").cloned().unwrap_or(Value::Nil))
}

fn with_modules(ws: &Workspace, builder: &mut Builder, count: usize) {
    for i in 0..count {
        ws.add_module(builder, &format!("m{i}"), &[]);
    }
}

#[test]
fn repeated_lookup_is_a_hit() {
    let ws = Workspace::new();
    let mut builder = ws.builder();
    with_modules(&ws, &mut builder, 10);
    let snapshot = builder.to_snapshot();
    let query = names(&ws);

    let first = snapshot.cached(&query);
    let second = snapshot.cached(&query);
    assert!(Arc::ptr_eq(&first, &second));

    let stats = snapshot.cache_stats();
    assert_eq!(stats.full_computes, 1);
    assert_eq!(stats.hits, 1);
}

#[test]
fn small_edits_update_incrementally() {
    let ws = Workspace::new();
    let mut builder = ws.builder();
    with_modules(&ws, &mut builder, 20);
    let s1 = builder.to_snapshot();
    let query = names(&ws);
    s1.cached(&query);

    let mut builder = s1.to_builder();
    let first = s1.entities(ws.module).next().unwrap();
    builder
        .modify_entity(first.id(), |e| {
            e.set("name", "renamed");
        })
        .unwrap();
    let s2 = builder.to_snapshot();

    let result = s2.cached(&query);
    assert_eq!(result[0], Value::from("renamed"));
    assert_eq!(*result, query.compute(&s2));
    assert_eq!(s2.cache_stats().incremental_updates, 1);
    assert_eq!(s2.cache_stats().full_computes, 0);
}

#[test]
fn cached_result_matches_recomputation_after_reset() {
    let ws = Workspace::new();
    let mut builder = ws.builder();
    with_modules(&ws, &mut builder, 50);
    let s1 = builder.to_snapshot();
    let query = names(&ws);
    s1.cached(&query);

    let mut builder = s1.to_builder();
    let ids: Vec<_> = s1.entities(ws.module).map(|e| e.id()).take(10).collect();
    for id in &ids[..5] {
        builder.remove_entity(*id).unwrap();
    }
    ws.add_module(&mut builder, "late", &[]);
    let s2 = builder.to_snapshot();

    let cached = s2.cached(&query);
    s2.invalidate_all();
    assert!(s2.was_reset());
    let recomputed = s2.cached(&query);
    assert_eq!(cached, recomputed);
    assert_eq!(*recomputed, query.compute(&s2));
}

#[test]
fn large_edits_reset_cache_entries() {
    let ws = Workspace::new();
    let config = StoreConfig::new()
        .with_query_cache(QueryCacheConfig::default().with_incremental_threshold(3));
    let mut builder = Builder::with_config(Arc::clone(&ws.registry), config);
    with_modules(&ws, &mut builder, 10);
    let s1 = builder.to_snapshot();
    let query = names(&ws);
    s1.cached(&query);

    let mut builder = s1.to_builder();
    with_modules_named(&ws, &mut builder, &["x", "y", "z", "w"]);
    let s2 = builder.to_snapshot();

    assert!(s2.was_reset());
    assert_eq!(s2.cached(&query).len(), 14);
    assert_eq!(s2.cache_stats().full_computes, 1);
}

fn with_modules_named(ws: &Workspace, builder: &mut Builder, names: &[&str]) {
    for name in names {
        ws.add_module(builder, name, &[]);
    }
}

#[test]
fn dependent_type_change_forces_recompute() {
    let ws = Workspace::new();
    let mut builder = ws.builder();
    let core = ws.add_module(&mut builder, "core", &[]);
    let s1 = builder.to_snapshot();

    let root = ws.root;
    let root_counts = Query::entities(ws.module)
        .flat_map(move |s: &Snapshot, m| vec![s.children(m.id(), root).count()])
        .depends_on(ws.root);
    assert_eq!(*s1.cached(&root_counts), vec![0]);

    let mut builder = s1.to_builder();
    ws.add_root(&mut builder, core.id(), "file:///core");
    let s2 = builder.to_snapshot();

    assert_eq!(*s2.cached(&root_counts), vec![1]);
    assert_eq!(s2.cache_stats().full_computes, 1);
}

#[test]
fn disabled_cache_still_answers() {
    let ws = Workspace::new();
    let config = StoreConfig::new().with_query_cache(QueryCacheConfig::default().with_enabled(false));
    let mut builder = Builder::with_config(Arc::clone(&ws.registry), config);
    with_modules(&ws, &mut builder, 3);
    let snapshot = builder.to_snapshot();
    let query = names(&ws);

    assert_eq!(snapshot.cached(&query).len(), 3);
    assert_eq!(snapshot.cache_stats().entries, 0);
}

#[test]
fn caches_are_per_snapshot() {
    let ws = Workspace::new();
    let mut builder = ws.builder();
    with_modules(&ws, &mut builder, 3);
    let s1 = builder.to_snapshot();
    let query = names(&ws);
    s1.cached(&query);

    let unrelated = Snapshot::empty(Arc::clone(&ws.registry));
    assert!(unrelated.cached(&query).is_empty());
    assert_eq!(s1.cached(&query).len(), 3);
}
