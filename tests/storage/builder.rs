//! Integration tests for builders and snapshots
//!
//! Tests adding, modifying and removing entities, sealing, and isolation.

use std::sync::Arc;

use wsmodel_foundation::{ErrorKind, Value};
use wsmodel_storage::{EntityStorage, Snapshot, StoreConfig};

use crate::workspace::{Workspace, gradle};

// =============================================================================
// Adding
// =============================================================================

#[test]
fn add_then_resolve_returns_current_attributes() {
    let ws = Workspace::new();
    let mut builder = ws.builder();
    let core = ws.add_module(&mut builder, "core", &[]);

    let resolved = builder.resolve(&ws.module_sid("core")).unwrap();
    assert_eq!(resolved.id(), core.id());
    assert_eq!(resolved.get("name"), Some(&Value::from("core")));
    assert_eq!(resolved.source(), &gradle());

    builder
        .modify_entity(core.id(), |e| {
            e.set("sdk", "17");
        })
        .unwrap();
    let resolved = builder.resolve(&ws.module_sid("core")).unwrap();
    assert_eq!(resolved.get("sdk"), Some(&Value::from("17")));
}

#[test]
fn duplicate_symbolic_id_fails_the_call_only() {
    let ws = Workspace::new();
    let mut builder = ws.builder();
    ws.add_module(&mut builder, "core", &[]);

    let err = builder
        .add_entity(ws.module, [("name", Value::from("core"))], gradle())
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::DuplicateSymbolicId(_)));
    assert_eq!(builder.count(ws.module), 1);

    ws.add_module(&mut builder, "app", &[]);
    assert_eq!(builder.count(ws.module), 2);
}

#[test]
fn missing_parent_is_a_dangling_hard_reference() {
    let ws = Workspace::new();
    let mut builder = ws.builder();
    let err = builder
        .add_entity(
            ws.root,
            [
                ("url", Value::from("file:///core")),
                ("module", Value::from(ws.module_sid("core"))),
            ],
            gradle(),
        )
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::DanglingHardReference { .. }));
    assert_eq!(builder.entity_count(), 0);
}

#[test]
fn entities_iterate_in_insertion_order() {
    let ws = Workspace::new();
    let mut builder = ws.builder();
    for name in ["c", "a", "b"] {
        ws.add_module(&mut builder, name, &[]);
    }
    let names: Vec<_> = builder
        .entities(ws.module)
        .map(|m| m.get("name").cloned().unwrap())
        .collect();
    assert_eq!(names, vec![Value::from("c"), Value::from("a"), Value::from("b")]);
}

// =============================================================================
// Removing
// =============================================================================

#[test]
fn removing_a_parent_cascades_to_owned_children() {
    let ws = Workspace::new();
    let mut builder = ws.builder();
    let core = ws.add_module(&mut builder, "core", &[]);
    let main = ws.add_root(&mut builder, core.id(), "file:///core/main");
    let test = ws.add_root(&mut builder, core.id(), "file:///core/test");

    let removed = builder.remove_entity(core.id()).unwrap();
    assert_eq!(removed[0], core.id());
    assert_eq!(removed.len(), 3);
    assert!(!builder.contains(main.id()));
    assert!(!builder.contains(test.id()));
    assert_eq!(builder.count(ws.root), 0);
}

#[test]
fn removing_a_parent_nullifies_optional_children() {
    let ws = Workspace::new();
    let mut builder = ws.builder();
    let core = ws.add_module(&mut builder, "core", &[]);
    let facet = builder
        .add_entity(
            ws.facet,
            [("kind", Value::from("kotlin")), ("module", Value::from(core.id()))],
            gradle(),
        )
        .unwrap();

    builder.remove_entity(core.id()).unwrap();
    let facet = builder.entity(facet.id()).unwrap();
    assert_eq!(facet.get("module"), Some(&Value::Nil));
}

#[test]
fn removing_missing_entity_fails() {
    let ws = Workspace::new();
    let mut builder = ws.builder();
    let core = ws.add_module(&mut builder, "core", &[]);
    builder.remove_entity(core.id()).unwrap();

    let err = builder.remove_entity(core.id()).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::EntityNotFound(_)));
}

#[test]
fn ids_are_never_reused() {
    let ws = Workspace::new();
    let mut builder = ws.builder();
    let first = ws.add_module(&mut builder, "core", &[]);
    builder.remove_entity(first.id()).unwrap();
    let second = ws.add_module(&mut builder, "core", &[]);
    assert_ne!(first.id(), second.id());
}

// =============================================================================
// Snapshots
// =============================================================================

#[test]
fn to_builder_after_to_snapshot_is_isolated() {
    let ws = Workspace::new();
    let mut builder = ws.builder();
    let core = ws.add_module(&mut builder, "core", &[]);
    let snapshot = builder.to_snapshot();

    let mut derived = snapshot.to_builder();
    derived
        .modify_entity(core.id(), |e| {
            e.set("sdk", "21");
        })
        .unwrap();
    ws.add_module(&mut derived, "app", &[]);

    assert_eq!(snapshot.count(ws.module), 1);
    assert_eq!(snapshot.entity(core.id()).unwrap().get("sdk"), None);
    assert_eq!(derived.count(ws.module), 2);
}

#[test]
fn builder_stays_usable_after_sealing() {
    let ws = Workspace::new();
    let mut builder = ws.builder();
    ws.add_module(&mut builder, "core", &[]);
    let first = builder.to_snapshot();
    ws.add_module(&mut builder, "app", &[]);
    let second = builder.to_snapshot();

    assert_eq!(first.count(ws.module), 1);
    assert_eq!(second.count(ws.module), 2);
}

#[test]
fn generations_increase_along_a_chain() {
    let ws = Workspace::new();
    let empty = Snapshot::empty(Arc::clone(&ws.registry));
    let first = empty.to_builder().to_snapshot();
    let second = first.to_builder().to_snapshot();

    assert_eq!(empty.generation(), 0);
    assert_eq!(first.generation(), 1);
    assert_eq!(second.generation(), 2);
    assert!(second.content_eq(&empty));
}

#[test]
fn has_changes_tracks_edits() {
    let ws = Workspace::new();
    let mut builder = ws.builder();
    assert!(!builder.has_changes());
    let core = ws.add_module(&mut builder, "core", &[]);
    assert!(builder.has_changes());

    let mut derived = builder.to_snapshot().to_builder();
    derived.modify_entity(core.id(), |_| {}).unwrap();
    assert!(!derived.has_changes());
}

#[test]
fn config_travels_with_snapshots() {
    let ws = Workspace::new();
    let builder = wsmodel_storage::Builder::with_config(
        Arc::clone(&ws.registry),
        StoreConfig::without_orphanage(),
    );
    let snapshot = builder.to_snapshot();
    assert!(!snapshot.config().orphanage_enabled);
    assert!(!snapshot.to_builder().to_snapshot().config().orphanage_enabled);
}

#[test]
fn snapshots_can_be_read_from_many_threads() {
    let ws = Workspace::new();
    let mut builder = ws.builder();
    for i in 0..100 {
        ws.add_module(&mut builder, &format!("m{i}"), &[]);
    }
    let snapshot = builder.to_snapshot();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let snapshot = snapshot.clone();
            let module = ws.module;
            std::thread::spawn(move || snapshot.entities(module).count())
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), 100);
    }
}
