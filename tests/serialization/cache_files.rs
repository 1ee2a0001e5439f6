//! Integration tests for serialize_cache and deserialize_cache

use std::sync::Arc;

use wsmodel_foundation::{EntitySource, ErrorKind, Type, Value};
use wsmodel_runtime::{deserialize_cache, deserialize_cache_with_config, from_bytes, serialize_cache, to_bytes};
use wsmodel_storage::{
    EntityStorage, EntityTypeSchema, ExternalMappingKey, FieldSchema, Snapshot, StoreConfig, TypeRegistry,
};

use crate::workspace::Workspace;

fn populated(ws: &Workspace) -> Snapshot {
    let mut builder = ws.builder();
    let core = ws.add_module(&mut builder, "core", &[]);
    let app = ws.add_module(&mut builder, "app", &["core", "missing"]);
    ws.add_root(&mut builder, core.id(), "file:///core");
    builder
        .add_entity(
            ws.facet,
            [("kind", Value::from("android")), ("module", Value::from(app.id()))],
            EntitySource::protected("ide"),
        )
        .unwrap();
    builder
        .add_entity(
            ws.root,
            [
                ("url", Value::from("file:///pending")),
                ("module", Value::from(ws.module_sid("pending"))),
            ],
            EntitySource::Orphan,
        )
        .unwrap();
    builder
        .mutable_external_mapping(&ExternalMappingKey::new("bridges"))
        .add_mapping(app.id(), "app-bridge")
        .unwrap();
    builder.to_snapshot()
}

#[test]
fn file_round_trip_is_content_equal() {
    let ws = Workspace::new();
    let snapshot = populated(&ws);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("workspace.cache");

    serialize_cache(&path, &snapshot).unwrap();
    let restored = deserialize_cache(&path, Arc::clone(&ws.registry)).unwrap();

    assert!(restored.content_eq(&snapshot));
    assert_eq!(restored.orphans().len(), 1);
    assert_eq!(restored.referrers(&ws.module_sid("missing"), ws.module).count(), 1);
}

#[test]
fn restored_snapshot_continues_as_a_base() {
    let ws = Workspace::new();
    let snapshot = populated(&ws);
    let restored = from_bytes(&to_bytes(&snapshot).unwrap(), Arc::clone(&ws.registry)).unwrap();

    let mut builder = restored.to_builder();
    let pending = ws.add_module(&mut builder, "pending", &[]);
    let fresh = ws.add_module(&mut builder, "fresh", &[]);

    assert_eq!(builder.children(pending.id(), ws.root).count(), 1);
    assert!(snapshot.entities(ws.module).all(|m| m.id() != fresh.id()));
    assert!(builder.orphans().is_empty());
}

#[test]
fn load_takes_supplied_config() {
    let ws = Workspace::new();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("workspace.cache");
    serialize_cache(&path, &populated(&ws)).unwrap();

    let restored =
        deserialize_cache_with_config(&path, Arc::clone(&ws.registry), StoreConfig::without_orphanage()).unwrap();
    assert!(!restored.config().orphanage_enabled);
}

#[test]
fn changed_schemas_reject_the_cache() {
    let ws = Workspace::new();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("workspace.cache");
    serialize_cache(&path, &populated(&ws)).unwrap();

    let mut evolved = TypeRegistry::new();
    evolved
        .register(
            EntityTypeSchema::new("Module")
                .with_field(FieldSchema::required("name", Type::String))
                .with_field(FieldSchema::required("group", Type::String))
                .with_symbolic_key(["name"]),
        )
        .unwrap();

    let err = deserialize_cache(&path, Arc::new(evolved)).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::SchemaHashMismatch { .. }));
    assert!(err.should_rebuild());
}

#[test]
fn damaged_file_asks_for_rebuild() {
    let ws = Workspace::new();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("workspace.cache");
    serialize_cache(&path, &populated(&ws)).unwrap();

    let mut bytes = std::fs::read(&path).unwrap();
    let last = bytes.len() - 8;
    bytes[last] ^= 0x5A;
    std::fs::write(&path, &bytes).unwrap();

    let err = deserialize_cache(&path, Arc::clone(&ws.registry)).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::CorruptCacheFile(_)));
    assert!(err.should_rebuild());
}

#[test]
fn empty_snapshot_round_trips() {
    let ws = Workspace::new();
    let empty = Snapshot::empty(Arc::clone(&ws.registry));
    let restored = from_bytes(&to_bytes(&empty).unwrap(), Arc::clone(&ws.registry)).unwrap();
    assert!(restored.content_eq(&empty));
    assert_eq!(restored.entity_count(), 0);
}
