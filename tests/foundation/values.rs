//! Integration tests for values, identifiers and sources
//!
//! Tests value conversions, type admission, symbolic id retargeting and provenance tags.

use wsmodel_foundation::{EntityId, EntitySource, EntityTypeId, SymbolicId, Type, Value};

const MODULE: EntityTypeId = EntityTypeId::new(0);
const LIBRARY: EntityTypeId = EntityTypeId::new(1);

fn module(name: &str) -> SymbolicId {
    SymbolicId::new(MODULE, [Value::from(name)])
}

// =============================================================================
// Conversions
// =============================================================================

#[test]
fn value_from_primitives() {
    assert_eq!(Value::from(true), Value::Bool(true));
    assert_eq!(Value::from(7_i64), Value::Int(7));
    assert_eq!(Value::from("core").as_str(), Some("core"));
    assert_eq!(Value::from(String::from("core")), Value::from("core"));
}

#[test]
fn value_from_option() {
    assert_eq!(Value::from(None::<&str>), Value::Nil);
    assert_eq!(Value::from(Some("jdk-17")), Value::from("jdk-17"));
}

#[test]
fn value_from_identifiers() {
    let id = EntityId::new(MODULE, 3);
    assert_eq!(Value::from(id).as_entity(), Some(id));
    assert_eq!(Value::from(module("core")).as_symbolic(), Some(&module("core")));
}

#[test]
fn value_list_from_vec() {
    let list = Value::from(vec![module("a"), module("b")]);
    assert_eq!(list.as_list().map(|l| l.len()), Some(2));
    assert_eq!(list.symbolic_refs(), vec![module("a"), module("b")]);
}

// =============================================================================
// Types
// =============================================================================

#[test]
fn type_admits_matching_values() {
    assert!(Type::String.admits(&Value::from("x")));
    assert!(!Type::String.admits(&Value::Int(1)));
    assert!(Type::Float.admits(&Value::Int(1)));
    assert!(Type::option(Type::String).admits(&Value::Nil));
    assert!(Type::Any.admits(&Value::Bool(false)));
}

#[test]
fn list_type_checks_elements() {
    let deps = Type::list(Type::Symbolic);
    assert!(deps.admits(&Value::from(vec![module("a")])));
    assert!(!deps.admits(&Value::from(vec![Value::from("a")])));
}

// =============================================================================
// Symbolic Ids
// =============================================================================

#[test]
fn symbolic_ids_are_scoped_by_type() {
    let as_module = SymbolicId::new(MODULE, [Value::from("core")]);
    let as_library = SymbolicId::new(LIBRARY, [Value::from("core")]);
    assert_ne!(as_module, as_library);
    assert_eq!(as_module, module("core"));
}

#[test]
fn retarget_rewrites_direct_and_listed_references() {
    let direct = Value::from(module("old"));
    assert_eq!(direct.retarget(&module("old"), &module("new")), Some(Value::from(module("new"))));

    let list = Value::from(vec![module("a"), module("old")]);
    assert_eq!(
        list.retarget(&module("old"), &module("new")),
        Some(Value::from(vec![module("a"), module("new")]))
    );
}

#[test]
fn retarget_leaves_unrelated_values_alone() {
    assert_eq!(Value::from("old").retarget(&module("old"), &module("new")), None);
    assert_eq!(
        Value::from(vec![module("a")]).retarget(&module("old"), &module("new")),
        None
    );
}

#[test]
fn composite_ids_embed_their_targets() {
    let composite = SymbolicId::new(LIBRARY, [Value::from(module("core")), Value::from("guava")]);
    assert!(composite.embeds(&module("core")));
    assert!(!composite.embeds(&module("app")));

    let rewritten = Value::from(composite).retarget(&module("core"), &module("base")).unwrap();
    let expected = SymbolicId::new(LIBRARY, [Value::from(module("base")), Value::from("guava")]);
    assert_eq!(rewritten, Value::from(expected));
}

#[test]
fn symbolic_id_display() {
    assert_eq!(format!("{}", module("core")), "#0[core]");
}

// =============================================================================
// Sources
// =============================================================================

#[test]
fn sources_compare_by_kind_and_name() {
    assert_eq!(EntitySource::named("gradle"), EntitySource::named("gradle"));
    assert_ne!(EntitySource::named("gradle"), EntitySource::protected("gradle"));
    assert_ne!(EntitySource::named("gradle"), EntitySource::Orphan);
}

#[test]
fn source_accessors() {
    assert_eq!(EntitySource::protected("ide").name(), Some("ide"));
    assert!(EntitySource::protected("ide").is_protected());
    assert!(EntitySource::Orphan.is_orphan());
    assert_eq!(EntitySource::Orphan.name(), None);
}
