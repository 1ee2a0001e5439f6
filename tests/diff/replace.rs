//! Integration tests for replace_by_source

use wsmodel_foundation::{EntitySource, Value};
use wsmodel_storage::{Builder, EntityStorage, Snapshot};

use crate::workspace::Workspace;

fn maven() -> EntitySource {
    EntitySource::named("maven")
}

fn add(ws: &Workspace, builder: &mut Builder, name: &str, sdk: &str, source: EntitySource) -> wsmodel_storage::Entity {
    builder
        .add_entity(ws.module, [("name", name), ("sdk", sdk)], source)
        .unwrap()
}

fn module_view(ws: &Workspace, storage: &impl EntityStorage) -> Vec<(String, Option<Value>)> {
    let mut view: Vec<_> = storage
        .entities(ws.module)
        .filter(|e| e.source() == &maven())
        .map(|e| {
            (
                e.get("name").and_then(Value::as_str).unwrap_or_default().to_owned(),
                e.get("sdk").cloned(),
            )
        })
        .collect();
    view.sort_by(|a, b| a.0.cmp(&b.0));
    view
}

#[test]
fn stale_attributes_are_dropped() {
    let ws = Workspace::new();
    let mut target = ws.builder();
    let m1 = add(&ws, &mut target, "m1", "11", maven());

    let mut replacement = ws.builder();
    replacement
        .add_entity(ws.module, [("name", "m1")], maven())
        .unwrap();

    target.replace_by_source(|s| *s == maven(), &replacement).unwrap();
    let m1 = target.entity(m1.id()).unwrap();
    assert_eq!(m1.get("sdk"), None);
}

#[test]
fn all_miss_predicate_is_a_no_op() {
    let ws = Workspace::new();
    let mut target = ws.builder();
    add(&ws, &mut target, "m1", "11", maven());
    let before = target.to_snapshot();

    let mut replacement = ws.builder();
    add(&ws, &mut replacement, "m2", "17", maven());

    let mut after = before.to_builder();
    after
        .replace_by_source(|s| s.name() == Some("nothing"), &replacement)
        .unwrap();
    assert!(after.collect_changes().is_empty());
    assert!(after.to_snapshot().content_eq(&before));
}

#[test]
fn target_converges_to_the_replacement_subset() {
    let ws = Workspace::new();
    let mut target = ws.builder();
    add(&ws, &mut target, "a", "11", maven());
    add(&ws, &mut target, "b", "11", maven());
    let ide = add(&ws, &mut target, "ide-only", "11", EntitySource::protected("ide"));

    let mut replacement = ws.builder();
    add(&ws, &mut replacement, "b", "17", maven());
    add(&ws, &mut replacement, "c", "17", maven());

    target.replace_by_source(|s| *s == maven(), &replacement).unwrap();

    assert_eq!(module_view(&ws, &target), module_view(&ws, &replacement));
    assert!(target.contains(ide.id()));
}

#[test]
fn replacing_from_a_snapshot() {
    let ws = Workspace::new();
    let mut target = ws.builder();
    add(&ws, &mut target, "a", "11", maven());

    let mut incoming = ws.builder();
    add(&ws, &mut incoming, "a", "21", maven());
    let incoming: Snapshot = incoming.to_snapshot();

    target.replace_by_source(|s| *s == maven(), &incoming).unwrap();
    assert_eq!(module_view(&ws, &target), module_view(&ws, &incoming));
}

#[test]
fn soft_references_follow_renamed_replacements() {
    let ws = Workspace::new();
    let mut target = ws.builder();
    add(&ws, &mut target, "lib", "11", maven());
    let app = target
        .add_entity(
            ws.module,
            [
                ("name", Value::from("app")),
                ("dependencies", Value::from(vec![ws.module_sid("lib")])),
            ],
            EntitySource::protected("ide"),
        )
        .unwrap();

    let mut replacement = ws.builder();
    add(&ws, &mut replacement, "lib", "17", maven());
    target.replace_by_source(|s| *s == maven(), &replacement).unwrap();

    let lib = target.resolve(&ws.module_sid("lib")).unwrap();
    assert_eq!(lib.get("sdk"), Some(&Value::from("17")));
    let referrers: Vec<_> = target.referrers(&ws.module_sid("lib"), ws.module).map(|e| e.id()).collect();
    assert_eq!(referrers, vec![app.id()]);
}

#[test]
fn replacement_children_are_rebuilt() {
    let ws = Workspace::new();
    let mut target = ws.builder();
    let m = add(&ws, &mut target, "m", "11", maven());
    target
        .add_entity(
            ws.root,
            [("url", Value::from("file:///m/old")), ("module", Value::from(m.id()))],
            maven(),
        )
        .unwrap();

    let mut replacement = ws.builder();
    let r = add(&ws, &mut replacement, "m", "11", maven());
    replacement
        .add_entity(
            ws.root,
            [("url", Value::from("file:///m/new")), ("module", Value::from(r.id()))],
            maven(),
        )
        .unwrap();

    target.replace_by_source(|s| *s == maven(), &replacement).unwrap();
    let urls: Vec<_> = target
        .children(m.id(), ws.root)
        .map(|e| e.get("url").cloned().unwrap())
        .collect();
    assert_eq!(urls, vec![Value::from("file:///m/new")]);
}
