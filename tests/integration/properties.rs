//! Property tests over random edit sequences

use std::sync::Arc;

use proptest::prelude::*;
use wsmodel_foundation::{EntityId, EntitySource, Value};
use wsmodel_runtime::{from_bytes, to_bytes};
use wsmodel_storage::{Builder, EntityStorage, Query, Snapshot};

use crate::workspace::Workspace;

#[derive(Clone, Debug)]
enum Edit {
    AddModule { name: u8, deps: Vec<u8> },
    AddRoot { module: u8, url: u8 },
    Rename { module: u8, name: u8 },
    SetSdk { module: u8, sdk: Option<u8> },
    Remove { module: u8 },
}

fn edit() -> impl Strategy<Value = Edit> {
    prop_oneof![
        3 => (0u8..12, prop::collection::vec(0u8..12, 0..3))
            .prop_map(|(name, deps)| Edit::AddModule { name, deps }),
        2 => (0u8..12, 0u8..24).prop_map(|(module, url)| Edit::AddRoot { module, url }),
        1 => (0u8..12, 0u8..12).prop_map(|(module, name)| Edit::Rename { module, name }),
        1 => (0u8..12, prop::option::of(0u8..3)).prop_map(|(module, sdk)| Edit::SetSdk { module, sdk }),
        1 => (0u8..12).prop_map(|module| Edit::Remove { module }),
    ]
}

fn module_id(ws: &Workspace, builder: &Builder, index: u8) -> Option<EntityId> {
    builder.resolve(&ws.module_sid(&format!("m{index}"))).map(|m| m.id())
}

/// Applies an edit, ignoring edits the model rejects.
fn run(ws: &Workspace, builder: &mut Builder, edit: &Edit, source: &EntitySource) {
    match edit {
        Edit::AddModule { name, deps } => {
            let deps: Vec<_> = deps.iter().map(|d| ws.module_sid(&format!("m{d}"))).collect();
            let _ = builder.add_entity(
                ws.module,
                [("name", Value::from(format!("m{name}"))), ("dependencies", Value::from(deps))],
                source.clone(),
            );
        }
        Edit::AddRoot { module, url } => {
            if let Some(id) = module_id(ws, builder, *module) {
                let _ = builder.add_entity(
                    ws.root,
                    [("url", Value::from(format!("file:///{url}"))), ("module", Value::from(id))],
                    source.clone(),
                );
            }
        }
        Edit::Rename { module, name } => {
            if let Some(id) = module_id(ws, builder, *module) {
                let _ = builder.modify_entity(id, |e| {
                    e.set("name", format!("m{name}"));
                });
            }
        }
        Edit::SetSdk { module, sdk } => {
            if let Some(id) = module_id(ws, builder, *module) {
                let _ = builder.modify_entity(id, |e| match sdk {
                    Some(sdk) => {
                        e.set("sdk", format!("jdk-{sdk}"));
                    }
                    None => {
                        e.remove("sdk");
                    }
                });
            }
        }
        Edit::Remove { module } => {
            if let Some(id) = module_id(ws, builder, *module) {
                let _ = builder.remove_entity(id);
            }
        }
    }
}

fn build(ws: &Workspace, base: &Snapshot, edits: &[Edit]) -> Builder {
    let mut builder = base.to_builder();
    let source = EntitySource::named("gradle");
    for edit in edits {
        run(ws, &mut builder, edit, &source);
    }
    builder
}

fn sorted_view(storage: &impl EntityStorage, ws: &Workspace) -> Vec<String> {
    let mut view: Vec<String> = storage
        .entities(ws.module)
        .map(|m| format!("{:?}", (m.get("name"), m.get("sdk"), m.get("dependencies"))))
        .chain(storage.entities(ws.root).map(|r| {
            let parent = r
                .get("module")
                .and_then(Value::as_entity)
                .and_then(|p| storage.entity(p))
                .and_then(|p| p.get("name").cloned());
            format!("{:?}", (r.get("url"), parent))
        }))
        .collect();
    view.sort();
    view
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn resolve_returns_current_attributes(edits in prop::collection::vec(edit(), 0..30)) {
        let ws = Workspace::new();
        let builder = build(&ws, &Snapshot::empty(Arc::clone(&ws.registry)), &edits);
        for module in builder.entities(ws.module) {
            let sid = module.symbolic_id().unwrap();
            let resolved = builder.resolve(sid).unwrap();
            prop_assert_eq!(resolved.attributes(), module.attributes());
        }
    }

    #[test]
    fn derived_builders_never_touch_their_snapshot(
        first in prop::collection::vec(edit(), 0..20),
        second in prop::collection::vec(edit(), 0..20),
    ) {
        let ws = Workspace::new();
        let snapshot = build(&ws, &Snapshot::empty(Arc::clone(&ws.registry)), &first).to_snapshot();
        let before = sorted_view(&snapshot, &ws);

        let _derived = build(&ws, &snapshot, &second);
        prop_assert_eq!(sorted_view(&snapshot, &ws), before);
    }

    #[test]
    fn replaying_changes_reproduces_the_builder(
        first in prop::collection::vec(edit(), 0..20),
        second in prop::collection::vec(edit(), 0..20),
    ) {
        let ws = Workspace::new();
        let base = build(&ws, &Snapshot::empty(Arc::clone(&ws.registry)), &first).to_snapshot();
        let edited = build(&ws, &base, &second);

        let mut replay = base.to_builder();
        replay.apply_changes_from(&edited).unwrap();
        prop_assert!(replay.to_snapshot().content_eq(&edited.to_snapshot()));
    }

    #[test]
    fn removal_leaves_no_owned_children(edits in prop::collection::vec(edit(), 0..30), victim in 0u8..12) {
        let ws = Workspace::new();
        let mut builder = build(&ws, &Snapshot::empty(Arc::clone(&ws.registry)), &edits);
        if let Some(id) = module_id(&ws, &builder, victim) {
            let sid = ws.module_sid(&format!("m{victim}"));
            builder.remove_entity(id).unwrap();
            prop_assert_eq!(builder.children(id, ws.root).count(), 0);
            prop_assert!(builder
                .entities(ws.root)
                .all(|r| r.get("module").and_then(Value::as_entity) != Some(id)));
            prop_assert!(builder.resolve(&sid).is_none());
        }
    }

    #[test]
    fn replace_by_source_converges(
        current in prop::collection::vec(edit(), 0..20),
        incoming in prop::collection::vec(edit(), 0..20),
    ) {
        let ws = Workspace::new();
        let empty = Snapshot::empty(Arc::clone(&ws.registry));
        let mut target = build(&ws, &empty, &current);
        let replacement = build(&ws, &empty, &incoming);

        target.replace_by_source(|s| s.name() == Some("gradle"), &replacement).unwrap();
        prop_assert_eq!(sorted_view(&target, &ws), sorted_view(&replacement, &ws));
    }

    #[test]
    fn replace_by_source_with_no_match_is_a_no_op(
        current in prop::collection::vec(edit(), 0..20),
        incoming in prop::collection::vec(edit(), 0..20),
    ) {
        let ws = Workspace::new();
        let empty = Snapshot::empty(Arc::clone(&ws.registry));
        let before = build(&ws, &empty, &current).to_snapshot();
        let replacement = build(&ws, &empty, &incoming);

        let mut target = before.to_builder();
        target.replace_by_source(|_| false, &replacement).unwrap();
        prop_assert!(target.to_snapshot().content_eq(&before));
    }

    #[test]
    fn cached_equals_recomputed(
        first in prop::collection::vec(edit(), 0..20),
        second in prop::collection::vec(edit(), 0..20),
    ) {
        let ws = Workspace::new();
        let names = Query::entities(ws.module).map(|m| m.get("name").cloned().unwrap_or(Value::Nil));
        let s1 = build(&ws, &Snapshot::empty(Arc::clone(&ws.registry)), &first).to_snapshot();
        s1.cached(&names);

        let s2 = build(&ws, &s1, &second).to_snapshot();
        let incremental = s2.cached(&names);
        s2.invalidate_all();
        let recomputed = s2.cached(&names);
        prop_assert_eq!(&*incremental, &*recomputed);
        prop_assert_eq!(&*recomputed, &names.compute(&s2));
    }

    #[test]
    fn cache_bytes_round_trip(edits in prop::collection::vec(edit(), 0..30)) {
        let ws = Workspace::new();
        let snapshot = build(&ws, &Snapshot::empty(Arc::clone(&ws.registry)), &edits).to_snapshot();
        let restored = from_bytes(&to_bytes(&snapshot).unwrap(), Arc::clone(&ws.registry)).unwrap();
        prop_assert!(restored.content_eq(&snapshot));
    }
}
