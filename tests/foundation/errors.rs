//! Integration tests for Error types
//!
//! Tests error construction, display, context, and the rebuild signal.

use wsmodel_foundation::{EntityId, EntityTypeId, Error, ErrorContext, ErrorKind, SymbolicId, Value};

// =============================================================================
// Error Construction
// =============================================================================

#[test]
fn error_duplicate_symbolic_id() {
    let sid = SymbolicId::new(EntityTypeId::new(0), [Value::from("core")]);
    let err = Error::duplicate_symbolic_id(sid);
    assert!(matches!(err.kind, ErrorKind::DuplicateSymbolicId(_)));
    assert!(format!("{err}").contains("core"));
}

#[test]
fn error_dangling_hard_reference() {
    let err = Error::dangling_hard_reference("module", "#0[app]");
    assert!(matches!(err.kind, ErrorKind::DanglingHardReference { .. }));
    let msg = format!("{err}");
    assert!(msg.contains("module"));
    assert!(msg.contains("#0[app]"));
}

#[test]
fn error_entity_not_found() {
    let id = EntityId::new(EntityTypeId::new(4), 42);
    let err = Error::entity_not_found(id);
    assert!(matches!(err.kind, ErrorKind::EntityNotFound(_)));
    assert!(format!("{err}").contains("42"));
}

#[test]
fn error_schema_violation() {
    let err = Error::schema_violation("ContentRoot", "missing required attribute url");
    let msg = format!("{err}");
    assert!(msg.contains("ContentRoot"));
    assert!(msg.contains("url"));
}

#[test]
fn error_version_mismatch_display() {
    let err = Error::new(ErrorKind::SerializationVersionMismatch {
        expected: 2,
        found: 1,
    });
    let msg = format!("{err}");
    assert!(msg.contains('2'));
    assert!(msg.contains('1'));
}

// =============================================================================
// Rebuild Signal
// =============================================================================

#[test]
fn cache_failures_ask_for_rebuild() {
    let kinds = [
        Error::new(ErrorKind::SerializationVersionMismatch {
            expected: 1,
            found: 9,
        }),
        Error::new(ErrorKind::SchemaHashMismatch {
            expected: 1,
            found: 2,
        }),
        Error::corrupt_cache("checksum mismatch"),
        std::io::Error::other("disk gone").into(),
    ];
    assert!(kinds.iter().all(Error::should_rebuild));
}

#[test]
fn model_failures_do_not_ask_for_rebuild() {
    let id = EntityId::new(EntityTypeId::new(0), 1);
    assert!(!Error::entity_not_found(id).should_rebuild());
    assert!(!Error::dangling_hard_reference("module", "x").should_rebuild());
    assert!(!Error::internal("bug").should_rebuild());
}

// =============================================================================
// Context
// =============================================================================

#[test]
fn error_context_builder() {
    let id = EntityId::new(EntityTypeId::new(1), 7);
    let ctx = ErrorContext::new()
        .with_entity_type("ContentRoot")
        .with_entity(id)
        .with_path("/tmp/workspace.cache")
        .with_frame("deserialize_cache");

    assert_eq!(ctx.entity_type.as_deref(), Some("ContentRoot"));
    assert_eq!(ctx.entity, Some(id));
    assert_eq!(ctx.stack.len(), 1);

    let err = Error::corrupt_cache("bad").with_context(ctx);
    assert!(err.context.is_some());
}

#[test]
fn error_context_display() {
    let ctx = ErrorContext::new().with_path("/tmp/workspace.cache");
    assert!(format!("{ctx}").contains("/tmp/workspace.cache"));
}
