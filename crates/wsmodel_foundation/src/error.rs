//! Error types for the workspace model.
//!
//! Uses `thiserror` for ergonomic error definition with rich context.

use std::fmt;

use thiserror::Error;

use crate::entity::EntityId;
use crate::symbolic::SymbolicId;

/// The main error type for workspace model operations.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,
    /// Optional context about where the error occurred.
    pub context: Option<ErrorContext>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    /// Adds context to this error.
    #[must_use]
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Creates a duplicate symbolic id error.
    #[must_use]
    pub fn duplicate_symbolic_id(id: SymbolicId) -> Self {
        Self::new(ErrorKind::DuplicateSymbolicId(id))
    }

    /// Creates a dangling hard reference error.
    #[must_use]
    pub fn dangling_hard_reference(field: impl Into<String>, parent: impl Into<String>) -> Self {
        Self::new(ErrorKind::DanglingHardReference {
            field: field.into(),
            parent: parent.into(),
        })
    }

    /// Creates an entity not found error.
    #[must_use]
    pub fn entity_not_found(id: EntityId) -> Self {
        Self::new(ErrorKind::EntityNotFound(id))
    }

    /// Creates an unknown entity type error.
    #[must_use]
    pub fn unknown_entity_type(name: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownEntityType(name.into()))
    }

    /// Creates a schema violation error.
    #[must_use]
    pub fn schema_violation(entity_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SchemaViolation {
            entity_type: entity_type.into(),
            message: message.into(),
        })
    }

    /// Creates a schema registration error.
    #[must_use]
    pub fn schema_registration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SchemaRegistration(message.into()))
    }

    /// Creates a corrupt cache file error.
    #[must_use]
    pub fn corrupt_cache(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CorruptCacheFile(message.into()))
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal(message.into()))
    }

    /// Returns true if the caller should discard the cache and rebuild
    /// the model from scratch.
    #[must_use]
    pub const fn should_rebuild(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::SerializationVersionMismatch { .. }
                | ErrorKind::SchemaHashMismatch { .. }
                | ErrorKind::CorruptCacheFile(_)
                | ErrorKind::Io(_)
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::new(ErrorKind::Io(err.to_string()))
    }
}

/// Categorized error kinds for pattern matching.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// Another entity of the same type already has this symbolic id.
    #[error("duplicate symbolic id: {0}")]
    DuplicateSymbolicId(SymbolicId),

    /// A required parent reference does not resolve to a live entity.
    #[error("dangling hard reference in field {field}: {parent}")]
    DanglingHardReference {
        /// The parent field.
        field: String,
        /// The unresolved parent, as displayed.
        parent: String,
    },

    /// Entity was not found in storage.
    #[error("entity not found: {0:?}")]
    EntityNotFound(EntityId),

    /// Entity type is not registered.
    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),

    /// Attributes do not match the entity type's schema.
    #[error("schema violation on {entity_type}: {message}")]
    SchemaViolation {
        /// The entity type being validated.
        entity_type: String,
        /// What went wrong.
        message: String,
    },

    /// A schema could not be registered.
    #[error("schema registration failed: {0}")]
    SchemaRegistration(String),

    /// The cache file was written by a different format version.
    #[error("cache format version mismatch: expected {expected}, found {found}")]
    SerializationVersionMismatch {
        /// The version this build reads.
        expected: u32,
        /// The version found in the file.
        found: u32,
    },

    /// The cache file was written against a different set of schemas.
    #[error("schema hash mismatch: expected {expected:#018x}, found {found:#018x}")]
    SchemaHashMismatch {
        /// The current registry's hash.
        expected: u64,
        /// The hash found in the file.
        found: u64,
    },

    /// The cache file is truncated, fails its checksum, or decodes to an
    /// inconsistent image.
    #[error("corrupt cache file: {0}")]
    CorruptCacheFile(String),

    /// I/O failure reading or writing a cache file.
    #[error("i/o error: {0}")]
    Io(String),

    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Context about where an error occurred.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// The entity type involved.
    pub entity_type: Option<String>,
    /// The entity involved.
    pub entity: Option<EntityId>,
    /// File path, for cache errors.
    pub path: Option<String>,
    /// Outer operations, innermost first.
    pub stack: Vec<String>,
}

impl ErrorContext {
    /// Creates a new empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the entity type.
    #[must_use]
    pub fn with_entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    /// Sets the entity.
    #[must_use]
    pub fn with_entity(mut self, entity: EntityId) -> Self {
        self.entity = Some(entity);
        self
    }

    /// Sets the file path.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Adds an operation frame.
    #[must_use]
    pub fn with_frame(mut self, frame: impl Into<String>) -> Self {
        self.stack.push(frame.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(entity_type) = &self.entity_type {
            write!(f, "on {entity_type}")?;
            if let Some(entity) = self.entity {
                write!(f, " {entity}")?;
            }
        }
        if let Some(path) = &self.path {
            write!(f, " in {path}")?;
        }
        if !self.stack.is_empty() {
            writeln!(f)?;
            for frame in &self.stack {
                writeln!(f, "  in {frame}")?;
            }
        }
        Ok(())
    }
}
