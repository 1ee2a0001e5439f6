//! Entity type schemas and the type registry.
//!
//! A schema declares an entity type's attributes, which of them are hard
//! (owning) or soft (symbolic) references, and which attributes form the
//! type's symbolic key.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use wsmodel_foundation::{EntityTypeId, Error, Result, SymbolicId, Type, Value, WsMap};
use xxhash_rust::xxh3::xxh3_64;

/// What happens to a child when its parent is removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OnDelete {
    /// Remove the child as well. The parent field is required.
    Cascade,
    /// Set the child's parent field to nil. The parent field is optional.
    Nullify,
}

/// How a field stores its value.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldKind {
    /// Plain data of the given type.
    Data(Type),
    /// Hard reference to an owning entity of type `target`.
    Parent {
        /// Target type name.
        target: Arc<str>,
        /// Behavior when the parent is removed.
        on_delete: OnDelete,
    },
    /// Soft reference holding one symbolic id of type `target`.
    SoftRef {
        /// Target type name.
        target: Arc<str>,
    },
    /// Soft reference holding a list of symbolic ids of type `target`.
    SoftRefs {
        /// Target type name.
        target: Arc<str>,
    },
}

/// Schema definition for an entity attribute.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldSchema {
    /// Attribute name.
    pub name: Arc<str>,
    /// Storage kind.
    pub kind: FieldKind,
    /// Default value if not provided.
    pub default: Option<Value>,
    /// Whether the attribute is required.
    pub required: bool,
}

impl FieldSchema {
    /// Creates a required field with no default.
    #[must_use]
    pub fn required(name: impl Into<Arc<str>>, ty: Type) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Data(ty),
            default: None,
            required: true,
        }
    }

    /// Creates an optional field with a default value.
    #[must_use]
    pub fn optional(name: impl Into<Arc<str>>, ty: Type, default: Value) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Data(ty),
            default: Some(default),
            required: false,
        }
    }

    /// Creates an optional field with no default (will be absent).
    #[must_use]
    pub fn optional_nil(name: impl Into<Arc<str>>, ty: Type) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Data(Type::option(ty)),
            default: None,
            required: false,
        }
    }

    /// Creates a hard reference to a parent entity.
    ///
    /// Cascading parents are required; nullifying parents are optional.
    #[must_use]
    pub fn parent(name: impl Into<Arc<str>>, target: impl Into<Arc<str>>, on_delete: OnDelete) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Parent {
                target: target.into(),
                on_delete,
            },
            default: None,
            required: on_delete == OnDelete::Cascade,
        }
    }

    /// Creates an optional soft reference to a single entity.
    #[must_use]
    pub fn soft_ref(name: impl Into<Arc<str>>, target: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::SoftRef {
                target: target.into(),
            },
            default: None,
            required: false,
        }
    }

    /// Creates a soft reference list, empty by default.
    #[must_use]
    pub fn soft_refs(name: impl Into<Arc<str>>, target: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::SoftRefs {
                target: target.into(),
            },
            default: Some(Value::List(wsmodel_foundation::WsVec::new())),
            required: false,
        }
    }

    /// Returns the type values of this field must satisfy once stored.
    #[must_use]
    pub fn value_type(&self) -> Type {
        match &self.kind {
            FieldKind::Data(ty) => ty.clone(),
            FieldKind::Parent {
                on_delete: OnDelete::Cascade,
                ..
            } => Type::EntityRef,
            FieldKind::Parent {
                on_delete: OnDelete::Nullify,
                ..
            } => Type::option(Type::EntityRef),
            FieldKind::SoftRef { .. } => Type::option(Type::Symbolic),
            FieldKind::SoftRefs { .. } => Type::list(Type::Symbolic),
        }
    }
}

/// Schema definition for an entity type.
#[derive(Clone, Debug, PartialEq)]
pub struct EntityTypeSchema {
    /// Type name (e.g., `Module`, `ContentRoot`).
    pub name: Arc<str>,
    /// Field definitions.
    pub fields: Vec<FieldSchema>,
    /// Names of the fields forming the symbolic id, in key order.
    /// Empty when the type has no symbolic id.
    pub symbolic_key: Vec<Arc<str>>,
}

impl EntityTypeSchema {
    /// Creates a new entity type schema.
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            symbolic_key: Vec::new(),
        }
    }

    /// Adds a field to the schema.
    #[must_use]
    pub fn with_field(mut self, field: FieldSchema) -> Self {
        self.fields.push(field);
        self
    }

    /// Declares the fields forming the symbolic id.
    #[must_use]
    pub fn with_symbolic_key<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        self.symbolic_key = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Returns the field schema by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| &*f.name == name)
    }
}

/// A hard reference field with its target resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParentField {
    /// Attribute name.
    pub name: Arc<str>,
    /// Owning entity type.
    pub target: EntityTypeId,
    /// Behavior when the parent is removed.
    pub on_delete: OnDelete,
}

/// A soft reference field with its target resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SoftRefField {
    /// Attribute name.
    pub name: Arc<str>,
    /// Referenced entity type.
    pub target: EntityTypeId,
}

/// A registered entity type.
#[derive(Clone, Debug)]
pub struct EntityType {
    /// Assigned type id.
    pub id: EntityTypeId,
    /// The schema as registered.
    pub schema: EntityTypeSchema,
    /// Hard reference fields.
    pub parents: Vec<ParentField>,
    /// Soft reference fields.
    pub soft_refs: Vec<SoftRefField>,
}

impl EntityType {
    /// Returns the type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.schema.name
    }

    /// Returns true if this type has a symbolic id.
    #[must_use]
    pub fn has_symbolic_id(&self) -> bool {
        !self.schema.symbolic_key.is_empty()
    }

    /// Returns the hard reference field with the given name.
    #[must_use]
    pub fn parent_field(&self, name: &str) -> Option<&ParentField> {
        self.parents.iter().find(|p| &*p.name == name)
    }
}

/// Registry of entity types.
///
/// Types are assigned ids in registration order. The registry is built once
/// and then shared (behind an `Arc`) by every storage using it.
#[derive(Clone, Debug, Default)]
pub struct TypeRegistry {
    types: Vec<EntityType>,
    by_name: HashMap<Arc<str>, EntityTypeId>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an entity type.
    ///
    /// Reference targets must already be registered, except that a type may
    /// reference itself.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is taken, a field name repeats, a
    /// reference target is unknown, or the symbolic key names a missing or
    /// hard reference field.
    pub fn register(&mut self, schema: EntityTypeSchema) -> Result<EntityTypeId> {
        if self.by_name.contains_key(&schema.name) {
            return Err(Error::schema_registration(format!(
                "entity type {} is already registered",
                schema.name
            )));
        }

        let id = EntityTypeId::new(u32::try_from(self.types.len()).map_err(|_| {
            Error::schema_registration("too many entity types".to_string())
        })?);

        let resolve_target = |target: &Arc<str>| -> Result<EntityTypeId> {
            if *target == schema.name {
                return Ok(id);
            }
            self.by_name.get(target).copied().ok_or_else(|| {
                Error::schema_registration(format!(
                    "{} references unknown entity type {target}",
                    schema.name
                ))
            })
        };

        let mut parents = Vec::new();
        let mut soft_refs = Vec::new();
        for (i, field) in schema.fields.iter().enumerate() {
            if schema.fields[..i].iter().any(|f| f.name == field.name) {
                return Err(Error::schema_registration(format!(
                    "{} declares field {} twice",
                    schema.name, field.name
                )));
            }
            match &field.kind {
                FieldKind::Data(_) => {}
                FieldKind::Parent { target, on_delete } => parents.push(ParentField {
                    name: field.name.clone(),
                    target: resolve_target(target)?,
                    on_delete: *on_delete,
                }),
                FieldKind::SoftRef { target } | FieldKind::SoftRefs { target } => {
                    soft_refs.push(SoftRefField {
                        name: field.name.clone(),
                        target: resolve_target(target)?,
                    });
                }
            }
        }

        for key in &schema.symbolic_key {
            match schema.field(key) {
                None => {
                    return Err(Error::schema_registration(format!(
                        "{} symbolic key names unknown field {key}",
                        schema.name
                    )));
                }
                Some(FieldSchema {
                    kind: FieldKind::Parent { .. },
                    ..
                }) => {
                    return Err(Error::schema_registration(format!(
                        "{} symbolic key cannot use hard reference {key}",
                        schema.name
                    )));
                }
                Some(_) => {}
            }
        }

        self.by_name.insert(schema.name.clone(), id);
        self.types.push(EntityType {
            id,
            schema,
            parents,
            soft_refs,
        });
        Ok(id)
    }

    /// Returns the number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns true if no types are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Gets a registered type by id.
    #[must_use]
    pub fn get(&self, id: EntityTypeId) -> Option<&EntityType> {
        self.types.get(id.index() as usize)
    }

    /// Gets a registered type by id, failing if it is unknown.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEntityType` if no type has this id.
    pub fn require(&self, id: EntityTypeId) -> Result<&EntityType> {
        self.get(id)
            .ok_or_else(|| Error::unknown_entity_type(format!("{id:?}")))
    }

    /// Looks up a type id by name.
    #[must_use]
    pub fn id_of(&self, name: &str) -> Option<EntityTypeId> {
        self.by_name.get(name).copied()
    }

    /// Iterates registered types in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &EntityType> {
        self.types.iter()
    }

    /// Builds a symbolic id for `ty` from explicit key values.
    #[must_use]
    pub fn symbolic_id(&self, ty: EntityTypeId, key: impl IntoIterator<Item = Value>) -> SymbolicId {
        SymbolicId::new(ty, key)
    }

    /// Computes the symbolic id of an entity from its attributes.
    #[must_use]
    pub fn compute_symbolic_id(
        &self,
        ty: EntityTypeId,
        attributes: &WsMap<Arc<str>, Value>,
    ) -> Option<SymbolicId> {
        let entity_type = self.get(ty)?;
        if !entity_type.has_symbolic_id() {
            return None;
        }
        Some(SymbolicId::new(
            ty,
            entity_type
                .schema
                .symbolic_key
                .iter()
                .map(|k| attributes.get(k).cloned().unwrap_or(Value::Nil)),
        ))
    }

    /// Validates attributes against a type's schema and fills defaults.
    ///
    /// # Errors
    ///
    /// Returns `SchemaViolation` for unknown attributes, missing required
    /// attributes, ill-typed values, and soft references to the wrong type.
    pub fn validate(
        &self,
        ty: EntityTypeId,
        attributes: WsMap<Arc<str>, Value>,
    ) -> Result<WsMap<Arc<str>, Value>> {
        let entity_type = self.require(ty)?;
        let schema = &entity_type.schema;

        for name in attributes.keys() {
            if schema.field(name).is_none() {
                return Err(Error::schema_violation(
                    &*schema.name,
                    format!("unknown attribute {name}"),
                ));
            }
        }

        let mut attributes = attributes;
        for field in &schema.fields {
            match attributes.get(&field.name) {
                Some(value) => {
                    let expected = field.value_type();
                    if !expected.admits(value) {
                        return Err(Error::schema_violation(
                            &*schema.name,
                            format!("{} expects {expected}, got {value:?}", field.name),
                        ));
                    }
                }
                None => {
                    if let Some(default) = &field.default {
                        attributes = attributes.insert(field.name.clone(), default.clone());
                    } else if field.required {
                        return Err(Error::schema_violation(
                            &*schema.name,
                            format!("missing required attribute {}", field.name),
                        ));
                    }
                }
            }
        }

        for soft in &entity_type.soft_refs {
            if let Some(value) = attributes.get(&soft.name) {
                if let Some(wrong) = value.symbolic_refs().iter().find(|s| s.type_id != soft.target) {
                    return Err(Error::schema_violation(
                        &*schema.name,
                        format!("{} cannot reference {wrong}", soft.name),
                    ));
                }
            }
        }

        Ok(attributes)
    }

    /// Hash of every registered schema, in registration order.
    ///
    /// Cache files record this hash and are rejected when it differs.
    #[must_use]
    pub fn schema_hash(&self) -> u64 {
        let mut canonical = String::new();
        for entity_type in &self.types {
            let schema = &entity_type.schema;
            let _ = write!(canonical, "type {}:{};", entity_type.id.index(), schema.name);
            for field in &schema.fields {
                let _ = write!(
                    canonical,
                    "field {}:{:?}:{}:{:?};",
                    field.name, field.kind, field.required, field.default
                );
            }
            let _ = write!(canonical, "key {:?};", schema.symbolic_key);
        }
        xxh3_64(canonical.as_bytes())
    }
}
