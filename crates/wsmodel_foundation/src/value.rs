//! Attribute values stored on entities.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::collections::WsVec;
use crate::entity::EntityId;
use crate::symbolic::SymbolicId;
use crate::types::Type;

/// Attribute value.
///
/// Values are immutable and cheaply cloneable (O(1) for every variant).
#[derive(Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Value {
    /// The nil value (represents absence).
    Nil,
    /// Boolean value.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit floating point.
    Float(f64),
    /// String value (names, urls, paths).
    String(Arc<str>),
    /// Hard reference payload: the internal id of the owning entity.
    EntityRef(EntityId),
    /// Soft reference payload: the symbolic id of the target entity.
    Symbolic(SymbolicId),
    /// Persistent list.
    List(WsVec<Value>),
}

impl Value {
    /// Returns the type of this value.
    #[must_use]
    pub fn value_type(&self) -> Type {
        match self {
            Self::Nil => Type::Nil,
            Self::Bool(_) => Type::Bool,
            Self::Int(_) => Type::Int,
            Self::Float(_) => Type::Float,
            Self::String(_) => Type::String,
            Self::EntityRef(_) => Type::EntityRef,
            Self::Symbolic(_) => Type::Symbolic,
            Self::List(_) => Type::list(Type::Any),
        }
    }

    /// Returns true if this value is nil.
    #[must_use]
    pub const fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// Attempts to extract a string reference.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Attempts to extract an entity ID.
    #[must_use]
    pub const fn as_entity(&self) -> Option<EntityId> {
        match self {
            Self::EntityRef(id) => Some(*id),
            _ => None,
        }
    }

    /// Attempts to extract a symbolic id.
    #[must_use]
    pub const fn as_symbolic(&self) -> Option<&SymbolicId> {
        match self {
            Self::Symbolic(id) => Some(id),
            _ => None,
        }
    }

    /// Attempts to extract a list reference.
    #[must_use]
    pub const fn as_list(&self) -> Option<&WsVec<Value>> {
        match self {
            Self::List(v) => Some(v),
            _ => None,
        }
    }

    /// Collects every symbolic id held by this value, directly or in a list.
    #[must_use]
    pub fn symbolic_refs(&self) -> Vec<SymbolicId> {
        let mut out = Vec::new();
        self.collect_symbolic(&mut out);
        out
    }

    fn collect_symbolic(&self, out: &mut Vec<SymbolicId>) {
        match self {
            Self::Symbolic(id) => out.push(id.clone()),
            Self::List(items) => {
                for item in items {
                    item.collect_symbolic(out);
                }
            }
            _ => {}
        }
    }

    /// Returns a copy with every occurrence of `old` replaced by `new`.
    ///
    /// Returns `None` when the value does not mention `old`. Composite ids
    /// that embed `old` are rewritten as well.
    #[must_use]
    pub fn retarget(&self, old: &SymbolicId, new: &SymbolicId) -> Option<Value> {
        match self {
            Self::Symbolic(id) if id == old => Some(Self::Symbolic(new.clone())),
            Self::Symbolic(id) if id.embeds(old) => {
                let key = id
                    .key
                    .iter()
                    .map(|part| part.retarget(old, new).unwrap_or_else(|| part.clone()));
                Some(Self::Symbolic(SymbolicId::new(id.type_id, key)))
            }
            Self::List(items) => {
                let mut changed = false;
                let rewritten: WsVec<Value> = items
                    .iter()
                    .map(|item| match item.retarget(old, new) {
                        Some(v) => {
                            changed = true;
                            v
                        }
                        None => item.clone(),
                    })
                    .collect();
                changed.then_some(Self::List(rewritten))
            }
            _ => None,
        }
    }
}

// Floats compare and hash by bit pattern, which keeps `Eq` reflexive for NaN
// and lets values key hash maps.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Symbolic(a), Self::Symbolic(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::EntityRef(a), Self::EntityRef(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Nil, Self::Nil) => true,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Nil => {}
            Self::Bool(b) => b.hash(state),
            Self::Int(n) => n.hash(state),
            Self::Float(n) => n.to_bits().hash(state),
            Self::String(s) => s.hash(state),
            Self::EntityRef(id) => id.hash(state),
            Self::Symbolic(id) => id.hash(state),
            Self::List(items) => items.hash(state),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s:?}"),
            Self::List(items) => f.debug_list().entries(items.iter()).finish(),
            other => fmt::Display::fmt(other, f),
        }
    }
}

/// Renders values the way they appear in logs: strings bare, lists as
/// `[a, b]`.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => f.write_str("nil"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
            Self::EntityRef(id) => write!(f, "{id}"),
            Self::Symbolic(id) => write!(f, "{id}"),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

// =============================================================================
// Conversions
// =============================================================================

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Float(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s.into())
    }
}

impl From<Arc<str>> for Value {
    fn from(s: Arc<str>) -> Self {
        Self::String(s)
    }
}

impl From<EntityId> for Value {
    fn from(id: EntityId) -> Self {
        Self::EntityRef(id)
    }
}

impl From<SymbolicId> for Value {
    fn from(id: SymbolicId) -> Self {
        Self::Symbolic(id)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Nil, Into::into)
    }
}
