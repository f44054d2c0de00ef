//! Core identity types for the unit of work
//!
//! This module defines the foundational types:
//! - ScopeId: Unique identifier for a unit-of-work scope
//! - ContextTypeId: Identifier of a requested or concrete context type
//! - ContextKey: Pool key (concrete context type + connection string)
//! - ResolveArgs: Open argument bag handed to the connection string resolver

use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// Unique identifier for a unit-of-work scope
///
/// Wraps a UUID v4. Used in log lines and error messages so that nested
/// and sibling scopes can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeId(Uuid);

impl ScopeId {
    /// Create a new random ScopeId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a ScopeId from a string representation
    ///
    /// # Errors
    /// Returns None if the string is not a valid UUID.
    pub fn from_string(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for ScopeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a context type
///
/// Callers request contexts by type. The requested type may be a trait
/// object type (`dyn BlogStore`) or a marker struct; the type matcher maps
/// it to the concrete type the pool keys on.
///
/// Equality and hashing use the `TypeId` only; the name is carried for
/// configuration lookups and diagnostics.
#[derive(Clone, Copy)]
pub struct ContextTypeId {
    id: TypeId,
    name: &'static str,
}

impl ContextTypeId {
    /// Identifier for `T`
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Fully qualified type name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Last path segment of the type name (`BlogContext` for `app::db::BlogContext`)
    pub fn short_name(&self) -> &'static str {
        let base = self.name.split('<').next().unwrap_or(self.name);
        base.rsplit("::").next().unwrap_or(base)
    }

    /// Underlying `TypeId`
    pub fn type_id(&self) -> TypeId {
        self.id
    }
}

impl PartialEq for ContextTypeId {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ContextTypeId {}

impl Hash for ContextTypeId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ContextTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextTypeId({})", self.name)
    }
}

impl fmt::Display for ContextTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Pool key: concrete context type plus resolved connection string
///
/// Two requests with the same key inside one scope resolve to the same
/// context handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextKey {
    /// Concrete context type
    pub concrete_type: ContextTypeId,
    /// Resolved connection string
    pub connection_string: String,
}

impl ContextKey {
    /// Create a new context key
    pub fn new(concrete_type: ContextTypeId, connection_string: impl Into<String>) -> Self {
        Self {
            concrete_type,
            connection_string: connection_string.into(),
        }
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{}",
            self.concrete_type.short_name(),
            self.connection_string
        )
    }
}

/// Argument name for the requested context type
pub const CONTEXT_TYPE_ARG: &str = "ContextType";
/// Argument name for the concrete context type
pub const CONTEXT_CONCRETE_TYPE_ARG: &str = "ContextConcreteType";

/// Value stored in `ResolveArgs`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveValue {
    /// A context type
    Type(ContextTypeId),
    /// Free-form text
    Text(String),
}

/// Arguments passed to a connection string resolver
///
/// Always carries `ContextType` and `ContextConcreteType`; resolvers may
/// look at additional keys inserted by callers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveArgs {
    values: BTreeMap<String, ResolveValue>,
}

impl ResolveArgs {
    /// Create empty arguments
    pub fn new() -> Self {
        Self::default()
    }

    /// Arguments for a context request
    pub fn for_context(requested: ContextTypeId, concrete: ContextTypeId) -> Self {
        let mut args = Self::new();
        args.insert(CONTEXT_TYPE_ARG, ResolveValue::Type(requested));
        args.insert(CONTEXT_CONCRETE_TYPE_ARG, ResolveValue::Type(concrete));
        args
    }

    /// Insert or replace an argument
    pub fn insert(&mut self, key: impl Into<String>, value: ResolveValue) {
        self.values.insert(key.into(), value);
    }

    /// Look up an argument
    pub fn get(&self, key: &str) -> Option<&ResolveValue> {
        self.values.get(key)
    }

    /// Look up an argument holding a context type
    pub fn get_type(&self, key: &str) -> Option<ContextTypeId> {
        match self.values.get(key) {
            Some(ResolveValue::Type(ty)) => Some(*ty),
            _ => None,
        }
    }

    /// Requested context type, if present
    pub fn context_type(&self) -> Option<ContextTypeId> {
        self.get_type(CONTEXT_TYPE_ARG)
    }

    /// Concrete context type, if present
    pub fn concrete_type(&self) -> Option<ContextTypeId> {
        self.get_type(CONTEXT_CONCRETE_TYPE_ARG)
    }

    /// Iterate over all arguments in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ResolveValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}
