//! Entity records and change-tracking states

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Reference to a tracked entity: entity type plus id
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    /// Entity type (table or collection name)
    pub entity_type: String,
    /// Entity id
    pub id: String,
}

impl EntityRef {
    /// Create a new entity reference
    pub fn new(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.id)
    }
}

/// A persisted entity as a flat field map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Entity type (table or collection name)
    pub entity_type: String,
    /// Entity id; `None` until assigned
    pub id: Option<String>,
    /// Field values by name
    pub fields: BTreeMap<String, Value>,
}

impl EntityRecord {
    /// Create a record without an id
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: None,
            fields: BTreeMap::new(),
        }
    }

    /// Set the id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set a field
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Read a field
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Write a field, returning the previous value
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(name.into(), value.into())
    }

    /// True if both records hold the same stored content
    ///
    /// Fields compare with [`Value::same_as`].
    pub fn same_as(&self, other: &EntityRecord) -> bool {
        self.entity_type == other.entity_type
            && self.id == other.id
            && self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .zip(other.fields.iter())
                .all(|((ka, va), (kb, vb))| ka == kb && va.same_as(vb))
    }

    /// Reference to this record, if it has an id
    pub fn entity_ref(&self) -> Option<EntityRef> {
        self.id
            .as_ref()
            .map(|id| EntityRef::new(self.entity_type.clone(), id.clone()))
    }
}

/// Change-tracking state of an entity inside a persistence context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryState {
    /// Not tracked
    Detached,
    /// Tracked, matches the stored row
    Unchanged,
    /// New, will be inserted on save
    Added,
    /// Differs from the stored row, will be updated on save
    Modified,
    /// Will be deleted on save
    Deleted,
}

impl EntryState {
    /// True if saving would write something for this entry
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            EntryState::Added | EntryState::Modified | EntryState::Deleted
        )
    }
}
