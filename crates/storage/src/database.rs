//! MemoryDatabase: named in-memory table store
//!
//! - `BTreeMap<entity_type, BTreeMap<id, EntityRecord>>` for ordered rows
//! - `parking_lot::RwLock` for thread-safe access
//! - `AtomicU64` version bumped once per applied batch
//!
//! Writes arrive as batches of `WriteOp` and are applied under one write
//! lock, so readers never observe half a batch.

use parking_lot::{RwLock, RwLockWriteGuard};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use unitwork_core::{EntityRecord, EntityRef};

pub(crate) type Tables = BTreeMap<String, BTreeMap<String, EntityRecord>>;

/// One row-level write
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Insert or replace a row
    Upsert(EntityRecord),
    /// Delete a row if present
    Delete(EntityRef),
}

/// A named in-memory database
#[derive(Debug)]
pub struct MemoryDatabase {
    name: String,
    tables: RwLock<Tables>,
    version: AtomicU64,
}

impl MemoryDatabase {
    /// Create an empty database
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: RwLock::new(BTreeMap::new()),
            version: AtomicU64::new(0),
        }
    }

    /// Database name (the connection string's `Data Source`)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of batches applied so far
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Read one row
    pub fn get(&self, entity_type: &str, id: &str) -> Option<EntityRecord> {
        self.tables
            .read()
            .get(entity_type)
            .and_then(|rows| rows.get(id))
            .cloned()
    }

    /// All rows of one entity type, ordered by id
    pub fn scan(&self, entity_type: &str) -> Vec<EntityRecord> {
        self.tables
            .read()
            .get(entity_type)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of rows of one entity type
    pub fn count(&self, entity_type: &str) -> usize {
        self.tables
            .read()
            .get(entity_type)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    /// Seed a row directly, bypassing any context
    pub fn insert(&self, record: EntityRecord) {
        self.apply(vec![WriteOp::Upsert(record)]);
    }

    /// Apply a batch of writes atomically
    pub fn apply(&self, ops: Vec<WriteOp>) {
        let mut tables = self.tables.write();
        Self::apply_locked(&mut tables, ops);
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn write_tables(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write()
    }

    pub(crate) fn bump_version(&self) {
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn apply_locked(tables: &mut Tables, ops: Vec<WriteOp>) {
        for op in ops {
            match op {
                WriteOp::Upsert(record) => {
                    if let Some(id) = record.id.clone() {
                        tables
                            .entry(record.entity_type.clone())
                            .or_default()
                            .insert(id, record);
                    }
                }
                WriteOp::Delete(entity) => {
                    if let Some(rows) = tables.get_mut(&entity.entity_type) {
                        rows.remove(&entity.id);
                    }
                }
            }
        }
    }
}
