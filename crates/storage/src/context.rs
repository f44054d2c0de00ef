//! MemoryContext: change-tracking persistence context over a MemoryDatabase
//!
//! A context keeps an identity map of the entities it has seen. Each tracked
//! entry holds the entity's current values, the values last read from or
//! written to storage, and its `EntryState`.
//!
//! # Materialization
//!
//! Rows read by `find` or `query` are attached as `Unchanged` and then handed
//! to the attached `MaterializationHook`, if any, with the context itself as
//! the `ChangeTracker`.
//!
//! # Flushing
//!
//! `save_changes` turns pending entries into `WriteOp`s. A standalone context
//! applies them to its database immediately; a context enlisted in a
//! `MemoryTransaction` stages them in the transaction instead, where they
//! stay invisible until commit.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;
use unitwork_core::{
    BackendError, BackendResult, CancellationToken, ChangeTracker, ContextKey, ContextTypeId,
    DataFilter, EntityRecord, EntityRef, EntryState, IdAssigner, MaterializationHook,
    PersistenceContext, Value, MAY_HAVE_TENANT, MUST_HAVE_TENANT, SOFT_DELETE, TENANT_ID_PARAM,
};

use crate::database::{MemoryDatabase, WriteOp};
use crate::testing::{FaultPlan, Operation, OperationJournal};
use crate::transaction::TransactionShared;

/// Field consulted by the soft-delete filter
pub const IS_DELETED_FIELD: &str = "is_deleted";

#[derive(Debug, Clone)]
struct Entry {
    current: EntityRecord,
    original: Option<EntityRecord>,
    state: EntryState,
}

/// Services a context shares with the backend that created it
#[derive(Clone)]
pub(crate) struct ContextServices {
    pub(crate) journal: OperationJournal,
    pub(crate) faults: FaultPlan,
    pub(crate) ids: Arc<dyn IdAssigner>,
}

/// In-memory persistence context
pub struct MemoryContext {
    key: ContextKey,
    database: Arc<MemoryDatabase>,
    services: ContextServices,
    entries: BTreeMap<EntityRef, Entry>,
    auto_detect_changes: bool,
    command_timeout: Option<Duration>,
    lazy_loading: bool,
    hook: Option<Arc<dyn MaterializationHook>>,
    filters: BTreeMap<String, DataFilter>,
    transaction: Option<Arc<TransactionShared>>,
    released: bool,
}

impl MemoryContext {
    pub(crate) fn new(
        key: ContextKey,
        database: Arc<MemoryDatabase>,
        command_timeout: Option<Duration>,
        services: ContextServices,
    ) -> Self {
        Self {
            key,
            database,
            services,
            entries: BTreeMap::new(),
            auto_detect_changes: true,
            command_timeout,
            lazy_loading: false,
            hook: None,
            filters: BTreeMap::new(),
            transaction: None,
            released: false,
        }
    }

    /// Pool key this context was opened for
    pub fn key(&self) -> &ContextKey {
        &self.key
    }

    /// Database this context reads from and writes to
    pub fn database(&self) -> &Arc<MemoryDatabase> {
        &self.database
    }

    /// Whether lazy loading was enabled
    pub fn is_lazy_loading_enabled(&self) -> bool {
        self.lazy_loading
    }

    /// Whether a materialization hook is attached
    pub fn has_materialization_hook(&self) -> bool {
        self.hook.is_some()
    }

    /// Current state of a pushed filter
    pub fn filter(&self, name: &str) -> Option<&DataFilter> {
        self.filters.get(name)
    }

    /// Id of the ambient transaction this context is enlisted in
    pub fn transaction_id(&self) -> Option<u64> {
        self.transaction.as_ref().map(|t| t.id())
    }

    /// True once released
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Track a new entity, assigning an id if it has none
    pub fn add(&mut self, mut record: EntityRecord) -> BackendResult<EntityRef> {
        self.ensure_open()?;
        self.services.ids.assign_if_missing(&mut record);
        let entity = record
            .entity_ref()
            .ok_or_else(|| BackendError::failed("entity has no id after id assignment"))?;

        match self.entries.get(&entity) {
            Some(existing) if existing.state != EntryState::Deleted => {
                return Err(BackendError::failed(format!(
                    "entity {} is already tracked",
                    entity
                )));
            }
            Some(_) => {}
            None => {
                if self.database.get(&entity.entity_type, &entity.id).is_some() {
                    return Err(BackendError::failed(format!(
                        "entity {} already exists",
                        entity
                    )));
                }
            }
        }

        let original = self.entries.remove(&entity).and_then(|e| e.original);
        let state = if original.is_some() {
            EntryState::Modified
        } else {
            EntryState::Added
        };
        self.entries.insert(
            entity.clone(),
            Entry {
                current: record,
                original,
                state,
            },
        );
        Ok(entity)
    }

    /// Find one entity by id
    ///
    /// Returns the tracked instance if there is one; otherwise loads the row,
    /// applying the pushed filters, and materializes it.
    pub fn find(&mut self, entity_type: &str, id: &str) -> BackendResult<Option<EntityRecord>> {
        self.ensure_open()?;
        let entity = EntityRef::new(entity_type, id);
        if let Some(entry) = self.entries.get(&entity) {
            if entry.state == EntryState::Deleted {
                return Ok(None);
            }
            return Ok(Some(entry.current.clone()));
        }

        match self.database.get(entity_type, id) {
            Some(row) if self.is_visible(&row) => {
                self.materialize(entity.clone(), row);
                Ok(self.entries.get(&entity).map(|e| e.current.clone()))
            }
            _ => Ok(None),
        }
    }

    /// All visible entities of one type, ordered by id
    pub fn query(&mut self, entity_type: &str) -> BackendResult<Vec<EntityRecord>> {
        self.ensure_open()?;
        let mut results = Vec::new();
        for row in self.database.scan(entity_type) {
            if !self.is_visible(&row) {
                continue;
            }
            let Some(entity) = row.entity_ref() else {
                continue;
            };
            if !self.entries.contains_key(&entity) {
                self.materialize(entity.clone(), row);
            }
            if let Some(entry) = self.entries.get(&entity) {
                if entry.state != EntryState::Deleted {
                    results.push(entry.current.clone());
                }
            }
        }
        Ok(results)
    }

    /// Replace the values of a tracked entity
    pub fn update(&mut self, record: EntityRecord) -> BackendResult<()> {
        self.ensure_open()?;
        let entity = record
            .entity_ref()
            .ok_or_else(|| BackendError::failed("cannot update an entity without an id"))?;
        let entry = self
            .entries
            .get_mut(&entity)
            .ok_or_else(|| BackendError::failed(format!("entity {} is not tracked", entity)))?;
        match entry.state {
            EntryState::Deleted => {
                return Err(BackendError::failed(format!(
                    "entity {} is marked for deletion",
                    entity
                )))
            }
            EntryState::Unchanged => entry.state = EntryState::Modified,
            _ => {}
        }
        entry.current = record;
        Ok(())
    }

    /// Mark an entity for deletion
    ///
    /// Returns false if the entity is neither tracked nor stored.
    pub fn remove(&mut self, entity_type: &str, id: &str) -> BackendResult<bool> {
        self.ensure_open()?;
        let entity = EntityRef::new(entity_type, id);
        if let Some(entry) = self.entries.get_mut(&entity) {
            match entry.state {
                EntryState::Added => {
                    self.entries.remove(&entity);
                }
                EntryState::Deleted => return Ok(false),
                _ => entry.state = EntryState::Deleted,
            }
            return Ok(true);
        }

        match self.database.get(entity_type, id) {
            Some(row) => {
                self.entries.insert(
                    entity,
                    Entry {
                        current: row.clone(),
                        original: Some(row),
                        state: EntryState::Deleted,
                    },
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Compare every `Unchanged` entry with its stored values
    pub fn detect_changes(&mut self) {
        for entry in self.entries.values_mut() {
            Self::detect_entry(entry);
        }
    }

    /// Number of entries a flush would write
    pub fn pending_count(&mut self) -> usize {
        if self.auto_detect_changes {
            self.detect_changes();
        }
        self.entries.values().filter(|e| e.state.is_pending()).count()
    }

    pub(crate) fn enlist(&mut self, transaction: Arc<TransactionShared>) -> BackendResult<()> {
        self.ensure_open()?;
        if let Some(existing) = &self.transaction {
            return Err(BackendError::failed(format!(
                "context {} is already enlisted in transaction {}",
                self.key,
                existing.id()
            )));
        }
        self.transaction = Some(transaction);
        Ok(())
    }

    fn detect_entry(entry: &mut Entry) {
        if entry.state != EntryState::Unchanged {
            return;
        }
        if let Some(original) = &entry.original {
            if !original.same_as(&entry.current) {
                entry.state = EntryState::Modified;
            }
        }
    }

    fn ensure_open(&self) -> BackendResult<()> {
        if self.released {
            return Err(BackendError::released(format!(
                "context {} has been released",
                self.key
            )));
        }
        Ok(())
    }

    fn materialize(&mut self, entity: EntityRef, row: EntityRecord) {
        self.entries.insert(
            entity.clone(),
            Entry {
                current: row.clone(),
                original: Some(row),
                state: EntryState::Unchanged,
            },
        );
        if let Some(hook) = self.hook.clone() {
            trace!(target: "unitwork::storage", context = %self.key, entity = %entity, "Materialized");
            hook.on_materialized(self, &entity);
        }
    }

    fn is_visible(&self, row: &EntityRecord) -> bool {
        let is_deleted = row.field(IS_DELETED_FIELD).and_then(Value::as_bool) == Some(true);
        if is_deleted && self.is_enabled(SOFT_DELETE) {
            return false;
        }

        let row_tenant = row.field(TENANT_ID_PARAM).filter(|v| !v.is_null());

        // Host sessions (no tenant parameter) are not restricted.
        if let Some(filter) = self.active_filter(MUST_HAVE_TENANT) {
            if let Some(p) = Self::tenant_param(filter) {
                if row_tenant != Some(p) {
                    return false;
                }
            }
        }

        // Shared rows stay visible; tenant rows only to their tenant.
        if let Some(filter) = self.active_filter(MAY_HAVE_TENANT) {
            if let Some(t) = row_tenant {
                if Self::tenant_param(filter) != Some(t) {
                    return false;
                }
            }
        }

        true
    }

    fn is_enabled(&self, name: &str) -> bool {
        self.active_filter(name).is_some()
    }

    fn active_filter(&self, name: &str) -> Option<&DataFilter> {
        self.filters.get(name).filter(|f| f.enabled)
    }

    fn tenant_param(filter: &DataFilter) -> Option<&Value> {
        filter.parameter(TENANT_ID_PARAM).filter(|v| !v.is_null())
    }

    fn collect_writes(&mut self) -> Vec<WriteOp> {
        if self.auto_detect_changes {
            self.detect_changes();
        }
        self.entries
            .values()
            .filter_map(|entry| match entry.state {
                EntryState::Added | EntryState::Modified => {
                    Some(WriteOp::Upsert(entry.current.clone()))
                }
                EntryState::Deleted => entry.current.entity_ref().map(WriteOp::Delete),
                EntryState::Unchanged | EntryState::Detached => None,
            })
            .collect()
    }

    fn accept_all(&mut self) {
        self.entries.retain(|_, entry| entry.state != EntryState::Deleted);
        for entry in self.entries.values_mut() {
            entry.original = Some(entry.current.clone());
            entry.state = EntryState::Unchanged;
        }
    }
}

#[async_trait]
impl PersistenceContext for MemoryContext {
    fn context_type(&self) -> ContextTypeId {
        self.key.concrete_type
    }

    fn save_changes(&mut self) -> BackendResult<usize> {
        self.ensure_open()?;
        if let Some(error) = self.services.faults.on_save(&self.key) {
            return Err(error);
        }

        let writes = self.collect_writes();
        let count = writes.len();
        match &self.transaction {
            Some(transaction) => transaction.stage(Arc::clone(&self.database), writes)?,
            None if count > 0 => self.database.apply(writes),
            None => {}
        }
        self.accept_all();

        self.services.journal.record(Operation::Saved {
            context: self.key.to_string(),
            writes: count,
        });
        self.services.faults.after_save(&self.key);
        Ok(count)
    }

    async fn save_changes_async(&mut self, cancel: &CancellationToken) -> BackendResult<usize> {
        if cancel.is_cancelled() {
            return Err(BackendError::cancelled(format!(
                "flush of {} cancelled",
                self.key
            )));
        }
        tokio::task::yield_now().await;
        self.save_changes()
    }

    fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout
    }

    fn set_command_timeout(&mut self, timeout: Duration) {
        self.command_timeout = Some(timeout);
    }

    fn set_lazy_loading_enabled(&mut self, enabled: bool) {
        self.lazy_loading = enabled;
    }

    fn attach_materialization_hook(&mut self, hook: Arc<dyn MaterializationHook>) -> bool {
        self.hook = Some(hook);
        true
    }

    fn apply_filter(&mut self, filter: &DataFilter) -> BackendResult<()> {
        self.ensure_open()?;
        self.filters.insert(filter.name.clone(), filter.clone());
        Ok(())
    }

    fn release(&mut self) -> BackendResult<()> {
        self.ensure_open()?;
        self.released = true;
        self.entries.clear();
        self.hook = None;
        if let Some(error) = self.services.faults.on_release(&self.key) {
            return Err(error);
        }
        self.services.journal.record(Operation::ContextReleased {
            context: self.key.to_string(),
        });
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl ChangeTracker for MemoryContext {
    fn auto_detect_changes(&self) -> bool {
        self.auto_detect_changes
    }

    fn set_auto_detect_changes(&mut self, enabled: bool) {
        self.auto_detect_changes = enabled;
    }

    fn entry_state(&mut self, entity: &EntityRef) -> EntryState {
        let auto_detect = self.auto_detect_changes;
        match self.entries.get_mut(entity) {
            Some(entry) => {
                if auto_detect {
                    Self::detect_entry(entry);
                }
                entry.state
            }
            None => EntryState::Detached,
        }
    }

    fn set_entry_state(&mut self, entity: &EntityRef, state: EntryState) {
        if state == EntryState::Detached {
            self.entries.remove(entity);
            return;
        }
        if let Some(entry) = self.entries.get_mut(entity) {
            if state == EntryState::Unchanged {
                entry.original = Some(entry.current.clone());
            }
            entry.state = state;
        }
    }

    fn entity_mut(&mut self, entity: &EntityRef) -> Option<&mut EntityRecord> {
        self.entries.get_mut(entity).map(|e| &mut e.current)
    }
}
