//! Fault injection for the memory backend
//!
//! A `FaultPlan` is shared by a backend and everything it creates. Faults
//! stay armed until `clear` is called. Context-level faults target a context
//! by its type's short name or by its `Data Source`.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use unitwork_core::{BackendError, CancellationToken, ContextKey};

use crate::connection::ConnectionString;

#[derive(Debug, Default)]
struct Faults {
    create: BTreeMap<String, BackendError>,
    save: BTreeMap<String, BackendError>,
    release: BTreeMap<String, BackendError>,
    cancel_after_save: BTreeMap<String, CancellationToken>,
    begin: Option<BackendError>,
    enlist: Option<BackendError>,
    commit: Option<BackendError>,
    dispose: Option<BackendError>,
}

/// Shared set of armed faults
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    faults: Arc<Mutex<Faults>>,
}

impl FaultPlan {
    /// Create a plan with no faults armed
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail context creation for `target`
    pub fn fail_create(&self, target: impl Into<String>, error: BackendError) {
        self.faults.lock().create.insert(target.into(), error);
    }

    /// Fail `save_changes` for `target`
    pub fn fail_save(&self, target: impl Into<String>, error: BackendError) {
        self.faults.lock().save.insert(target.into(), error);
    }

    /// Fail release of `target`
    pub fn fail_release(&self, target: impl Into<String>, error: BackendError) {
        self.faults.lock().release.insert(target.into(), error);
    }

    /// Cancel `token` right after `target` finishes a flush
    pub fn cancel_after_save(&self, target: impl Into<String>, token: CancellationToken) {
        self.faults
            .lock()
            .cancel_after_save
            .insert(target.into(), token);
    }

    /// Fail beginning a transaction
    pub fn fail_begin(&self, error: BackendError) {
        self.faults.lock().begin = Some(error);
    }

    /// Fail enlisting a context
    pub fn fail_enlist(&self, error: BackendError) {
        self.faults.lock().enlist = Some(error);
    }

    /// Fail committing a transaction
    pub fn fail_commit(&self, error: BackendError) {
        self.faults.lock().commit = Some(error);
    }

    /// Fail disposing a transaction
    pub fn fail_transaction_dispose(&self, error: BackendError) {
        self.faults.lock().dispose = Some(error);
    }

    /// Disarm every fault
    pub fn clear(&self) {
        *self.faults.lock() = Faults::default();
    }

    pub(crate) fn on_create(&self, key: &ContextKey) -> Option<BackendError> {
        Self::lookup(&self.faults.lock().create, key)
    }

    pub(crate) fn on_save(&self, key: &ContextKey) -> Option<BackendError> {
        Self::lookup(&self.faults.lock().save, key)
    }

    pub(crate) fn on_release(&self, key: &ContextKey) -> Option<BackendError> {
        Self::lookup(&self.faults.lock().release, key)
    }

    pub(crate) fn after_save(&self, key: &ContextKey) {
        if let Some(token) = Self::lookup(&self.faults.lock().cancel_after_save, key) {
            token.cancel();
        }
    }

    pub(crate) fn on_begin(&self) -> Option<BackendError> {
        self.faults.lock().begin.clone()
    }

    pub(crate) fn on_enlist(&self) -> Option<BackendError> {
        self.faults.lock().enlist.clone()
    }

    pub(crate) fn on_commit(&self) -> Option<BackendError> {
        self.faults.lock().commit.clone()
    }

    pub(crate) fn on_dispose(&self) -> Option<BackendError> {
        self.faults.lock().dispose.clone()
    }

    fn lookup<T: Clone>(map: &BTreeMap<String, T>, key: &ContextKey) -> Option<T> {
        if let Some(v) = map.get(key.concrete_type.short_name()) {
            return Some(v.clone());
        }
        let data_source = ConnectionString::parse(&key.connection_string).ok()?;
        map.get(data_source.data_source()).cloned()
    }
}
