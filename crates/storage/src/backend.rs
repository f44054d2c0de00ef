//! MemoryBackend: StorageBackendFactory over named in-memory databases
//!
//! Databases are created on first use and live as long as the backend.
//! Clones of a backend share databases, journal and fault plan, so a test can
//! hand one clone to the unit of work and keep another for assertions.

use dashmap::DashMap;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tracing::debug;
use unitwork_core::{BackendResult, ContextKey, IdAssigner, PersistenceContext, StorageBackendFactory};

use crate::connection::ConnectionString;
use crate::context::{ContextServices, MemoryContext};
use crate::database::MemoryDatabase;
use crate::ids::UuidIdAssigner;
use crate::testing::{FaultPlan, Operation, OperationJournal};

/// In-memory storage backend
#[derive(Clone)]
pub struct MemoryBackend {
    databases: Arc<DashMap<String, Arc<MemoryDatabase>>>,
    journal: OperationJournal,
    faults: FaultPlan,
    ids: Arc<dyn IdAssigner>,
    transaction_ids: Arc<AtomicU64>,
}

impl MemoryBackend {
    /// Backend assigning UUIDs to new entities
    pub fn new() -> Self {
        Self::with_id_assigner(Arc::new(UuidIdAssigner))
    }

    /// Backend using a custom id assigner
    pub fn with_id_assigner(ids: Arc<dyn IdAssigner>) -> Self {
        Self {
            databases: Arc::new(DashMap::new()),
            journal: OperationJournal::new(),
            faults: FaultPlan::new(),
            ids,
            transaction_ids: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Database named `name`, created empty if it does not exist yet
    pub fn database(&self, name: &str) -> Arc<MemoryDatabase> {
        self.databases
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryDatabase::new(name)))
            .clone()
    }

    /// Names of every database created so far
    pub fn database_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.databases.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Journal shared by every context and transaction of this backend
    pub fn journal(&self) -> &OperationJournal {
        &self.journal
    }

    /// Fault plan shared by every context and transaction of this backend
    pub fn faults(&self) -> &FaultPlan {
        &self.faults
    }

    pub(crate) fn transaction_ids(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.transaction_ids)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("databases", &self.database_names())
            .finish()
    }
}

impl StorageBackendFactory for MemoryBackend {
    fn create(&self, key: &ContextKey) -> BackendResult<Box<dyn PersistenceContext>> {
        let connection = ConnectionString::parse(&key.connection_string)?;
        if let Some(error) = self.faults.on_create(key) {
            return Err(error);
        }

        let database = self.database(connection.data_source());
        let context = MemoryContext::new(
            key.clone(),
            database,
            connection.command_timeout(),
            ContextServices {
                journal: self.journal.clone(),
                faults: self.faults.clone(),
                ids: Arc::clone(&self.ids),
            },
        );

        self.journal.record(Operation::ContextCreated {
            context: key.to_string(),
        });
        debug!(target: "unitwork::storage", context = %key, "Memory context opened");
        Ok(Box::new(context))
    }
}
