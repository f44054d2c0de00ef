//! Ambient transactions for the memory backend
//!
//! Contexts enlisted in a `MemoryTransaction` stage their flushed writes in
//! the transaction rather than applying them. Commit applies every staged
//! batch at once: the write locks of all touched databases are taken in
//! name order, the batches are applied, then the locks are dropped. Dispose
//! without commit discards the staged writes.
//!
//! A transaction opened with a timeout refuses to commit once the timeout
//! has elapsed since `begin`.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;
use unitwork_core::{
    AmbientTransaction, AmbientTransactionProvider, BackendError, BackendResult, IsolationLevel,
    PersistenceContext, TransactionSettings,
};

use crate::backend::MemoryBackend;
use crate::context::MemoryContext;
use crate::database::{MemoryDatabase, WriteOp};
use crate::testing::{FaultPlan, Operation, OperationJournal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnState {
    Active,
    Committed,
    RolledBack,
}

/// State shared between a transaction and its enlisted contexts
#[derive(Debug)]
pub(crate) struct TransactionShared {
    id: u64,
    state: Mutex<TxnState>,
    staged: Mutex<Vec<(Arc<MemoryDatabase>, Vec<WriteOp>)>>,
}

impl TransactionShared {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn stage(&self, database: Arc<MemoryDatabase>, writes: Vec<WriteOp>) -> BackendResult<()> {
        if *self.state.lock() != TxnState::Active {
            return Err(BackendError::released(format!(
                "transaction {} is no longer active",
                self.id
            )));
        }
        if !writes.is_empty() {
            self.staged.lock().push((database, writes));
        }
        Ok(())
    }

    fn staged_count(&self) -> usize {
        self.staged.lock().iter().map(|(_, w)| w.len()).sum()
    }
}

/// Begins `MemoryTransaction`s
pub struct MemoryTransactionProvider {
    journal: OperationJournal,
    faults: FaultPlan,
    next_id: Arc<AtomicU64>,
}

impl MemoryTransactionProvider {
    /// Provider sharing `backend`'s journal and fault plan
    pub fn new(backend: &MemoryBackend) -> Self {
        Self {
            journal: backend.journal().clone(),
            faults: backend.faults().clone(),
            next_id: backend.transaction_ids(),
        }
    }
}

impl AmbientTransactionProvider for MemoryTransactionProvider {
    fn begin(&self, settings: TransactionSettings) -> BackendResult<Box<dyn AmbientTransaction>> {
        if let Some(error) = self.faults.on_begin() {
            return Err(error);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.journal.record(Operation::TransactionBegun { txn: id });
        debug!(target: "unitwork::storage", txn_id = id, isolation = ?settings.isolation_level, "Memory transaction begun");

        Ok(Box::new(MemoryTransaction {
            shared: Arc::new(TransactionShared {
                id,
                state: Mutex::new(TxnState::Active),
                staged: Mutex::new(Vec::new()),
            }),
            started: Instant::now(),
            timeout: settings.timeout,
            isolation_level: settings.isolation_level,
            journal: self.journal.clone(),
            faults: self.faults.clone(),
            disposed: false,
        }))
    }
}

/// Ambient transaction over one or more memory databases
pub struct MemoryTransaction {
    shared: Arc<TransactionShared>,
    started: Instant,
    timeout: Option<Duration>,
    isolation_level: IsolationLevel,
    journal: OperationJournal,
    faults: FaultPlan,
    disposed: bool,
}

impl MemoryTransaction {
    /// Isolation level requested at begin
    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    /// Number of rows currently staged
    pub fn staged_writes(&self) -> usize {
        self.shared.staged_count()
    }

    fn apply_staged(&self) -> usize {
        let staged = std::mem::take(&mut *self.shared.staged.lock());

        let mut by_database: BTreeMap<String, (Arc<MemoryDatabase>, Vec<WriteOp>)> = BTreeMap::new();
        for (database, writes) in staged {
            by_database
                .entry(database.name().to_string())
                .or_insert_with(|| (database, Vec::new()))
                .1
                .extend(writes);
        }

        let batches: Vec<_> = by_database.into_values().collect();
        let total = batches.iter().map(|(_, w)| w.len()).sum();

        let mut guards: Vec<_> = batches.iter().map(|(db, _)| db.write_tables()).collect();
        for ((_, writes), guard) in batches.iter().zip(guards.iter_mut()) {
            MemoryDatabase::apply_locked(guard, writes.clone());
        }
        drop(guards);

        for (database, _) in &batches {
            database.bump_version();
        }
        total
    }
}

impl AmbientTransaction for MemoryTransaction {
    fn id(&self) -> u64 {
        self.shared.id
    }

    fn enlist(&mut self, context: &mut dyn PersistenceContext) -> BackendResult<()> {
        if *self.shared.state.lock() != TxnState::Active {
            return Err(BackendError::released(format!(
                "transaction {} is no longer active",
                self.shared.id
            )));
        }
        if let Some(error) = self.faults.on_enlist() {
            return Err(error);
        }
        let memory = context
            .as_any_mut()
            .downcast_mut::<MemoryContext>()
            .ok_or_else(|| {
                BackendError::unsupported("only memory contexts can enlist in a memory transaction")
            })?;
        memory.enlist(Arc::clone(&self.shared))?;
        self.journal.record(Operation::Enlisted {
            txn: self.shared.id,
            context: memory.key().to_string(),
        });
        Ok(())
    }

    fn commit(&mut self) -> BackendResult<()> {
        let id = self.shared.id;
        self.journal.record(Operation::CommitAttempted { txn: id });

        if *self.shared.state.lock() != TxnState::Active {
            return Err(BackendError::released(format!(
                "transaction {} is no longer active",
                id
            )));
        }
        if let Some(timeout) = self.timeout {
            let elapsed = self.started.elapsed();
            if elapsed > timeout {
                return Err(BackendError::timeout(format!(
                    "transaction {} exceeded its timeout of {:?} ({:?} elapsed)",
                    id, timeout, elapsed
                )));
            }
        }
        if let Some(error) = self.faults.on_commit() {
            return Err(error);
        }

        let writes = self.apply_staged();
        *self.shared.state.lock() = TxnState::Committed;
        self.journal.record(Operation::Committed { txn: id, writes });
        Ok(())
    }

    fn dispose(&mut self) -> BackendResult<()> {
        if self.disposed {
            return Ok(());
        }
        self.disposed = true;

        let id = self.shared.id;
        {
            let mut state = self.shared.state.lock();
            if *state == TxnState::Active {
                *state = TxnState::RolledBack;
                self.shared.staged.lock().clear();
                self.journal.record(Operation::RolledBack { txn: id });
            }
        }
        self.journal.record(Operation::TransactionDisposed { txn: id });

        match self.faults.on_dispose() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
