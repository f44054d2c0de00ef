//! Transaction strategy for a unit-of-work scope
//!
//! A scope selects its strategy once, from `UnitOfWorkOptions::is_transactional`:
//!
//! - `NonTransactional`: contexts are created directly by the backend and
//!   each commits on its own when flushed. `commit` and `dispose` do nothing;
//!   the scope releases its contexts itself.
//! - `AmbientTransactional`: `init_options` begins an ambient transaction,
//!   every context is enlisted in it before being handed out, `commit`
//!   commits it, and `dispose` disposes the transaction and then every
//!   enlisted context exactly once.
//!
//! ## Transaction State Machine
//!
//! ```text
//! NotStarted --init_options--> Begun --commit--> Committed
//!      |                         |                   |
//!      +---------dispose---------+------dispose------+--> Disposed
//! ```
//!
//! Disposing a `Begun` transaction rolls it back. `Disposed` is terminal; a
//! second dispose only retries contexts that were still in use the first time.

use std::sync::Arc;
use tracing::{debug, info, warn};
use unitwork_core::{
    release_pending, AmbientTransaction, AmbientTransactionProvider, ContextHandle, ContextKey,
    DisposalFailure, StorageBackendFactory, TransactionSettings, UnitOfWorkOptions, UowError, UowResult,
};

/// Status of the ambient transaction owned by a strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// No transaction yet
    NotStarted,
    /// Transaction begun, contexts may enlist
    Begun,
    /// Transaction committed
    Committed,
    /// Transaction disposed (terminal)
    Disposed,
}

/// State of the ambient-transactional strategy
pub struct AmbientTransactionState {
    provider: Arc<dyn AmbientTransactionProvider>,
    transaction: Option<Box<dyn AmbientTransaction>>,
    enlisted: Vec<ContextHandle>,
    status: TransactionStatus,
    settings: TransactionSettings,
}

impl AmbientTransactionState {
    /// Create a state that has not begun its transaction yet
    pub fn new(provider: Arc<dyn AmbientTransactionProvider>) -> Self {
        Self {
            provider,
            transaction: None,
            enlisted: Vec::new(),
            status: TransactionStatus::NotStarted,
            settings: TransactionSettings::default(),
        }
    }

    fn init_options(&mut self, options: &UnitOfWorkOptions) -> UowResult<()> {
        if self.status != TransactionStatus::NotStarted {
            return Err(UowError::invalid_operation(format!(
                "ambient transaction already initialized (status {:?})",
                self.status
            )));
        }

        self.settings = TransactionSettings {
            timeout: options.timeout,
            isolation_level: options.isolation_level.unwrap_or_default(),
        };
        let transaction = self
            .provider
            .begin(self.settings)
            .map_err(|source| UowError::Transaction { source })?;

        debug!(
            target: "unitwork::txn",
            txn_id = transaction.id(),
            timeout = ?self.settings.timeout,
            isolation = ?self.settings.isolation_level,
            "Ambient transaction begun"
        );

        self.transaction = Some(transaction);
        self.status = TransactionStatus::Begun;
        Ok(())
    }

    fn active_transaction(&mut self) -> UowResult<&mut Box<dyn AmbientTransaction>> {
        if self.status != TransactionStatus::Begun {
            return Err(UowError::invalid_operation(format!(
                "ambient transaction is not active (status {:?})",
                self.status
            )));
        }
        self.transaction
            .as_mut()
            .ok_or_else(|| UowError::invalid_operation("ambient transaction missing"))
    }

    fn create_context(
        &mut self,
        key: &ContextKey,
        backend: &dyn StorageBackendFactory,
    ) -> UowResult<ContextHandle> {
        let transaction = self.active_transaction()?;

        let mut context = backend
            .create(key)
            .map_err(|source| UowError::ContextCreation {
                key: key.clone(),
                source,
            })?;

        if let Err(source) = transaction.enlist(context.as_mut()) {
            if let Err(e) = backend.dispose(context.as_mut()) {
                warn!(target: "unitwork::txn", context = %key, error = %e, "Failed to release context after enlistment failure");
            }
            return Err(UowError::Transaction { source });
        }

        debug!(target: "unitwork::txn", txn_id = transaction.id(), context = %key, "Context enlisted");

        let handle = ContextHandle::new(key.clone(), context);
        self.enlisted.push(handle.clone());
        Ok(handle)
    }

    fn commit(&mut self) -> UowResult<()> {
        let transaction = self.active_transaction()?;
        let txn_id = transaction.id();
        match transaction.commit() {
            Ok(()) => {
                self.status = TransactionStatus::Committed;
                info!(target: "unitwork::txn", txn_id, contexts = self.enlisted.len(), "Transaction committed");
                Ok(())
            }
            Err(source) => {
                warn!(target: "unitwork::txn", txn_id, error = %source, "Transaction commit failed");
                Err(UowError::Commit { source })
            }
        }
    }

    async fn commit_async(&mut self) -> UowResult<()> {
        let transaction = self.active_transaction()?;
        let txn_id = transaction.id();
        match transaction.commit_async().await {
            Ok(()) => {
                self.status = TransactionStatus::Committed;
                info!(target: "unitwork::txn", txn_id, contexts = self.enlisted.len(), "Transaction committed");
                Ok(())
            }
            Err(source) => {
                warn!(target: "unitwork::txn", txn_id, error = %source, "Transaction commit failed");
                Err(UowError::Commit { source })
            }
        }
    }

    fn dispose(&mut self, backend: &dyn StorageBackendFactory) -> Vec<DisposalFailure> {
        if self.status == TransactionStatus::Disposed {
            // Only contexts that were still in use are left to release.
            return release_pending(&mut self.enlisted, backend);
        }

        let mut failures = Vec::new();

        if let Some(mut transaction) = self.transaction.take() {
            let txn_id = transaction.id();
            if self.status == TransactionStatus::Begun {
                debug!(target: "unitwork::txn", txn_id, "Disposing uncommitted transaction");
            }
            if let Err(e) = transaction.dispose() {
                failures.push(DisposalFailure::new(format!("transaction#{}", txn_id), e));
            }
        }

        failures.extend(release_pending(&mut self.enlisted, backend));

        self.status = TransactionStatus::Disposed;

        for failure in &failures {
            warn!(target: "unitwork::txn", resource = %failure.resource, error = %failure.error, "Release failed during transaction disposal");
        }
        failures
    }
}

/// Transaction behavior selected once per scope
pub enum TransactionStrategy {
    /// Each context commits on its own
    NonTransactional,
    /// All contexts share one ambient transaction
    AmbientTransactional(AmbientTransactionState),
}

impl TransactionStrategy {
    /// Pick the strategy for `options`
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the options are transactional and no
    /// ambient transaction provider is available.
    pub fn select(
        options: &UnitOfWorkOptions,
        provider: Option<Arc<dyn AmbientTransactionProvider>>,
    ) -> UowResult<Self> {
        if !options.is_transactional() {
            return Ok(TransactionStrategy::NonTransactional);
        }
        let provider = provider.ok_or_else(|| {
            UowError::configuration(
                "transactional unit of work requested but no ambient transaction provider is configured",
            )
        })?;
        Ok(TransactionStrategy::AmbientTransactional(
            AmbientTransactionState::new(provider),
        ))
    }

    /// True for the ambient-transactional variant
    pub fn is_transactional(&self) -> bool {
        matches!(self, TransactionStrategy::AmbientTransactional(_))
    }

    /// Status of the ambient transaction; `None` when non-transactional
    pub fn status(&self) -> Option<TransactionStatus> {
        match self {
            TransactionStrategy::NonTransactional => None,
            TransactionStrategy::AmbientTransactional(state) => Some(state.status),
        }
    }

    /// Contexts enlisted in the ambient transaction, in creation order
    pub fn enlisted(&self) -> &[ContextHandle] {
        match self {
            TransactionStrategy::NonTransactional => &[],
            TransactionStrategy::AmbientTransactional(state) => &state.enlisted,
        }
    }

    /// Begin the ambient transaction with the scope's timeout and isolation level
    pub fn init_options(&mut self, options: &UnitOfWorkOptions) -> UowResult<()> {
        match self {
            TransactionStrategy::NonTransactional => Ok(()),
            TransactionStrategy::AmbientTransactional(state) => state.init_options(options),
        }
    }

    /// Create a context for `key`, enlisting it when transactional
    pub fn create_context(
        &mut self,
        key: &ContextKey,
        backend: &dyn StorageBackendFactory,
    ) -> UowResult<ContextHandle> {
        match self {
            TransactionStrategy::NonTransactional => {
                let context = backend
                    .create(key)
                    .map_err(|source| UowError::ContextCreation {
                        key: key.clone(),
                        source,
                    })?;
                Ok(ContextHandle::new(key.clone(), context))
            }
            TransactionStrategy::AmbientTransactional(state) => state.create_context(key, backend),
        }
    }

    /// Commit the ambient transaction
    pub fn commit(&mut self) -> UowResult<()> {
        match self {
            TransactionStrategy::NonTransactional => Ok(()),
            TransactionStrategy::AmbientTransactional(state) => state.commit(),
        }
    }

    /// Commit the ambient transaction without blocking
    pub async fn commit_async(&mut self) -> UowResult<()> {
        match self {
            TransactionStrategy::NonTransactional => Ok(()),
            TransactionStrategy::AmbientTransactional(state) => state.commit_async().await,
        }
    }

    /// Dispose the ambient transaction and every enlisted context
    ///
    /// Best effort: every resource is attempted and failures are returned.
    pub fn dispose(&mut self, backend: &dyn StorageBackendFactory) -> Vec<DisposalFailure> {
        match self {
            TransactionStrategy::NonTransactional => Vec::new(),
            TransactionStrategy::AmbientTransactional(state) => state.dispose(backend),
        }
    }
}
