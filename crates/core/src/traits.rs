//! Capability traits consumed by the unit of work
//!
//! The unit of work never talks to a storage driver directly. Everything it
//! needs from the outside world goes through the traits in this module, so
//! a backend can be swapped without touching the scope, pool or strategy.
//!
//! | Trait | Role |
//! |---|---|
//! | `PersistenceContext` | A live context: flush, timeout, filters, release |
//! | `ChangeTracker` | Optional change-tracking view used during materialization |
//! | `MaterializationHook` | Callback invoked for every materialized entity |
//! | `StorageBackendFactory` | Creates and disposes contexts |
//! | `TypeMatcher` | Maps a requested context type to its concrete type |
//! | `FilterExecutor` | Pushes the scope's data filters into a context |
//! | `AmbientTransactionProvider` | Begins ambient transactions |
//! | `AmbientTransaction` | Enlist, commit, dispose |
//! | `IdAssigner` | Assigns ids to new entities (collaborator, not used by the scope) |

use crate::entity::{EntityRecord, EntityRef, EntryState};
use crate::error::{BackendResult, UowResult};
use crate::filter::{DataFilter, FilterSet};
use crate::options::IsolationLevel;
use crate::types::{ContextKey, ContextTypeId};
use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A live persistence context owned by one scope
///
/// Implementations are created by a `StorageBackendFactory` and wrapped in a
/// `ContextHandle` by the unit of work.
#[async_trait]
pub trait PersistenceContext: Send + 'static {
    /// Concrete type this context was created for
    fn context_type(&self) -> ContextTypeId;

    /// Flush pending writes, returning the number of entries written
    fn save_changes(&mut self) -> BackendResult<usize>;

    /// Flush pending writes without blocking the caller's thread
    ///
    /// The default delegates to `save_changes`. Backends with real I/O
    /// override it and may surface `BackendErrorKind::Cancelled` when
    /// `cancel` fires mid-flush.
    async fn save_changes_async(&mut self, cancel: &CancellationToken) -> BackendResult<usize> {
        let _ = cancel;
        self.save_changes()
    }

    /// Command timeout, if one was set
    fn command_timeout(&self) -> Option<Duration>;

    /// Set the command timeout
    fn set_command_timeout(&mut self, timeout: Duration);

    /// Enable or disable lazy loading
    fn set_lazy_loading_enabled(&mut self, enabled: bool) {
        let _ = enabled;
    }

    /// Attach the materialization callback
    ///
    /// Returns false when the backend cannot intercept materialization.
    fn attach_materialization_hook(&mut self, hook: Arc<dyn MaterializationHook>) -> bool {
        let _ = hook;
        false
    }

    /// Apply one data filter's current state
    fn apply_filter(&mut self, filter: &DataFilter) -> BackendResult<()> {
        let _ = filter;
        Ok(())
    }

    /// Release the context; further use must fail
    fn release(&mut self) -> BackendResult<()>;

    /// Downcast support
    fn as_any(&self) -> &dyn Any;

    /// Downcast support
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Change-tracking view of a context
///
/// Handed to a `MaterializationHook` while an entity is being materialized.
pub trait ChangeTracker {
    /// Whether changes are detected automatically
    fn auto_detect_changes(&self) -> bool;

    /// Turn automatic change detection on or off
    fn set_auto_detect_changes(&mut self, enabled: bool);

    /// Current state of an entity; detects changes first when automatic
    /// detection is on
    fn entry_state(&mut self, entity: &EntityRef) -> EntryState;

    /// Force the state of a tracked entity
    ///
    /// Setting `Unchanged` accepts the entity's current values as its
    /// stored values.
    fn set_entry_state(&mut self, entity: &EntityRef, state: EntryState);

    /// Mutable access to a tracked entity
    fn entity_mut(&mut self, entity: &EntityRef) -> Option<&mut EntityRecord>;
}

/// Callback invoked by a backend for every entity built from stored data
pub trait MaterializationHook: Send + Sync {
    /// Called synchronously after `entity` was attached to `tracker`
    fn on_materialized(&self, tracker: &mut dyn ChangeTracker, entity: &EntityRef);
}

/// Creates and disposes persistence contexts
pub trait StorageBackendFactory: Send + Sync {
    /// Create a context for `key`
    fn create(&self, key: &ContextKey) -> BackendResult<Box<dyn PersistenceContext>>;

    /// Dispose a context created by this factory
    fn dispose(&self, context: &mut dyn PersistenceContext) -> BackendResult<()> {
        context.release()
    }
}

/// Maps a requested context type to the concrete type registered for it
pub trait TypeMatcher: Send + Sync {
    /// Concrete type for `requested`
    ///
    /// # Errors
    ///
    /// Returns `UowError::Configuration` when the mapping is ambiguous.
    fn concrete_type(&self, requested: ContextTypeId) -> UowResult<ContextTypeId>;
}

/// Pushes the scope's filter state into a context
pub trait FilterExecutor: Send + Sync {
    /// Apply every filter in `filters` to `context`
    fn apply_filters(
        &self,
        filters: &FilterSet,
        context: &mut dyn PersistenceContext,
    ) -> BackendResult<()>;
}

/// Settings for starting an ambient transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransactionSettings {
    /// Transaction timeout
    pub timeout: Option<Duration>,
    /// Isolation level
    pub isolation_level: IsolationLevel,
}

/// Begins ambient transactions
pub trait AmbientTransactionProvider: Send + Sync {
    /// Begin a transaction
    fn begin(&self, settings: TransactionSettings) -> BackendResult<Box<dyn AmbientTransaction>>;
}

/// An ambient transaction spanning every context enlisted in it
#[async_trait]
pub trait AmbientTransaction: Send {
    /// Transaction identifier for diagnostics
    fn id(&self) -> u64;

    /// Enlist a freshly created context
    fn enlist(&mut self, context: &mut dyn PersistenceContext) -> BackendResult<()>;

    /// Commit every enlisted context's flushed writes
    fn commit(&mut self) -> BackendResult<()>;

    /// Commit without blocking the caller's thread
    async fn commit_async(&mut self) -> BackendResult<()> {
        self.commit()
    }

    /// Dispose the transaction, rolling back if it was not committed
    fn dispose(&mut self) -> BackendResult<()>;
}

/// Assigns ids to entities that do not have one yet
pub trait IdAssigner: Send + Sync {
    /// Assign an id to `entity` if it has none
    fn assign_if_missing(&self, entity: &mut EntityRecord);
}
