//! Core types and traits for the unit of work
//!
//! This crate defines the foundational types used throughout the system:
//! - ScopeId, ContextTypeId, ContextKey, ResolveArgs: identity types
//! - UnitOfWorkOptions, UnitOfWorkDefaults: scope configuration snapshot
//! - ContextHandle: shared handle to a live persistence context
//! - Value, Timestamp, EntityRecord, EntryState: materialized entity model
//! - DataFilter, FilterSet: query filters pushed into contexts
//! - Error: UowError / BackendError hierarchy
//! - Traits: capability interfaces for backends and collaborators

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod entity;
pub mod error;
pub mod filter;
pub mod handle;
pub mod options;
pub mod traits;
pub mod types;
pub mod value;

pub use entity::{EntityRecord, EntityRef, EntryState};
pub use error::{
    BackendError, BackendErrorKind, BackendResult, DisposalFailure, UowError, UowResult,
};
pub use filter::{
    DataFilter, FilterSet, MAY_HAVE_TENANT, MUST_HAVE_TENANT, SOFT_DELETE, TENANT_ID_PARAM,
};
pub use handle::{release_pending, ContextGuard, ContextHandle};
pub use options::{IsolationLevel, ScopeOption, UnitOfWorkDefaults, UnitOfWorkOptions};
pub use traits::{
    AmbientTransaction, AmbientTransactionProvider, ChangeTracker, FilterExecutor, IdAssigner,
    MaterializationHook, PersistenceContext, StorageBackendFactory, TransactionSettings,
    TypeMatcher,
};
pub use types::{
    ContextKey, ContextTypeId, ResolveArgs, ResolveValue, ScopeId, CONTEXT_CONCRETE_TYPE_ARG,
    CONTEXT_TYPE_ARG,
};
pub use value::{Timestamp, TimestampKind, Value};

/// Re-exported so backends and callers share one cancellation type
pub use tokio_util::sync::CancellationToken;
