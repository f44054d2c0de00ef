//! Unitwork - unit-of-work lifecycle over pluggable persistence contexts
//!
//! A unit of work groups every persistence context touched by one logical
//! operation. Contexts are opened lazily, one per (context type, connection
//! string), flushed together, committed in one ambient transaction when the
//! scope is transactional, and released exactly once.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use unitwork::{
//!     DefaultConnectionStringResolver, MemoryBackend, MemoryContext,
//!     MemoryTransactionProvider, UnitOfWorkManager, UnitOfWorkServices,
//! };
//!
//! let backend = MemoryBackend::new();
//! let services = UnitOfWorkServices::builder(Arc::new(backend.clone()))
//!     .resolver(DefaultConnectionStringResolver::new().with_default("Data Source=main"))
//!     .transaction_provider(MemoryTransactionProvider::new(&backend))
//!     .build();
//! let manager = UnitOfWorkManager::new(services);
//!
//! let mut uow = manager.begin_default()?;
//! uow.context::<MemoryContext>()?
//!     .with(|ctx: &mut MemoryContext| ctx.add(EntityRecord::new("Post")))??;
//! uow.complete()?;
//! uow.dispose()?;
//! ```
//!
//! # Architecture
//!
//! - `unitwork-core`: shared types, errors and capability traits
//! - `unitwork-concurrency`: transaction strategy
//! - `unitwork-storage`: in-memory reference backend and test tooling
//! - `unitwork-engine`: scope, pool, resolver, interceptor, manager, config

pub use unitwork_core::*;
pub use unitwork_engine::*;

/// In-memory reference backend
pub mod memory {
    pub use unitwork_storage::*;
}

pub use unitwork_storage::{
    MemoryBackend, MemoryContext, MemoryDatabase, MemoryTransaction, MemoryTransactionProvider,
    UuidIdAssigner,
};
