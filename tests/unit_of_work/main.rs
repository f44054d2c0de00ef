//! Unit of Work Integration Test Suite
//!
//! Drives complete units of work against the in-memory backend and checks
//! the backend journal for the order of creates, flushes, commits and
//! releases.
//!
//! ## Modules
//!
//! - `lifecycle`: begin, complete, dispose, fault handling
//! - `pooling`: context identity, type matching, resolution, timeouts
//! - `transactions`: ambient transaction staging, commit and rollback
//! - `nesting`: manager, inner scopes, scoped context provider
//! - `materialization`: interceptor normalization and data filters
//! - `async_flush`: asynchronous flush, commit and cancellation
//! - `configuration`: `unitwork.toml` driven services
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --test unit_of_work
//! cargo test --test unit_of_work nesting::
//! ```

use std::sync::{Arc, Once};

use unitwork::{
    ContextHandle, DefaultConnectionStringResolver, EntityRecord, MaterializationInterceptor,
    MemoryBackend, MemoryContext, MemoryTransactionProvider, RegisteredTypeMatcher,
    TimestampKind, UnitOfWorkOptions, UnitOfWorkScope, UnitOfWorkServices,
};

mod configuration;
mod lifecycle;
mod materialization;
mod pooling;
mod transactions;

// ============================================================================
// Context types
// ============================================================================

/// Blog store, resolved to `Data Source=blogs`
pub struct Blogs;

/// Order store, resolved to a connection string with its own timeout
pub struct Orders;

/// Abstract blog store, mapped onto `Blogs`
pub trait BlogStore {}

pub const BLOGS: &str = "Blogs#Data Source=blogs";
pub const ORDERS: &str = "Orders#Data Source=orders;Command Timeout=10";

// ============================================================================
// Helpers
// ============================================================================

static TRACING: Once = Once::new();

/// Route engine logs to the test output
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

/// Services with the standard test resolver, transactions and UTC normalization
pub fn services(backend: &MemoryBackend) -> UnitOfWorkServices {
    init_tracing();
    UnitOfWorkServices::builder(Arc::new(backend.clone()))
        .resolver(
            DefaultConnectionStringResolver::new()
                .with_type::<Blogs>("Data Source=blogs")
                .with_type::<Orders>("Data Source=orders;Command Timeout=10"),
        )
        .type_matcher(RegisteredTypeMatcher::new().register::<dyn BlogStore, Blogs>())
        .transaction_provider(MemoryTransactionProvider::new(backend))
        .interceptor(MaterializationInterceptor::timestamps(TimestampKind::Utc))
        .build()
}

/// A begun scope over `backend`
pub fn begun(backend: &MemoryBackend, options: UnitOfWorkOptions) -> UnitOfWorkScope {
    let mut scope = UnitOfWorkScope::new(services(backend));
    scope.begin(options).unwrap();
    scope
}

/// Track a new `entity_type` row with `id`
pub fn add(handle: &ContextHandle, entity_type: &str, id: &str) {
    handle
        .with(|ctx: &mut MemoryContext| ctx.add(EntityRecord::new(entity_type).with_id(id)))
        .unwrap()
        .unwrap();
}
