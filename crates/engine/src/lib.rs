//! Unit of work engine
//!
//! This crate ties the lower layers together:
//! - UnitOfWorkScope: lifecycle of one unit of work over many contexts
//! - UnitOfWorkManager: nesting and the current-scope stack
//! - ContextPool: one context per (type, connection string) per scope
//! - ConnectionStringResolver / TypeMatcher: how a context is located
//! - MaterializationInterceptor: normalization of loaded entities
//! - UowConfig: `unitwork.toml` loading
//!
//! Storage is reached only through the capability traits of `unitwork-core`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod filters;
pub mod interceptor;
pub mod manager;
pub mod metrics;
pub mod pool;
pub mod resolver;
pub mod scope;
pub mod services;
pub mod type_matcher;

pub use config::{FilterConfig, UnitOfWorkSection, UowConfig, CONFIG_FILE_NAME};
pub use filters::DefaultFilterExecutor;
pub use interceptor::{EntityNormalizer, MaterializationInterceptor, TimestampNormalizer};
pub use manager::{
    CurrentScopeProvider, ScopeHandle, ScopedContextProvider, SharedScope, UnitOfWorkManager,
};
pub use metrics::{ScopeMetrics, ScopeMetricsSnapshot};
pub use pool::ContextPool;
pub use resolver::{ConnectionStringResolver, DefaultConnectionStringResolver};
pub use scope::{ScopeState, UnitOfWorkScope};
pub use services::{UnitOfWorkServices, UnitOfWorkServicesBuilder};
pub use type_matcher::RegisteredTypeMatcher;

pub use unitwork_concurrency::{TransactionStatus, TransactionStrategy};
