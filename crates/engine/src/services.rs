//! Collaborators shared by every scope
//!
//! `UnitOfWorkServices` bundles the capabilities a scope consumes. It is
//! cheap to clone; every field is shared.

use std::sync::Arc;
use unitwork_core::{
    AmbientTransactionProvider, FilterExecutor, MaterializationHook, StorageBackendFactory,
    TypeMatcher, UnitOfWorkDefaults, UowResult,
};

use crate::config::UowConfig;
use crate::filters::DefaultFilterExecutor;
use crate::interceptor::MaterializationInterceptor;
use crate::metrics::ScopeMetrics;
use crate::resolver::{ConnectionStringResolver, DefaultConnectionStringResolver};
use crate::type_matcher::RegisteredTypeMatcher;

/// Capabilities consumed by a scope
#[derive(Clone)]
pub struct UnitOfWorkServices {
    pub(crate) backend: Arc<dyn StorageBackendFactory>,
    pub(crate) resolver: Arc<dyn ConnectionStringResolver>,
    pub(crate) type_matcher: Arc<dyn TypeMatcher>,
    pub(crate) filter_executor: Arc<dyn FilterExecutor>,
    pub(crate) transaction_provider: Option<Arc<dyn AmbientTransactionProvider>>,
    pub(crate) interceptor: Option<Arc<dyn MaterializationHook>>,
    pub(crate) defaults: UnitOfWorkDefaults,
    pub(crate) metrics: Arc<ScopeMetrics>,
}

impl UnitOfWorkServices {
    /// Start building services around `backend`
    pub fn builder(backend: Arc<dyn StorageBackendFactory>) -> UnitOfWorkServicesBuilder {
        UnitOfWorkServicesBuilder::new(backend)
    }

    /// Backend creating the contexts
    pub fn backend(&self) -> &Arc<dyn StorageBackendFactory> {
        &self.backend
    }

    /// Process-wide defaults
    pub fn defaults(&self) -> &UnitOfWorkDefaults {
        &self.defaults
    }

    /// Lifecycle counters
    pub fn metrics(&self) -> &Arc<ScopeMetrics> {
        &self.metrics
    }
}

impl std::fmt::Debug for UnitOfWorkServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWorkServices")
            .field("transactional", &self.transaction_provider.is_some())
            .field("interceptor", &self.interceptor.is_some())
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for `UnitOfWorkServices`
///
/// ```ignore
/// let backend = Arc::new(MemoryBackend::new());
/// let services = UnitOfWorkServices::builder(backend.clone())
///     .resolver(DefaultConnectionStringResolver::new().with_default("Data Source=main"))
///     .transaction_provider(MemoryTransactionProvider::new(&backend))
///     .interceptor(MaterializationInterceptor::timestamps(TimestampKind::Utc))
///     .build();
/// ```
///
/// Unset collaborators default to an empty resolver, an empty type matcher,
/// `DefaultFilterExecutor`, no transaction provider (transactional scopes
/// then fail to begin) and no interceptor.
pub struct UnitOfWorkServicesBuilder {
    backend: Arc<dyn StorageBackendFactory>,
    resolver: Option<Arc<dyn ConnectionStringResolver>>,
    type_matcher: Option<Arc<dyn TypeMatcher>>,
    filter_executor: Option<Arc<dyn FilterExecutor>>,
    transaction_provider: Option<Arc<dyn AmbientTransactionProvider>>,
    interceptor: Option<Arc<dyn MaterializationHook>>,
    defaults: UnitOfWorkDefaults,
}

impl UnitOfWorkServicesBuilder {
    /// Builder with defaults around `backend`
    pub fn new(backend: Arc<dyn StorageBackendFactory>) -> Self {
        Self {
            backend,
            resolver: None,
            type_matcher: None,
            filter_executor: None,
            transaction_provider: None,
            interceptor: None,
            defaults: UnitOfWorkDefaults::default(),
        }
    }

    /// Set the connection string resolver
    pub fn resolver(mut self, resolver: impl ConnectionStringResolver + 'static) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    /// Set the type matcher
    pub fn type_matcher(mut self, matcher: impl TypeMatcher + 'static) -> Self {
        self.type_matcher = Some(Arc::new(matcher));
        self
    }

    /// Set the filter executor
    pub fn filter_executor(mut self, executor: impl FilterExecutor + 'static) -> Self {
        self.filter_executor = Some(Arc::new(executor));
        self
    }

    /// Set the ambient transaction provider
    pub fn transaction_provider(
        mut self,
        provider: impl AmbientTransactionProvider + 'static,
    ) -> Self {
        self.transaction_provider = Some(Arc::new(provider));
        self
    }

    /// Set the materialization hook attached to every context
    pub fn interceptor(mut self, hook: impl MaterializationHook + 'static) -> Self {
        self.interceptor = Some(Arc::new(hook));
        self
    }

    /// Set the default options and filters
    pub fn defaults(mut self, defaults: UnitOfWorkDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Apply `unitwork.toml`: resolver, defaults and timestamp interceptor
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the clock setting is invalid.
    pub fn config(mut self, config: &UowConfig) -> UowResult<Self> {
        let clock = config.clock_kind()?;
        self.resolver = Some(Arc::new(DefaultConnectionStringResolver::from_config(config)));
        self.defaults = config.defaults();
        self.interceptor = Some(Arc::new(MaterializationInterceptor::timestamps(clock)));
        Ok(self)
    }

    /// Finish building
    pub fn build(self) -> UnitOfWorkServices {
        UnitOfWorkServices {
            backend: self.backend,
            resolver: self
                .resolver
                .unwrap_or_else(|| Arc::new(DefaultConnectionStringResolver::new())),
            type_matcher: self
                .type_matcher
                .unwrap_or_else(|| Arc::new(RegisteredTypeMatcher::new())),
            filter_executor: self
                .filter_executor
                .unwrap_or_else(|| Arc::new(DefaultFilterExecutor)),
            transaction_provider: self.transaction_provider,
            interceptor: self.interceptor,
            defaults: self.defaults,
            metrics: Arc::new(ScopeMetrics::new()),
        }
    }
}
