//! UnitOfWorkScope: one logical unit of work over many persistence contexts
//!
//! A scope lazily opens one context per `(concrete type, connection string)`,
//! flushes them all in creation order, commits the ambient transaction when
//! transactional, and releases everything exactly once on dispose.
//!
//! ## Scope State Machine
//!
//! ```text
//! Created --begin--> Begun --complete--> Completing --ok--> Completed
//!                      |                     |
//!                      |                     +--error--> Faulted
//!                      +--save_changes error-----------> Faulted
//!
//! any state --dispose--> Disposed
//! ```
//!
//! A second dispose only retries contexts that were still locked the first
//! time; everything else is a no-op.
//!
//! ```text
//! ```
//!
//! ## Context configuration
//!
//! A newly created context is configured before it is pooled:
//! - the scope timeout becomes its command timeout unless one is already set
//! - the lazy-load flag is pushed when the options carry one
//! - the materialization interceptor is attached when the backend supports it
//! - the current filter state is applied
//!
//! ## Single writer
//!
//! A scope is driven by one caller at a time. Contexts are reached through
//! `ContextHandle`s; blocking paths fail with `InvalidOperation` when a
//! context is still locked by the caller instead of waiting on it.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use unitwork_concurrency::{TransactionStatus, TransactionStrategy};
use unitwork_core::{
    release_pending, CancellationToken, ContextHandle, ContextKey, ContextTypeId,
    DisposalFailure, FilterSet, ResolveArgs, ScopeId, UnitOfWorkOptions, UowError, UowResult,
    Value,
};

use crate::pool::ContextPool;
use crate::services::UnitOfWorkServices;

/// Lifecycle state of a scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    /// Constructed, `begin` not called yet
    Created,
    /// Options captured, contexts may be created
    Begun,
    /// `complete` in progress
    Completing,
    /// Flushed and committed
    Completed,
    /// A flush or commit failed
    Faulted,
    /// Every resource released (terminal)
    Disposed,
}

impl fmt::Display for ScopeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScopeState::Created => "created",
            ScopeState::Begun => "begun",
            ScopeState::Completing => "completing",
            ScopeState::Completed => "completed",
            ScopeState::Faulted => "faulted",
            ScopeState::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

type CompletedHandler = Box<dyn FnOnce() + Send>;
type FailedHandler = Box<dyn FnOnce(&UowError) + Send>;
type DisposedHandler = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct ScopeEvents {
    completed: Vec<CompletedHandler>,
    failed: Vec<FailedHandler>,
    disposed: Vec<DisposedHandler>,
}

/// Pending veto on a scope's commit
///
/// Shared with inner participants so an abandoned participant can veto
/// without taking the scope lock. The first reason wins.
#[derive(Debug, Clone, Default)]
pub(crate) struct VetoCell(Arc<Mutex<Option<String>>>);

impl VetoCell {
    pub(crate) fn set(&self, reason: impl Into<String>) {
        let mut slot = self.0.lock();
        if slot.is_none() {
            *slot = Some(reason.into());
        }
    }

    pub(crate) fn reason(&self) -> Option<String> {
        self.0.lock().clone()
    }
}

/// One unit of work
pub struct UnitOfWorkScope {
    id: ScopeId,
    state: ScopeState,
    services: UnitOfWorkServices,
    options: Option<UnitOfWorkOptions>,
    strategy: Option<TransactionStrategy>,
    pool: ContextPool,
    filters: FilterSet,
    events: ScopeEvents,
    veto: VetoCell,
    unreleased: Vec<ContextHandle>,
}

impl UnitOfWorkScope {
    /// Create a scope using `services`; call `begin` before use
    pub fn new(services: UnitOfWorkServices) -> Self {
        let filters = services.defaults.filters.clone();
        Self {
            id: ScopeId::new(),
            state: ScopeState::Created,
            services,
            options: None,
            strategy: None,
            pool: ContextPool::new(),
            filters,
            events: ScopeEvents::default(),
            veto: VetoCell::default(),
            unreleased: Vec::new(),
        }
    }

    /// Scope identifier
    pub fn id(&self) -> ScopeId {
        self.id
    }

    /// Current lifecycle state
    pub fn state(&self) -> ScopeState {
        self.state
    }

    /// Options captured at begin, defaults filled in
    pub fn options(&self) -> Option<&UnitOfWorkOptions> {
        self.options.as_ref()
    }

    /// True if the scope runs inside an ambient transaction
    pub fn is_transactional(&self) -> bool {
        self.strategy
            .as_ref()
            .is_some_and(TransactionStrategy::is_transactional)
    }

    /// Status of the ambient transaction, if any
    pub fn transaction_status(&self) -> Option<TransactionStatus> {
        self.strategy.as_ref().and_then(TransactionStrategy::status)
    }

    /// Number of pooled contexts
    pub fn context_count(&self) -> usize {
        self.pool.len()
    }

    /// Pooled contexts in creation order
    pub fn contexts(&self) -> &[ContextHandle] {
        self.pool.all()
    }

    /// Capture `options` and start the transaction strategy
    ///
    /// # Errors
    ///
    /// - `DuplicateBegin` if the scope already began
    /// - `Configuration` if transactional and no provider is configured
    /// - `Transaction` if the ambient transaction cannot be started
    pub fn begin(&mut self, options: UnitOfWorkOptions) -> UowResult<()> {
        match self.state {
            ScopeState::Created => {}
            ScopeState::Disposed => {
                return Err(UowError::invalid_operation(format!(
                    "unit of work {} is disposed",
                    self.id
                )))
            }
            _ => return Err(UowError::DuplicateBegin { scope: self.id }),
        }

        let options = options.fill_defaults(&self.services.defaults.options);
        let mut strategy =
            TransactionStrategy::select(&options, self.services.transaction_provider.clone())?;
        strategy.init_options(&options)?;

        debug!(
            target: "unitwork::scope",
            scope = %self.id,
            transactional = options.is_transactional(),
            timeout = ?options.timeout,
            "Unit of work begun"
        );

        self.options = Some(options);
        self.strategy = Some(strategy);
        self.state = ScopeState::Begun;
        self.services.metrics.record_begun();
        Ok(())
    }

    /// Context for the requested type `R`
    ///
    /// `R` may be an abstract type (e.g. `dyn Trait`) that the type matcher
    /// maps to a concrete context type.
    pub fn context<R: ?Sized + 'static>(&mut self) -> UowResult<ContextHandle> {
        self.context_for(ContextTypeId::of::<R>(), ResolveArgs::new())
    }

    /// Context for `requested`, with extra resolver arguments
    ///
    /// # Errors
    ///
    /// - `InvalidOperation` if the scope is not begun
    /// - `Configuration` if the type or connection string cannot be resolved
    /// - `ContextCreation` / `Transaction` if the backend fails
    pub fn context_for(
        &mut self,
        requested: ContextTypeId,
        extra: ResolveArgs,
    ) -> UowResult<ContextHandle> {
        self.ensure_state(&[ScopeState::Begun], "get a context")?;

        let concrete = self.services.type_matcher.concrete_type(requested)?;
        let mut args = ResolveArgs::for_context(requested, concrete);
        for (name, value) in extra.iter() {
            args.insert(name, value.clone());
        }
        let connection_string = self.services.resolver.resolve(&args)?;
        let key = ContextKey::new(concrete, connection_string);

        let Self {
            id,
            services,
            options,
            strategy,
            pool,
            filters,
            ..
        } = self;
        let (options, strategy) = match (options.as_ref(), strategy.as_mut()) {
            (Some(o), Some(s)) => (o, s),
            _ => return Err(UowError::invalid_operation("unit of work has not begun")),
        };

        pool.get_or_create(&key, |key| {
            let handle = strategy.create_context(key, services.backend.as_ref())?;
            if let Err(e) = configure(&handle, options, services, filters) {
                if !strategy.is_transactional() {
                    if let Err(release) = handle.release_with(services.backend.as_ref()) {
                        warn!(target: "unitwork::scope", scope = %id, context = %key, error = %release, "Failed to release misconfigured context");
                    }
                }
                return Err(e);
            }
            debug!(target: "unitwork::scope", scope = %id, context = %key, "Context created");
            Ok(handle)
        })
    }

    /// Flush every pooled context in creation order
    ///
    /// A failure aborts the remaining flushes and faults the scope. Contexts
    /// already flushed are not rolled back here.
    pub fn save_changes(&mut self) -> UowResult<()> {
        self.ensure_state(&[ScopeState::Begun], "save changes")?;
        let result = self.flush_all();
        self.settle(result)
    }

    /// Asynchronous `save_changes`
    ///
    /// `cancel` is checked before each context; a flush already running is
    /// not interrupted.
    pub async fn save_changes_async(&mut self, cancel: &CancellationToken) -> UowResult<()> {
        self.ensure_state(&[ScopeState::Begun], "save changes")?;
        let result = flush_handles(self.id, self.pool.all().to_vec(), cancel).await;
        self.settle(result)
    }

    /// Flush every context, then commit the ambient transaction
    ///
    /// Commit is never attempted after a flush failure.
    pub fn complete(&mut self) -> UowResult<()> {
        self.start_completing()?;
        let result = match self.flush_all() {
            Ok(()) => self.commit(),
            Err(e) => Err(e),
        };
        self.finish_completing(result)
    }

    /// Asynchronous `complete`
    pub async fn complete_async(&mut self, cancel: &CancellationToken) -> UowResult<()> {
        self.start_completing()?;
        let mut result = flush_handles(self.id, self.pool.all().to_vec(), cancel).await;
        if result.is_ok() && cancel.is_cancelled() {
            result = Err(UowError::Cancelled);
        }
        if result.is_ok() {
            result = match self.strategy.as_mut() {
                Some(strategy) => strategy.commit_async().await,
                None => Err(UowError::invalid_operation("unit of work has not begun")),
            };
        }
        self.finish_completing(result)
    }

    /// Release every resource
    ///
    /// Transactional scopes dispose the ambient transaction and its enlisted
    /// contexts; otherwise each pooled context is released in creation
    /// order. Every resource is attempted; failures are aggregated into one
    /// `Disposal` error. A context still locked by the caller is kept and
    /// released by the next call; otherwise a second call is a no-op.
    pub fn dispose(&mut self) -> UowResult<()> {
        if self.state == ScopeState::Disposed {
            return self.retry_release();
        }
        let previous = self.state;
        let backend = self.services.backend.clone();
        let mut failures: Vec<DisposalFailure> = Vec::new();

        if matches!(previous, ScopeState::Begun | ScopeState::Faulted) {
            debug!(target: "unitwork::scope", scope = %self.id, state = %previous, "Disposing without completing");
        }

        if let Some(strategy) = self.strategy.as_mut() {
            failures.extend(strategy.dispose(backend.as_ref()));
        }
        // Contexts the strategy still holds are retried by the strategy.
        let held = self
            .strategy
            .as_ref()
            .map(|s| s.enlisted().to_vec())
            .unwrap_or_default();
        let mut pending: Vec<ContextHandle> = self
            .pool
            .all()
            .iter()
            .filter(|h| !held.iter().any(|e| e.ptr_eq(h)))
            .cloned()
            .collect();
        failures.extend(release_pending(&mut pending, backend.as_ref()));
        self.unreleased = pending;
        self.pool.clear();
        self.state = ScopeState::Disposed;

        if previous != ScopeState::Created {
            self.services.metrics.record_disposed();
        }
        for handler in std::mem::take(&mut self.events.disposed) {
            handler();
        }

        self.disposal_result(failures)
    }

    /// Number of contexts a previous dispose could not release yet
    pub fn unreleased_count(&self) -> usize {
        if self.state != ScopeState::Disposed {
            return 0;
        }
        let held = self.strategy.as_ref().map_or(0, |s| s.enlisted().len());
        self.unreleased.len() + held
    }

    fn retry_release(&mut self) -> UowResult<()> {
        if self.unreleased_count() == 0 {
            return Ok(());
        }
        let backend = self.services.backend.clone();
        let mut failures = Vec::new();
        if let Some(strategy) = self.strategy.as_mut() {
            failures.extend(strategy.dispose(backend.as_ref()));
        }
        failures.extend(release_pending(&mut self.unreleased, backend.as_ref()));
        self.disposal_result(failures)
    }

    fn disposal_result(&self, failures: Vec<DisposalFailure>) -> UowResult<()> {
        if failures.is_empty() {
            debug!(target: "unitwork::scope", scope = %self.id, "Unit of work disposed");
            Ok(())
        } else {
            for failure in &failures {
                warn!(target: "unitwork::scope", scope = %self.id, resource = %failure.resource, error = %failure.error, "Release failed");
            }
            Err(UowError::Disposal(failures))
        }
    }

    // ========================================================================
    // Filters
    // ========================================================================

    /// Current filter state
    pub fn filters(&self) -> &FilterSet {
        &self.filters
    }

    /// True if the named filter exists and is enabled
    pub fn is_filter_enabled(&self, name: &str) -> bool {
        self.filters.is_enabled(name)
    }

    /// Enable a filter and push the change to every pooled context
    pub fn enable_filter(&mut self, name: &str) -> UowResult<()> {
        self.set_filter_enabled(name, true)
    }

    /// Disable a filter and push the change to every pooled context
    pub fn disable_filter(&mut self, name: &str) -> UowResult<()> {
        self.set_filter_enabled(name, false)
    }

    /// Set a filter parameter and push the change to every pooled context
    pub fn set_filter_parameter(
        &mut self,
        name: &str,
        parameter: &str,
        value: Value,
    ) -> UowResult<()> {
        self.ensure_not_disposed()?;
        self.filter_mut(name)?
            .parameters
            .insert(parameter.to_string(), value);
        self.reapply_filters()
    }

    fn set_filter_enabled(&mut self, name: &str, enabled: bool) -> UowResult<()> {
        self.ensure_not_disposed()?;
        let filter = self.filter_mut(name)?;
        if filter.enabled == enabled {
            return Ok(());
        }
        filter.enabled = enabled;
        debug!(target: "unitwork::scope", scope = %self.id, filter = name, enabled, "Filter changed");
        self.reapply_filters()
    }

    fn filter_mut(&mut self, name: &str) -> UowResult<&mut unitwork_core::DataFilter> {
        self.filters
            .get_mut(name)
            .ok_or_else(|| UowError::invalid_operation(format!("unknown data filter '{}'", name)))
    }

    fn reapply_filters(&self) -> UowResult<()> {
        for handle in self.pool.all() {
            let mut ctx = handle.try_lock()?;
            self.services
                .filter_executor
                .apply_filters(&self.filters, ctx.as_mut())
                .map_err(|e| {
                    UowError::invalid_operation(format!(
                        "failed to apply filters to {}: {}",
                        handle.key(),
                        e
                    ))
                })?;
        }
        Ok(())
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Run `handler` once after a successful complete
    pub fn on_completed(&mut self, handler: impl FnOnce() + Send + 'static) {
        self.events.completed.push(Box::new(handler));
    }

    /// Run `handler` once when the scope faults
    pub fn on_failed(&mut self, handler: impl FnOnce(&UowError) + Send + 'static) {
        self.events.failed.push(Box::new(handler));
    }

    /// Run `handler` once on the first dispose
    pub fn on_disposed(&mut self, handler: impl FnOnce() + Send + 'static) {
        self.events.disposed.push(Box::new(handler));
    }

    /// Cell that makes the next `complete` fail without committing
    pub(crate) fn veto_cell(&self) -> VetoCell {
        self.veto.clone()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn ensure_state(&self, allowed: &[ScopeState], action: &str) -> UowResult<()> {
        if allowed.contains(&self.state) {
            return Ok(());
        }
        Err(UowError::invalid_operation(format!(
            "cannot {} in unit of work {}: scope is {}",
            action, self.id, self.state
        )))
    }

    fn ensure_not_disposed(&self) -> UowResult<()> {
        if self.state == ScopeState::Disposed {
            return Err(UowError::invalid_operation(format!(
                "unit of work {} is disposed",
                self.id
            )));
        }
        Ok(())
    }

    fn flush_all(&self) -> UowResult<()> {
        for handle in self.pool.all() {
            let mut ctx = handle.try_lock()?;
            let written = ctx.save_changes().map_err(|source| UowError::Flush {
                key: handle.key().clone(),
                source,
            })?;
            debug!(target: "unitwork::scope", scope = %self.id, context = %handle.key(), written, "Context flushed");
        }
        Ok(())
    }

    fn commit(&mut self) -> UowResult<()> {
        match self.strategy.as_mut() {
            Some(strategy) => strategy.commit(),
            None => Err(UowError::invalid_operation("unit of work has not begun")),
        }
    }

    fn start_completing(&mut self) -> UowResult<()> {
        self.ensure_state(&[ScopeState::Begun], "complete")?;
        if let Some(reason) = self.veto.reason() {
            let error = UowError::invalid_operation(format!(
                "unit of work {} cannot complete: {}",
                self.id, reason
            ));
            self.fault(&error);
            return Err(error);
        }
        self.state = ScopeState::Completing;
        Ok(())
    }

    fn finish_completing(&mut self, result: UowResult<()>) -> UowResult<()> {
        match result {
            Ok(()) => {
                self.state = ScopeState::Completed;
                self.services.metrics.record_completed();
                info!(target: "unitwork::scope", scope = %self.id, contexts = self.pool.len(), transactional = self.is_transactional(), "Unit of work completed");
                for handler in std::mem::take(&mut self.events.completed) {
                    handler();
                }
                Ok(())
            }
            Err(e) => {
                self.fault(&e);
                Err(e)
            }
        }
    }

    fn settle(&mut self, result: UowResult<()>) -> UowResult<()> {
        if let Err(e) = &result {
            self.fault(e);
        }
        result
    }

    fn fault(&mut self, error: &UowError) {
        if matches!(self.state, ScopeState::Faulted | ScopeState::Disposed) {
            return;
        }
        self.state = ScopeState::Faulted;
        self.services.metrics.record_failed();
        warn!(target: "unitwork::scope", scope = %self.id, error = %error, "Unit of work faulted");
        for handler in std::mem::take(&mut self.events.failed) {
            handler(error);
        }
    }
}

async fn flush_handles(
    id: ScopeId,
    handles: Vec<ContextHandle>,
    cancel: &CancellationToken,
) -> UowResult<()> {
    for handle in handles {
        if cancel.is_cancelled() {
            debug!(target: "unitwork::scope", scope = %id, next = %handle.key(), "Flush cancelled");
            return Err(UowError::Cancelled);
        }
        let mut ctx = handle.lock().await;
        let written = ctx
            .save_changes_async(cancel)
            .await
            .map_err(|source| UowError::Flush {
                key: handle.key().clone(),
                source,
            })?;
        debug!(target: "unitwork::scope", scope = %id, context = %handle.key(), written, "Context flushed");
    }
    Ok(())
}

fn configure(
    handle: &ContextHandle,
    options: &UnitOfWorkOptions,
    services: &UnitOfWorkServices,
    filters: &FilterSet,
) -> UowResult<()> {
    let mut ctx = handle.try_lock()?;

    if let Some(timeout) = options.timeout {
        if ctx.command_timeout().is_none() {
            ctx.set_command_timeout(timeout);
        }
    }
    if let Some(enabled) = options.is_lazy_load_enabled {
        ctx.set_lazy_loading_enabled(enabled);
    }
    if let Some(hook) = &services.interceptor {
        if !ctx.attach_materialization_hook(hook.clone()) {
            debug!(target: "unitwork::scope", context = %handle.key(), "Backend does not intercept materialization");
        }
    }
    services
        .filter_executor
        .apply_filters(filters, ctx.as_mut())
        .map_err(|source| UowError::ContextCreation {
            key: handle.key().clone(),
            source,
        })
}

impl Drop for UnitOfWorkScope {
    fn drop(&mut self) {
        if self.state == ScopeState::Disposed && self.unreleased_count() == 0 {
            return;
        }
        if !matches!(self.state, ScopeState::Created | ScopeState::Disposed) {
            warn!(target: "unitwork::scope", scope = %self.id, state = %self.state, "Unit of work dropped without dispose");
        }
        if let Err(e) = self.dispose() {
            warn!(target: "unitwork::scope", scope = %self.id, error = %e, "Implicit dispose failed");
        }
    }
}

impl fmt::Debug for UnitOfWorkScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWorkScope")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("options", &self.options)
            .field("contexts", &self.pool.len())
            .finish()
    }
}
