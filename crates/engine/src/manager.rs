//! Scope manager and nesting
//!
//! `UnitOfWorkManager` starts scopes and tracks the active ones on an
//! explicit `CurrentScopeProvider` stack. Beginning with
//! `ScopeOption::Required` while a scope is active returns an *inner*
//! handle over the same scope; the outer handle alone commits and disposes.
//!
//! ```text
//! outer = manager.begin(Required)     -> new scope, pushed
//!   inner = manager.begin(Required)   -> joins outer scope
//!   inner.complete()                  -> marks inner done
//!   inner.dispose()                   -> no-op (veto if not completed)
//! outer.complete()                    -> flush + commit
//! outer.dispose()                     -> pop + release everything
//! ```

use parking_lot::Mutex as StackMutex;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use unitwork_core::{
    CancellationToken, ContextHandle, ContextTypeId, FilterSet, ResolveArgs, ScopeId, ScopeOption,
    UnitOfWorkOptions, UowError, UowResult, Value,
};

use crate::metrics::ScopeMetrics;
use crate::scope::{UnitOfWorkScope, VetoCell};
use crate::services::UnitOfWorkServices;

/// A scope shared between its handles
pub type SharedScope = Arc<Mutex<UnitOfWorkScope>>;

fn lock_now(scope: &SharedScope) -> UowResult<tokio::sync::MutexGuard<'_, UnitOfWorkScope>> {
    scope
        .try_lock()
        .map_err(|_| UowError::invalid_operation("unit of work is in use by another operation"))
}

// ============================================================================
// CurrentScopeProvider
// ============================================================================

/// Stack of active scopes, innermost last
#[derive(Clone, Default)]
pub struct CurrentScopeProvider {
    stack: Arc<StackMutex<Vec<ActiveScope>>>,
}

#[derive(Clone)]
struct ActiveScope {
    id: ScopeId,
    scope: SharedScope,
    veto: VetoCell,
}

impl CurrentScopeProvider {
    /// Empty provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Innermost active scope
    pub fn current(&self) -> Option<SharedScope> {
        self.stack.lock().last().map(|entry| Arc::clone(&entry.scope))
    }

    /// Id of the innermost active scope
    pub fn current_id(&self) -> Option<ScopeId> {
        self.stack.lock().last().map(|entry| entry.id)
    }

    /// Number of active scopes
    pub fn depth(&self) -> usize {
        self.stack.lock().len()
    }

    fn push(&self, entry: ActiveScope) {
        self.stack.lock().push(entry);
    }

    fn current_entry(&self) -> Option<ActiveScope> {
        self.stack.lock().last().cloned()
    }

    /// Remove `id` wherever it sits; scopes may be disposed out of order
    pub(crate) fn remove(&self, id: ScopeId) -> bool {
        let mut stack = self.stack.lock();
        match stack.iter().rposition(|entry| entry.id == id) {
            Some(pos) => {
                stack.remove(pos);
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for CurrentScopeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<ScopeId> = self.stack.lock().iter().map(|entry| entry.id).collect();
        f.debug_struct("CurrentScopeProvider")
            .field("stack", &ids)
            .finish()
    }
}

// ============================================================================
// UnitOfWorkManager
// ============================================================================

/// Entry point for starting units of work
#[derive(Debug, Clone)]
pub struct UnitOfWorkManager {
    services: UnitOfWorkServices,
    provider: CurrentScopeProvider,
}

impl UnitOfWorkManager {
    /// Manager with its own scope stack
    pub fn new(services: UnitOfWorkServices) -> Self {
        Self::with_provider(services, CurrentScopeProvider::new())
    }

    /// Manager sharing an existing scope stack
    pub fn with_provider(services: UnitOfWorkServices, provider: CurrentScopeProvider) -> Self {
        Self { services, provider }
    }

    /// Scope stack
    pub fn provider(&self) -> &CurrentScopeProvider {
        &self.provider
    }

    /// Innermost active scope
    pub fn current(&self) -> Option<SharedScope> {
        self.provider.current()
    }

    /// Lifecycle counters of every scope started here
    pub fn metrics(&self) -> &Arc<ScopeMetrics> {
        self.services.metrics()
    }

    /// Begin with default options
    pub fn begin_default(&self) -> UowResult<ScopeHandle> {
        self.begin(UnitOfWorkOptions::new())
    }

    /// Begin a unit of work
    ///
    /// With `Required` (the default) and an active scope, the returned handle
    /// joins that scope. Otherwise a new scope is begun and becomes current.
    pub fn begin(&self, options: UnitOfWorkOptions) -> UowResult<ScopeHandle> {
        let scope_option = options
            .scope
            .or(self.services.defaults().options.scope)
            .unwrap_or_default();

        if scope_option == ScopeOption::Required {
            if let Some(entry) = self.provider.current_entry() {
                debug!(target: "unitwork::manager", scope = %entry.id, "Joining active unit of work");
                return Ok(ScopeHandle::new(entry, HandleKind::Inner, self.provider.clone()));
            }
        }

        let mut scope = UnitOfWorkScope::new(self.services.clone());
        scope.begin(options)?;
        let entry = ActiveScope {
            id: scope.id(),
            veto: scope.veto_cell(),
            scope: Arc::new(Mutex::new(scope)),
        };
        self.provider.push(entry.clone());
        debug!(target: "unitwork::manager", scope = %entry.id, option = ?scope_option, depth = self.provider.depth(), "Started unit of work");
        Ok(ScopeHandle::new(entry, HandleKind::Outer, self.provider.clone()))
    }
}

// ============================================================================
// ScopeHandle
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandleKind {
    Outer,
    Inner,
}

/// Caller's view of a unit of work
///
/// An outer handle owns the scope. An inner handle participates in the
/// outer scope: its `complete` only records agreement and its `dispose`
/// vetoes the outer commit if `complete` was never called.
pub struct ScopeHandle {
    id: ScopeId,
    scope: SharedScope,
    kind: HandleKind,
    provider: CurrentScopeProvider,
    veto: VetoCell,
    completed: bool,
    disposed: bool,
}

impl ScopeHandle {
    fn new(entry: ActiveScope, kind: HandleKind, provider: CurrentScopeProvider) -> Self {
        Self {
            id: entry.id,
            scope: entry.scope,
            kind,
            provider,
            veto: entry.veto,
            completed: false,
            disposed: false,
        }
    }

    /// Id of the underlying scope
    pub fn id(&self) -> ScopeId {
        self.id
    }

    /// True if this handle joined an enclosing scope
    pub fn is_inner(&self) -> bool {
        self.kind == HandleKind::Inner
    }

    /// Shared scope behind this handle
    pub fn scope(&self) -> &SharedScope {
        &self.scope
    }

    /// Context for `T`, see `UnitOfWorkScope::context`
    pub fn context<T: ?Sized + 'static>(&self) -> UowResult<ContextHandle> {
        self.ensure_open()?;
        lock_now(&self.scope)?.context::<T>()
    }

    /// Context for `T`, waiting for the scope if it is in use
    pub async fn context_async<T: ?Sized + 'static>(&self) -> UowResult<ContextHandle> {
        self.ensure_open()?;
        self.scope.lock().await.context::<T>()
    }

    /// Context for a runtime type id with extra resolver arguments
    pub fn context_for(&self, requested: ContextTypeId, extra: ResolveArgs) -> UowResult<ContextHandle> {
        self.ensure_open()?;
        lock_now(&self.scope)?.context_for(requested, extra)
    }

    /// Flush every context of the scope
    pub fn save_changes(&self) -> UowResult<()> {
        self.ensure_open()?;
        lock_now(&self.scope)?.save_changes()
    }

    /// Asynchronous `save_changes`
    pub async fn save_changes_async(&self, cancel: &CancellationToken) -> UowResult<()> {
        self.ensure_open()?;
        self.scope.lock().await.save_changes_async(cancel).await
    }

    /// Complete the unit of work
    ///
    /// Outer handles flush and commit; inner handles only record completion.
    pub fn complete(&mut self) -> UowResult<()> {
        self.ensure_open()?;
        if self.kind == HandleKind::Outer {
            lock_now(&self.scope)?.complete()?;
        }
        self.completed = true;
        Ok(())
    }

    /// Asynchronous `complete`
    pub async fn complete_async(&mut self, cancel: &CancellationToken) -> UowResult<()> {
        self.ensure_open()?;
        if self.kind == HandleKind::Outer {
            self.scope.lock().await.complete_async(cancel).await?;
        }
        self.completed = true;
        Ok(())
    }

    /// Dispose this handle
    ///
    /// Outer handles leave the scope stack and dispose the scope. A second
    /// call is a no-op.
    pub fn dispose(&mut self) -> UowResult<()> {
        if self.disposed {
            return Ok(());
        }
        match self.kind {
            HandleKind::Inner => {
                self.leave_inner();
                Ok(())
            }
            HandleKind::Outer => {
                let mut scope = lock_now(&self.scope)?;
                self.provider.remove(self.id);
                let result = scope.dispose();
                self.disposed = result.is_ok();
                result
            }
        }
    }

    /// Asynchronous `dispose`
    pub async fn dispose_async(&mut self) -> UowResult<()> {
        if self.disposed {
            return Ok(());
        }
        match self.kind {
            HandleKind::Inner => {
                self.leave_inner();
                Ok(())
            }
            HandleKind::Outer => {
                let scope = Arc::clone(&self.scope);
                let mut scope = scope.lock().await;
                self.provider.remove(self.id);
                let result = scope.dispose();
                self.disposed = result.is_ok();
                result
            }
        }
    }

    // Needs no scope lock, so an abandoned participant always vetoes.
    fn leave_inner(&mut self) {
        self.disposed = true;
        if !self.completed {
            warn!(target: "unitwork::manager", scope = %self.id, "Inner unit of work disposed without complete");
            self.veto
                .set("an inner unit of work was disposed without completing");
        }
    }

    /// Enable a filter on the scope
    pub fn enable_filter(&self, name: &str) -> UowResult<()> {
        self.ensure_open()?;
        lock_now(&self.scope)?.enable_filter(name)
    }

    /// Disable a filter on the scope
    pub fn disable_filter(&self, name: &str) -> UowResult<()> {
        self.ensure_open()?;
        lock_now(&self.scope)?.disable_filter(name)
    }

    /// Set a filter parameter on the scope
    pub fn set_filter_parameter(&self, name: &str, parameter: &str, value: Value) -> UowResult<()> {
        self.ensure_open()?;
        lock_now(&self.scope)?.set_filter_parameter(name, parameter, value)
    }

    /// True if the named filter is enabled on the scope
    pub fn is_filter_enabled(&self, name: &str) -> UowResult<bool> {
        Ok(lock_now(&self.scope)?.is_filter_enabled(name))
    }

    /// Copy of the scope's filter state
    pub fn filters(&self) -> UowResult<FilterSet> {
        Ok(lock_now(&self.scope)?.filters().clone())
    }

    /// Run `f` with exclusive access to the scope
    pub fn with_scope<R>(&self, f: impl FnOnce(&mut UnitOfWorkScope) -> R) -> UowResult<R> {
        let mut scope = lock_now(&self.scope)?;
        Ok(f(&mut scope))
    }

    fn ensure_open(&self) -> UowResult<()> {
        if self.disposed {
            return Err(UowError::invalid_operation(format!(
                "handle for unit of work {} is disposed",
                self.id
            )));
        }
        Ok(())
    }
}

impl Drop for ScopeHandle {
    fn drop(&mut self) {
        if self.disposed {
            return;
        }
        if let Err(e) = self.dispose() {
            // The scope disposes itself once the last reference goes away.
            warn!(target: "unitwork::manager", scope = %self.id, error = %e, "Implicit handle dispose failed");
            if self.kind == HandleKind::Outer {
                self.provider.remove(self.id);
            }
        }
    }
}

impl std::fmt::Debug for ScopeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("completed", &self.completed)
            .field("disposed", &self.disposed)
            .finish()
    }
}

// ============================================================================
// ScopedContextProvider
// ============================================================================

/// Resolves `T` contexts from the scope that was current at construction
pub struct ScopedContextProvider<T: ?Sized> {
    scope: Option<SharedScope>,
    _marker: PhantomData<fn() -> Box<T>>,
}

impl<T: ?Sized + 'static> ScopedContextProvider<T> {
    /// Capture the manager's current scope
    pub fn new(manager: &UnitOfWorkManager) -> Self {
        Self {
            scope: manager.current(),
            _marker: PhantomData,
        }
    }

    /// Bind to the scope behind `handle`
    pub fn from_handle(handle: &ScopeHandle) -> Self {
        Self {
            scope: Some(Arc::clone(handle.scope())),
            _marker: PhantomData,
        }
    }

    /// True if a scope was captured
    pub fn has_scope(&self) -> bool {
        self.scope.is_some()
    }

    /// The `T` context of the captured scope
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if no scope was active at construction.
    pub fn context(&self) -> UowResult<ContextHandle> {
        lock_now(self.captured()?)?.context::<T>()
    }

    /// Asynchronous `context`
    pub async fn context_async(&self) -> UowResult<ContextHandle> {
        self.captured()?.lock().await.context::<T>()
    }

    fn captured(&self) -> UowResult<&SharedScope> {
        self.scope.as_ref().ok_or_else(|| {
            UowError::invalid_operation(format!(
                "no active unit of work to resolve {}",
                std::any::type_name::<T>()
            ))
        })
    }
}

impl<T: ?Sized> Clone for ScopedContextProvider<T> {
    fn clone(&self) -> Self {
        Self {
            scope: self.scope.clone(),
            _marker: PhantomData,
        }
    }
}
