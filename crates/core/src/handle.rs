//! Context handles
//!
//! A `ContextHandle` is the shared, identity-preserving reference to one
//! live persistence context. The pool hands out clones of the same handle
//! for the same key; `ptr_eq` tells whether two handles are the same context.
//!
//! The context sits behind an async-aware mutex. Blocking callers use
//! `try_lock` and get `InvalidOperation` if the context is already in use,
//! since a scope is single-writer and contention means misuse rather than
//! something worth waiting for. Async callers use `lock`.

use crate::error::{BackendError, BackendResult, DisposalFailure, UowError, UowResult};
use crate::traits::{PersistenceContext, StorageBackendFactory};
use crate::types::ContextKey;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// Guard over a locked context
pub type ContextGuard<'a> = MutexGuard<'a, Box<dyn PersistenceContext>>;

struct HandleInner {
    key: ContextKey,
    context: Mutex<Box<dyn PersistenceContext>>,
    released: AtomicBool,
}

/// Shared handle to a live persistence context
#[derive(Clone)]
pub struct ContextHandle {
    inner: Arc<HandleInner>,
}

impl ContextHandle {
    /// Wrap a freshly created context
    pub fn new(key: ContextKey, context: Box<dyn PersistenceContext>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                key,
                context: Mutex::new(context),
                released: AtomicBool::new(false),
            }),
        }
    }

    /// Pool key of this context
    pub fn key(&self) -> &ContextKey {
        &self.inner.key
    }

    /// True if both handles refer to the same context
    pub fn ptr_eq(&self, other: &ContextHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// True once `release_with` has run
    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::SeqCst)
    }

    /// Lock the context without blocking
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the context is locked elsewhere.
    pub fn try_lock(&self) -> UowResult<ContextGuard<'_>> {
        self.inner.context.try_lock().map_err(|_| {
            UowError::invalid_operation(format!(
                "context {} is in use by another operation",
                self.inner.key
            ))
        })
    }

    /// Lock the context, waiting for the current holder
    pub async fn lock(&self) -> ContextGuard<'_> {
        self.inner.context.lock().await
    }

    /// Run `f` against the concrete context type `C`
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the context is in use or is not a `C`.
    pub fn with<C, R>(&self, f: impl FnOnce(&mut C) -> R) -> UowResult<R>
    where
        C: PersistenceContext,
    {
        let mut guard = self.try_lock()?;
        let concrete = guard.as_any_mut().downcast_mut::<C>().ok_or_else(|| {
            UowError::invalid_operation(format!(
                "context {} is not a {}",
                self.inner.key,
                std::any::type_name::<C>()
            ))
        })?;
        Ok(f(concrete))
    }

    /// Release the context through `factory`, at most once
    ///
    /// Returns `Ok(false)` if the context was already released. A context
    /// that is still locked elsewhere is left unreleased so the release can
    /// be retried; a failing backend release still counts as the one attempt.
    pub fn release_with(&self, factory: &dyn StorageBackendFactory) -> BackendResult<bool> {
        if self.is_released() {
            return Ok(false);
        }
        let mut guard = self.inner.context.try_lock().map_err(|_| {
            BackendError::failed(format!(
                "context {} is still in use and cannot be released",
                self.inner.key
            ))
        })?;
        if self.inner.released.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        factory.dispose(guard.as_mut())?;
        Ok(true)
    }
}

/// Release every handle, keeping the ones that could not be released yet
///
/// Handles left in `handles` are still in use and can be passed again later.
pub fn release_pending(
    handles: &mut Vec<ContextHandle>,
    factory: &dyn StorageBackendFactory,
) -> Vec<DisposalFailure> {
    let mut failures = Vec::new();
    for handle in handles.iter() {
        if let Err(e) = handle.release_with(factory) {
            failures.push(DisposalFailure::new(handle.key().to_string(), e));
        }
    }
    handles.retain(|h| !h.is_released());
    failures
}

impl fmt::Debug for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextHandle")
            .field("key", &self.inner.key)
            .field("released", &self.is_released())
            .finish()
    }
}
