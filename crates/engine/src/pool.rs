//! Per-scope context pool
//!
//! Caches one `ContextHandle` per `ContextKey` for the life of a scope.
//! Entries are never evicted mid-scope; handles are kept in creation order
//! so flushes and releases run deterministically.

use rustc_hash::FxHashMap;
use tracing::debug;
use unitwork_core::{ContextHandle, ContextKey, UowResult};

/// Strict cache of the contexts created by one scope
#[derive(Debug, Default)]
pub struct ContextPool {
    handles: Vec<ContextHandle>,
    index: FxHashMap<ContextKey, usize>,
}

impl ContextPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the handle for `key`, creating it with `factory` on first use
    ///
    /// A failing factory leaves the pool unchanged.
    pub fn get_or_create<F>(&mut self, key: &ContextKey, factory: F) -> UowResult<ContextHandle>
    where
        F: FnOnce(&ContextKey) -> UowResult<ContextHandle>,
    {
        if let Some(&slot) = self.index.get(key) {
            return Ok(self.handles[slot].clone());
        }

        let handle = factory(key)?;
        self.index.insert(key.clone(), self.handles.len());
        self.handles.push(handle.clone());
        debug!(target: "unitwork::pool", context = %key, pooled = self.handles.len(), "Context pooled");
        Ok(handle)
    }

    /// Handle for `key`, if one was created
    pub fn get(&self, key: &ContextKey) -> Option<&ContextHandle> {
        self.index.get(key).map(|&slot| &self.handles[slot])
    }

    /// Every handle in creation order
    pub fn all(&self) -> &[ContextHandle] {
        &self.handles
    }

    /// Number of pooled contexts
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// True if no context was created
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Drop every entry without releasing it
    pub fn clear(&mut self) {
        self.handles.clear();
        self.index.clear();
    }
}
