//! Scope lifecycle counters
//!
//! Counters use `Relaxed` ordering: they are statistics, not synchronization,
//! and a snapshot taken while scopes are running may be momentarily
//! inconsistent.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lifecycle counters shared by every scope of one manager
#[derive(Debug, Default)]
pub struct ScopeMetrics {
    begun: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    disposed: AtomicU64,
}

impl ScopeMetrics {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_begun(&self) {
        self.begun.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_disposed(&self) {
        self.disposed.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self) -> ScopeMetricsSnapshot {
        let begun = self.begun.load(Ordering::Relaxed);
        let disposed = self.disposed.load(Ordering::Relaxed);
        ScopeMetricsSnapshot {
            begun,
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            disposed,
            active: begun.saturating_sub(disposed),
        }
    }
}

/// Copy of the scope counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScopeMetricsSnapshot {
    /// Scopes begun
    pub begun: u64,
    /// Scopes completed successfully
    pub completed: u64,
    /// Scopes that entered `Faulted`
    pub failed: u64,
    /// Begun scopes disposed
    pub disposed: u64,
    /// Begun scopes not yet disposed
    pub active: u64,
}

impl ScopeMetricsSnapshot {
    /// Completion rate (completed / begun)
    pub fn completion_rate(&self) -> f64 {
        if self.begun > 0 {
            self.completed as f64 / self.begun as f64
        } else {
            0.0
        }
    }
}
