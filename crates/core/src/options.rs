//! Unit-of-work options
//!
//! `UnitOfWorkOptions` is the configuration snapshot captured when a scope
//! begins. Unset fields are filled from `UnitOfWorkDefaults`; the result is
//! read-only for the rest of the scope's life.

use crate::filter::FilterSet;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Transaction isolation level requested from the ambient transaction provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Dirty reads allowed
    ReadUncommitted,
    /// Only committed data is visible
    #[default]
    ReadCommitted,
    /// Rows read stay stable for the transaction
    RepeatableRead,
    /// Full serializability
    Serializable,
    /// Snapshot isolation
    Snapshot,
}

/// How a new scope relates to an already active one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScopeOption {
    /// Join the active scope if there is one, otherwise start a new scope
    #[default]
    Required,
    /// Always start a new, independent scope
    RequiresNew,
    /// Start a new non-transactional scope
    Suppress,
}

/// Options captured once when a scope begins
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitOfWorkOptions {
    /// Wrap context creation in an ambient transaction
    pub is_transactional: Option<bool>,
    /// Transaction timeout and default command timeout
    pub timeout: Option<Duration>,
    /// Lazy loading flag pushed to every created context
    pub is_lazy_load_enabled: Option<bool>,
    /// Isolation level for the ambient transaction
    pub isolation_level: Option<IsolationLevel>,
    /// Relation to an already active scope
    pub scope: Option<ScopeOption>,
}

impl UnitOfWorkOptions {
    /// Options with every field unset
    pub fn new() -> Self {
        Self::default()
    }

    /// Transactional options
    pub fn transactional() -> Self {
        Self::new().with_transactional(true)
    }

    /// Non-transactional options
    pub fn non_transactional() -> Self {
        Self::new().with_transactional(false)
    }

    /// Set the transactional flag
    pub fn with_transactional(mut self, is_transactional: bool) -> Self {
        self.is_transactional = Some(is_transactional);
        self
    }

    /// Set the timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the lazy loading flag
    pub fn with_lazy_load(mut self, enabled: bool) -> Self {
        self.is_lazy_load_enabled = Some(enabled);
        self
    }

    /// Set the isolation level
    pub fn with_isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = Some(level);
        self
    }

    /// Set the scope option
    pub fn with_scope(mut self, scope: ScopeOption) -> Self {
        self.scope = Some(scope);
        self
    }

    /// True only when the transactional flag is explicitly set
    pub fn is_transactional(&self) -> bool {
        self.is_transactional == Some(true)
    }

    /// Fill unset fields from `defaults`
    ///
    /// `ScopeOption::Suppress` always yields a non-transactional scope.
    pub fn fill_defaults(mut self, defaults: &UnitOfWorkOptions) -> Self {
        if self.is_transactional.is_none() {
            self.is_transactional = defaults.is_transactional;
        }
        if self.timeout.is_none() {
            self.timeout = defaults.timeout;
        }
        if self.is_lazy_load_enabled.is_none() {
            self.is_lazy_load_enabled = defaults.is_lazy_load_enabled;
        }
        if self.isolation_level.is_none() {
            self.isolation_level = defaults.isolation_level;
        }
        if self.scope.is_none() {
            self.scope = defaults.scope;
        }
        if self.scope == Some(ScopeOption::Suppress) {
            self.is_transactional = Some(false);
        }
        self
    }
}

/// Process-wide defaults applied to every scope
#[derive(Debug, Clone, PartialEq)]
pub struct UnitOfWorkDefaults {
    /// Default option values
    pub options: UnitOfWorkOptions,
    /// Filters every scope starts with
    pub filters: FilterSet,
}

impl Default for UnitOfWorkDefaults {
    fn default() -> Self {
        Self {
            options: UnitOfWorkOptions {
                is_transactional: Some(true),
                timeout: None,
                is_lazy_load_enabled: None,
                isolation_level: Some(IsolationLevel::default()),
                scope: Some(ScopeOption::Required),
            },
            filters: FilterSet::standard(),
        }
    }
}
