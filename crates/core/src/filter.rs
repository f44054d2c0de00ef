//! Data filters
//!
//! A data filter is a named query predicate (soft delete, tenant scoping)
//! that a persistence context applies to every query it runs. The scope
//! owns the current filter state and pushes it to each pooled context.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Hides rows whose `is_deleted` field is true
pub const SOFT_DELETE: &str = "SoftDelete";
/// With a tenant set, shows only rows carrying that tenant
pub const MUST_HAVE_TENANT: &str = "MustHaveTenant";
/// Shows shared rows plus rows carrying the current tenant
pub const MAY_HAVE_TENANT: &str = "MayHaveTenant";
/// Parameter name holding the tenant id for the tenant filters
pub const TENANT_ID_PARAM: &str = "tenant_id";

/// A named query predicate and its current state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFilter {
    /// Filter name
    pub name: String,
    /// Whether the predicate is applied
    pub enabled: bool,
    /// Predicate parameters
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
}

impl DataFilter {
    /// Create a filter without parameters
    pub fn new(name: impl Into<String>, enabled: bool) -> Self {
        Self {
            name: name.into(),
            enabled,
            parameters: BTreeMap::new(),
        }
    }

    /// Set a parameter value
    pub fn with_parameter(mut self, name: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    /// Look up a parameter value
    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name)
    }
}

/// Ordered set of data filters, unique by name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterSet {
    filters: Vec<DataFilter>,
}

impl FilterSet {
    /// Empty filter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Soft-delete enabled, both tenant filters enabled without a tenant
    pub fn standard() -> Self {
        let mut set = Self::new();
        set.upsert(DataFilter::new(SOFT_DELETE, true));
        set.upsert(DataFilter::new(MUST_HAVE_TENANT, true));
        set.upsert(DataFilter::new(MAY_HAVE_TENANT, true));
        set
    }

    /// Insert a filter or replace the one with the same name
    pub fn upsert(&mut self, filter: DataFilter) {
        match self.filters.iter_mut().find(|f| f.name == filter.name) {
            Some(existing) => *existing = filter,
            None => self.filters.push(filter),
        }
    }

    /// Look up a filter by name
    pub fn get(&self, name: &str) -> Option<&DataFilter> {
        self.filters.iter().find(|f| f.name == name)
    }

    /// Look up a filter by name for modification
    pub fn get_mut(&mut self, name: &str) -> Option<&mut DataFilter> {
        self.filters.iter_mut().find(|f| f.name == name)
    }

    /// True if the named filter exists and is enabled
    pub fn is_enabled(&self, name: &str) -> bool {
        self.get(name).is_some_and(|f| f.enabled)
    }

    /// Iterate filters in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &DataFilter> {
        self.filters.iter()
    }

    /// Iterate enabled filters in insertion order
    pub fn active(&self) -> impl Iterator<Item = &DataFilter> {
        self.filters.iter().filter(|f| f.enabled)
    }

    /// Number of filters
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// True if there are no filters
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl FromIterator<DataFilter> for FilterSet {
    fn from_iter<I: IntoIterator<Item = DataFilter>>(iter: I) -> Self {
        let mut set = Self::new();
        for filter in iter {
            set.upsert(filter);
        }
        set
    }
}
