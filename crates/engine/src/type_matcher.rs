//! Requested-to-concrete context type mapping

use rustc_hash::FxHashMap;
use unitwork_core::{ContextTypeId, TypeMatcher, UowError, UowResult};

/// Type matcher backed by explicit registrations
///
/// An unregistered type is its own concrete type. Registering more than one
/// concrete type for the same requested type makes that request ambiguous.
#[derive(Debug, Clone, Default)]
pub struct RegisteredTypeMatcher {
    registrations: FxHashMap<ContextTypeId, Vec<ContextTypeId>>,
}

impl RegisteredTypeMatcher {
    /// Matcher with no registrations
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `C` as the concrete type for requests of `R`
    pub fn register<R: ?Sized + 'static, C: 'static>(mut self) -> Self {
        self.register_ids(ContextTypeId::of::<R>(), ContextTypeId::of::<C>());
        self
    }

    /// Register `concrete` as the concrete type for requests of `requested`
    pub fn register_ids(&mut self, requested: ContextTypeId, concrete: ContextTypeId) {
        let targets = self.registrations.entry(requested).or_default();
        if !targets.contains(&concrete) {
            targets.push(concrete);
        }
    }
}

impl TypeMatcher for RegisteredTypeMatcher {
    fn concrete_type(&self, requested: ContextTypeId) -> UowResult<ContextTypeId> {
        match self.registrations.get(&requested).map(Vec::as_slice) {
            None | Some([]) => Ok(requested),
            Some([only]) => Ok(*only),
            Some(many) => Err(UowError::configuration(format!(
                "Ambiguous context type {}: registered for {}",
                requested.short_name(),
                many.iter()
                    .map(|t| t.short_name())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }
}
