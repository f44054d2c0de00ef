//! Filter executor

use unitwork_core::{BackendResult, FilterExecutor, FilterSet, PersistenceContext};

/// Forwards every filter, enabled or not, to the context
///
/// Disabled filters are forwarded too so a context that saw a filter enabled
/// earlier in the scope learns that it was turned off.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFilterExecutor;

impl FilterExecutor for DefaultFilterExecutor {
    fn apply_filters(
        &self,
        filters: &FilterSet,
        context: &mut dyn PersistenceContext,
    ) -> BackendResult<()> {
        for filter in filters.iter() {
            context.apply_filter(filter)?;
        }
        Ok(())
    }
}
