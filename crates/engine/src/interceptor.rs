//! Materialization interceptor
//!
//! Normalizes entities as the backend materializes them without the
//! normalization showing up as a user edit. For every entity:
//!
//! 1. automatic change detection is switched off
//! 2. the entity's tracked state is read and remembered
//! 3. the normalizer rewrites the entity's fields
//! 4. the remembered state is set back explicitly
//! 5. automatic change detection is restored to its previous setting
//!
//! Setting an `Unchanged` entity back to `Unchanged` accepts the normalized
//! values as its stored values, so the next flush does not write them.

use std::sync::Arc;
use tracing::trace;
use unitwork_core::{
    ChangeTracker, EntityRecord, EntityRef, MaterializationHook, TimestampKind, Value,
};

/// Field-level transform applied to materialized entities
pub trait EntityNormalizer: Send + Sync {
    /// Rewrite `entity` in place, returning the number of fields changed
    fn normalize(&self, entity: &mut EntityRecord) -> usize;
}

/// Coerces timestamps to one canonical kind
///
/// `Unspecified` timestamps are relabelled; timestamps of the other concrete
/// kind are converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampNormalizer {
    target: TimestampKind,
}

impl TimestampNormalizer {
    /// Normalizer targeting `target`; `Unspecified` normalizes nothing
    pub fn new(target: TimestampKind) -> Self {
        Self { target }
    }

    /// Normalizer targeting UTC
    pub fn utc() -> Self {
        Self::new(TimestampKind::Utc)
    }

    /// Target kind
    pub fn target(&self) -> TimestampKind {
        self.target
    }
}

impl EntityNormalizer for TimestampNormalizer {
    fn normalize(&self, entity: &mut EntityRecord) -> usize {
        if self.target == TimestampKind::Unspecified {
            return 0;
        }
        let mut changed = 0;
        for value in entity.fields.values_mut() {
            if let Value::Timestamp(ts) = value {
                if ts.kind != self.target {
                    *ts = ts.to_kind(self.target);
                    changed += 1;
                }
            }
        }
        changed
    }
}

/// `MaterializationHook` running an `EntityNormalizer` under suspended
/// change detection
#[derive(Clone)]
pub struct MaterializationInterceptor {
    normalizer: Arc<dyn EntityNormalizer>,
}

impl MaterializationInterceptor {
    /// Interceptor running `normalizer`
    pub fn new(normalizer: Arc<dyn EntityNormalizer>) -> Self {
        Self { normalizer }
    }

    /// Interceptor normalizing timestamps to `target`
    pub fn timestamps(target: TimestampKind) -> Self {
        Self::new(Arc::new(TimestampNormalizer::new(target)))
    }
}

impl std::fmt::Debug for MaterializationInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaterializationInterceptor").finish_non_exhaustive()
    }
}

impl MaterializationHook for MaterializationInterceptor {
    fn on_materialized(&self, tracker: &mut dyn ChangeTracker, entity: &EntityRef) {
        let auto_detect = tracker.auto_detect_changes();
        tracker.set_auto_detect_changes(false);

        let state = tracker.entry_state(entity);
        let changed = tracker
            .entity_mut(entity)
            .map(|record| self.normalizer.normalize(record))
            .unwrap_or(0);
        tracker.set_entry_state(entity, state);

        tracker.set_auto_detect_changes(auto_detect);

        if changed > 0 {
            trace!(target: "unitwork::scope", entity = %entity, fields = changed, ?state, "Normalized materialized entity");
        }
    }
}
