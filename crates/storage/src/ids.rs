//! Id assignment for new entities

use unitwork_core::{EntityRecord, IdAssigner};
use uuid::Uuid;

/// Assigns a random UUID to entities that have no id
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidIdAssigner;

impl IdAssigner for UuidIdAssigner {
    fn assign_if_missing(&self, entity: &mut EntityRecord) {
        if entity.id.is_none() {
            entity.id = Some(Uuid::new_v4().to_string());
        }
    }
}
