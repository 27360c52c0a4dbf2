//! Dependency ordering for "sync all entities" passes.

use super::model::EntityType;

/// Fixed execution order: referenced entities before referencing ones.
/// Supporters and campaigns are independent; donations and recurring plans
/// point at both and must come after.
pub const SYNC_SEQUENCE: [EntityType; 4] = [
    EntityType::Supporter,
    EntityType::Campaign,
    EntityType::Donation,
    EntityType::RecurringPlan,
];

/// Position of an entity in the sync sequence.
pub fn sequence_position(entity_type: EntityType) -> usize {
    SYNC_SEQUENCE
        .iter()
        .position(|candidate| *candidate == entity_type)
        .unwrap_or(SYNC_SEQUENCE.len())
}
