use super::entity::EntityDescriptor;
use super::state::EntityState;

/// Engine-level events.
///
/// Distinct from `FromIntegrationMessage` (transport-level). The engine converts
/// `FromIntegrationMessage` into `Event` at the boundary and broadcasts it to
/// every subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    EntityAdded {
        entity_id: String,
        descriptor: EntityDescriptor,
    },
    EntityRemoved {
        entity_id: String,
    },
    /// Only emitted when the new state differs from the old one
    StateChanged {
        entity_id: String,
        old: Option<EntityState>,
        new: EntityState,
    },
}

impl Event {
    pub fn entity_id(&self) -> &str {
        match self {
            Event::EntityAdded { entity_id, .. }
            | Event::EntityRemoved { entity_id }
            | Event::StateChanged { entity_id, .. } => entity_id,
        }
    }
}
