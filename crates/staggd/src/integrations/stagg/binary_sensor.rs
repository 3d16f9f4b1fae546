use super::coordinator::KettleSnapshot;
use super::entity::EntityContext;
use super::entity::KettleEntity;
use crate::engine::Entity;
use crate::engine::EntityDescriptor;
use crate::engine::EntityState;
use crate::engine::Platform;
use crate::engine::state::BinarySensorState;

/// On while the last poll of the kettle succeeded
#[derive(Debug, Clone)]
pub struct ConnectionSensor {
    entity_id: String,
    descriptor: EntityDescriptor,
}

impl ConnectionSensor {
    pub fn new(ctx: &EntityContext) -> Self {
        Self {
            entity_id: ctx.entity_id(Platform::BinarySensor, Some("connection")),
            descriptor: ctx.descriptor(
                Platform::BinarySensor,
                "connection",
                "Connection",
                None,
                Some("connectivity"),
            ),
        }
    }
}

impl Entity for ConnectionSensor {
    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn descriptor(&self) -> EntityDescriptor {
        self.descriptor.clone()
    }
}

impl KettleEntity for ConnectionSensor {
    fn state(&self, snapshot: &KettleSnapshot) -> EntityState {
        EntityState::BinarySensor(BinarySensorState {
            on: snapshot.last_update_success,
        })
    }
}
