use super::coordinator::KettleSnapshot;
use super::entity::EntityContext;
use super::entity::KettleCommand;
use super::entity::KettleEntity;
use crate::engine::Entity;
use crate::engine::EntityDescriptor;
use crate::engine::EntityState;
use crate::engine::Platform;
use crate::engine::ToIntegrationMessage;
use crate::engine::state::SwitchState;

/// Kettle power
#[derive(Debug, Clone)]
pub struct PowerSwitch {
    entity_id: String,
    descriptor: EntityDescriptor,
}

impl PowerSwitch {
    pub fn new(ctx: &EntityContext) -> Self {
        Self {
            entity_id: ctx.entity_id(Platform::Switch, Some("power")),
            descriptor: ctx.descriptor(Platform::Switch, "power", "Power", Some("mdi:power"), None),
        }
    }
}

impl Entity for PowerSwitch {
    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn descriptor(&self) -> EntityDescriptor {
        self.descriptor.clone()
    }
}

impl KettleEntity for PowerSwitch {
    fn state(&self, snapshot: &KettleSnapshot) -> EntityState {
        EntityState::Switch(SwitchState {
            available: snapshot.available(),
            on: snapshot.get(|d| d.power),
        })
    }

    fn command(&self, msg: &ToIntegrationMessage) -> Option<KettleCommand> {
        match msg {
            ToIntegrationMessage::SwitchCommand { on, .. } => Some(KettleCommand::SetPower(*on)),
            _ => None,
        }
    }
}
