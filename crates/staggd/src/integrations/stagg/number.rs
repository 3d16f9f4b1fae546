use super::coordinator::KettleSnapshot;
use super::entity::EntityContext;
use super::entity::KettleCommand;
use super::entity::KettleEntity;
use crate::engine::Entity;
use crate::engine::EntityDescriptor;
use crate::engine::EntityState;
use crate::engine::Platform;
use crate::engine::ToIntegrationMessage;
use crate::engine::state::NumberMode;
use crate::engine::state::NumberState;

/// Target temperature as a directly editable number
#[derive(Debug, Clone)]
pub struct TargetTemperatureNumber {
    entity_id: String,
    descriptor: EntityDescriptor,
}

impl TargetTemperatureNumber {
    pub fn new(ctx: &EntityContext) -> Self {
        Self {
            entity_id: ctx.entity_id(Platform::Number, Some("target_temperature")),
            descriptor: ctx.descriptor(
                Platform::Number,
                "target_temp",
                "Target Temperature",
                Some("mdi:thermometer"),
                Some("temperature"),
            ),
        }
    }
}

impl Entity for TargetTemperatureNumber {
    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn descriptor(&self) -> EntityDescriptor {
        self.descriptor.clone()
    }
}

impl KettleEntity for TargetTemperatureNumber {
    fn state(&self, snapshot: &KettleSnapshot) -> EntityState {
        let range = snapshot.unit.kettle_range();
        EntityState::Number(NumberState {
            available: snapshot.available(),
            value: snapshot.get(|d| d.target_temperature).map(f64::from),
            min: f64::from(*range.start()),
            max: f64::from(*range.end()),
            step: 1.0,
            mode: NumberMode::Box,
            unit: Some(snapshot.unit.symbol().to_string()),
        })
    }

    fn command(&self, msg: &ToIntegrationMessage) -> Option<KettleCommand> {
        match msg {
            ToIntegrationMessage::NumberSetValue { value, .. } => {
                Some(KettleCommand::SetTemperature(*value))
            }
            _ => None,
        }
    }
}
