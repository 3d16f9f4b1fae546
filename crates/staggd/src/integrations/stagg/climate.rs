use super::coordinator::KettleSnapshot;
use super::entity::EntityContext;
use super::entity::KettleCommand;
use super::entity::KettleEntity;
use crate::engine::Entity;
use crate::engine::EntityDescriptor;
use crate::engine::EntityState;
use crate::engine::Platform;
use crate::engine::ToIntegrationMessage;
use crate::engine::state::ClimateState;
use crate::engine::state::HvacMode;

/// The kettle as a heater: on/off plus a setpoint
#[derive(Debug, Clone)]
pub struct KettleClimate {
    entity_id: String,
    descriptor: EntityDescriptor,
}

impl KettleClimate {
    pub fn new(ctx: &EntityContext) -> Self {
        Self {
            entity_id: ctx.entity_id(Platform::Climate, None),
            descriptor: ctx.descriptor(
                Platform::Climate,
                "climate",
                &ctx.device.name,
                Some("mdi:kettle"),
                None,
            ),
        }
    }
}

impl Entity for KettleClimate {
    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn descriptor(&self) -> EntityDescriptor {
        self.descriptor.clone()
    }
}

impl KettleEntity for KettleClimate {
    fn state(&self, snapshot: &KettleSnapshot) -> EntityState {
        let range = snapshot.unit.kettle_range();
        EntityState::Climate(ClimateState {
            available: snapshot.available(),
            hvac_mode: snapshot
                .get(|d| d.power)
                .map(|on| if on { HvacMode::Heat } else { HvacMode::Off }),
            hvac_action: snapshot.hvac_action(),
            current_temperature: snapshot.get(|d| d.current_temperature).map(f64::from),
            target_temperature: snapshot.get(|d| d.target_temperature).map(f64::from),
            min_temp: f64::from(*range.start()),
            max_temp: f64::from(*range.end()),
            target_temperature_step: 1.0,
            temperature_unit: snapshot.unit,
        })
    }

    fn command(&self, msg: &ToIntegrationMessage) -> Option<KettleCommand> {
        match msg {
            ToIntegrationMessage::ClimateSetTemperature { temperature, .. } => {
                Some(KettleCommand::SetTemperature(*temperature))
            }
            ToIntegrationMessage::ClimateSetHvacMode { mode, .. } => {
                Some(KettleCommand::SetPower(*mode == HvacMode::Heat))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use btleplug::api::BDAddr;

    use super::*;
    use crate::engine::TemperatureUnit;
    use crate::engine::state::HvacAction;
    use crate::integrations::stagg::protocol::KettleReport;

    fn climate() -> KettleClimate {
        KettleClimate::new(&EntityContext::new(
            "kitchen",
            BDAddr::from([0x24, 0xdc, 0xc3, 0x2d, 0x25, 0xb2]),
            None,
        ))
    }

    #[test]
    fn test_heating_state() {
        let snapshot = KettleSnapshot {
            data: Some(KettleReport {
                power: Some(true),
                current_temperature: Some(60),
                target_temperature: Some(93),
                unit: Some(TemperatureUnit::Celsius),
                ..Default::default()
            }),
            last_update_success: true,
            unit: TemperatureUnit::Celsius,
        };

        assert_eq!(
            climate().state(&snapshot),
            EntityState::Climate(ClimateState {
                available: true,
                hvac_mode: Some(HvacMode::Heat),
                hvac_action: Some(HvacAction::Heating),
                current_temperature: Some(60.0),
                target_temperature: Some(93.0),
                min_temp: 40.0,
                max_temp: 100.0,
                target_temperature_step: 1.0,
                temperature_unit: TemperatureUnit::Celsius,
            })
        );
    }

    #[test]
    fn test_unavailable_state() {
        let snapshot = KettleSnapshot {
            data: None,
            last_update_success: false,
            unit: TemperatureUnit::Fahrenheit,
        };

        let EntityState::Climate(state) = climate().state(&snapshot) else {
            panic!("not a climate state");
        };
        assert!(!state.available);
        assert_eq!(state.hvac_mode, None);
        assert_eq!(state.current_temperature, None);
        assert_eq!((state.min_temp, state.max_temp), (104.0, 212.0));
    }

    #[test]
    fn test_commands() {
        let climate = climate();
        assert_eq!(climate.entity_id(), "climate.kitchen");
        assert_eq!(
            climate.command(&ToIntegrationMessage::ClimateSetHvacMode {
                entity_id: "climate.kitchen".to_string(),
                mode: HvacMode::Off,
            }),
            Some(KettleCommand::SetPower(false))
        );
        assert_eq!(
            climate.command(&ToIntegrationMessage::ClimateSetTemperature {
                entity_id: "climate.kitchen".to_string(),
                temperature: 200.0,
            }),
            Some(KettleCommand::SetTemperature(200.0))
        );
    }
}
