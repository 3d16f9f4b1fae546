use btleplug::api::BDAddr;

use super::coordinator::KettleSnapshot;
use crate::engine::DeviceInfo;
use crate::engine::Entity;
use crate::engine::EntityDescriptor;
use crate::engine::EntityState;
use crate::engine::Platform;
use crate::engine::ToIntegrationMessage;

pub const MANUFACTURER: &str = "Fellow";
pub const MODEL: &str = "Stagg EKG+";

/// Action an entity asks the coordinator to perform
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KettleCommand {
    SetPower(bool),
    /// In the kettle's current unit
    SetTemperature(f64),
}

/// An entity whose state is derived from the coordinator's snapshot
pub trait KettleEntity: Entity {
    fn state(&self, snapshot: &KettleSnapshot) -> EntityState;

    /// Translate an engine command addressed to this entity
    fn command(&self, _msg: &ToIntegrationMessage) -> Option<KettleCommand> {
        None
    }
}

/// Naming and device details shared by all entities of one kettle
#[derive(Debug, Clone)]
pub struct EntityContext {
    pub entry_id: String,
    pub address: BDAddr,
    pub device: DeviceInfo,
}

impl EntityContext {
    pub fn new(entry_id: &str, address: BDAddr, name: Option<&str>) -> Self {
        Self {
            entry_id: entry_id.to_string(),
            address,
            device: DeviceInfo {
                identifiers: vec![("stagg".to_string(), address.to_string())],
                name: name
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("Fellow Stagg EKG+ {}", address)),
                manufacturer: Some(MANUFACTURER.to_string()),
                model: Some(MODEL.to_string()),
                sw_version: None,
            },
        }
    }

    /// `climate.kitchen` for no key, `switch.kitchen_power` for key "power"
    pub fn entity_id(&self, platform: Platform, key: Option<&str>) -> String {
        match key {
            Some(key) => platform.entity_id(&format!("{}_{}", self.entry_id, key)),
            None => platform.entity_id(&self.entry_id),
        }
    }

    pub fn descriptor(
        &self,
        platform: Platform,
        unique_key: &str,
        name: &str,
        icon: Option<&str>,
        device_class: Option<&str>,
    ) -> EntityDescriptor {
        EntityDescriptor {
            unique_id: format!("{}_{}", self.address, unique_key),
            name: name.to_string(),
            platform,
            device_class: device_class.map(str::to_string),
            icon: icon.map(str::to_string),
            device: Some(self.device.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_naming() {
        let address = BDAddr::from([0x24, 0xdc, 0xc3, 0x2d, 0x25, 0xb2]);
        let ctx = EntityContext::new("kitchen", address, None);

        assert_eq!(ctx.device.name, "Fellow Stagg EKG+ 24:DC:C3:2D:25:B2");
        assert_eq!(ctx.device.device_id(), "stagg:24:DC:C3:2D:25:B2");
        assert_eq!(ctx.entity_id(Platform::Climate, None), "climate.kitchen");
        assert_eq!(
            ctx.entity_id(Platform::Sensor, Some("countdown")),
            "sensor.kitchen_countdown"
        );
        assert_eq!(
            ctx.descriptor(Platform::Switch, "power", "Power", None, None)
                .unique_id,
            "24:DC:C3:2D:25:B2_power"
        );

        let named = EntityContext::new("kitchen", address, Some("Pour-over kettle"));
        assert_eq!(named.device.name, "Pour-over kettle");
    }
}
