use serde::Serialize;

/// Identity of a physical device, as reported by the integration that owns it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    /// (domain, id) pairs, e.g. ("stagg", "24:DC:C3:2D:25:B2")
    pub identifiers: Vec<(String, String)>,
    pub name: String,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub sw_version: Option<String>,
}

impl DeviceInfo {
    /// Registry key derived from the first identifier
    pub fn device_id(&self) -> String {
        match self.identifiers.first() {
            Some((domain, id)) => format!("{}:{}", domain, id),
            None => self.name.clone(),
        }
    }
}

/// A device in the staggd system.
///
/// A device represents a physical device that contains one or more entities.
#[derive(Debug, Clone, Serialize)]
pub struct Device {
    pub id: String,
    #[serde(flatten)]
    pub info: DeviceInfo,
    pub entity_ids: Vec<String>,
}

impl Device {
    pub fn new(info: DeviceInfo) -> Self {
        Self {
            id: info.device_id(),
            info,
            entity_ids: Vec::new(),
        }
    }

    pub fn add_entity(&mut self, entity_id: String) {
        if !self.entity_ids.contains(&entity_id) {
            self.entity_ids.push(entity_id);
        }
    }

    /// Returns true once the device has no entities left
    pub fn remove_entity(&mut self, entity_id: &str) -> bool {
        self.entity_ids.retain(|e| e != entity_id);
        self.entity_ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entities_deduplicated() {
        let mut device = Device::new(DeviceInfo {
            identifiers: vec![("stagg".to_string(), "24:DC:C3:2D:25:B2".to_string())],
            name: "Kettle".to_string(),
            manufacturer: None,
            model: None,
            sw_version: None,
        });
        assert_eq!(device.id, "stagg:24:DC:C3:2D:25:B2");

        device.add_entity("climate.kitchen".to_string());
        device.add_entity("climate.kitchen".to_string());
        device.add_entity("switch.kitchen_power".to_string());
        assert_eq!(device.entity_ids.len(), 2);

        assert!(!device.remove_entity("climate.kitchen"));
        assert!(device.remove_entity("switch.kitchen_power"));
    }
}
