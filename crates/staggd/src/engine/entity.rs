//! Entity abstraction for staggd
//!
//! Every entity an integration exposes (climate, switch, sensor, ...) is
//! described to the engine once, then reports state changes by entity id.

use serde::Serialize;
use strum::Display;
use strum::EnumString;

use super::device::DeviceInfo;

/// Platform an entity belongs to; also the prefix of its entity id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Platform {
    Climate,
    Switch,
    Number,
    Sensor,
    BinarySensor,
}

impl Platform {
    /// Build an entity id such as `climate.kitchen`
    pub fn entity_id(self, object_id: &str) -> String {
        format!("{}.{}", self, object_id)
    }
}

/// Static description of an entity, sent once on discovery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityDescriptor {
    /// Stable across restarts (e.g. "24:DC:C3:2D:25:B2_power")
    pub unique_id: String,
    pub name: String,
    pub platform: Platform,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceInfo>,
}

/// Base trait that all entities must implement
pub trait Entity: Send + Sync {
    fn entity_id(&self) -> &str;

    fn descriptor(&self) -> EntityDescriptor;

    fn platform(&self) -> Platform {
        self.descriptor().platform
    }
}
