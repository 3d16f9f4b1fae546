use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;
use strum::Display;
use strum::EnumString;

use super::entity::Platform;

/// Unit a temperature is expressed in.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum TemperatureUnit {
    Celsius,
    #[default]
    Fahrenheit,
}

impl TemperatureUnit {
    pub fn symbol(self) -> &'static str {
        match self {
            TemperatureUnit::Celsius => "°C",
            TemperatureUnit::Fahrenheit => "°F",
        }
    }
}

/// Requested operating mode of a climate entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HvacMode {
    Off,
    Heat,
}

/// What a climate entity is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HvacAction {
    Off,
    Idle,
    Heating,
}

/// State of a climate entity (a temperature-controllable device).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClimateState {
    pub available: bool,
    pub hvac_mode: Option<HvacMode>,
    pub hvac_action: Option<HvacAction>,
    pub current_temperature: Option<f64>,
    pub target_temperature: Option<f64>,
    pub min_temp: f64,
    pub max_temp: f64,
    pub target_temperature_step: f64,
    pub temperature_unit: TemperatureUnit,
}

/// State of a switch entity.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SwitchState {
    pub available: bool,
    /// `None` until the device has reported
    pub on: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumberMode {
    #[default]
    Auto,
    Box,
    Slider,
}

/// State of a number entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumberState {
    pub available: bool,
    pub value: Option<f64>,
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub mode: NumberMode,
    pub unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SensorValue {
    Numeric(f64),
    Text(String),
}

/// State of a sensor entity.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SensorState {
    pub available: bool,
    pub value: Option<SensorValue>,
    pub unit: Option<String>,
}

/// State of a binary sensor entity.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BinarySensorState {
    /// Whether the sensor is active (meaning depends on device class:
    /// connected, motion detected, door open, etc.)
    pub on: bool,
}

/// State of any entity, tagged by platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "platform", content = "state", rename_all = "snake_case")]
pub enum EntityState {
    Climate(ClimateState),
    Switch(SwitchState),
    Number(NumberState),
    Sensor(SensorState),
    BinarySensor(BinarySensorState),
}

impl EntityState {
    pub fn platform(&self) -> Platform {
        match self {
            EntityState::Climate(_) => Platform::Climate,
            EntityState::Switch(_) => Platform::Switch,
            EntityState::Number(_) => Platform::Number,
            EntityState::Sensor(_) => Platform::Sensor,
            EntityState::BinarySensor(_) => Platform::BinarySensor,
        }
    }
}

/// Centralized snapshot of the entire engine state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct State {
    pub climates: HashMap<String, ClimateState>,
    pub switches: HashMap<String, SwitchState>,
    pub numbers: HashMap<String, NumberState>,
    pub sensors: HashMap<String, SensorState>,
    pub binary_sensors: HashMap<String, BinarySensorState>,
}

impl State {
    /// Store an entity's new state, returning the previous one
    pub fn apply(&mut self, entity_id: String, state: EntityState) -> Option<EntityState> {
        match state {
            EntityState::Climate(s) => self.climates.insert(entity_id, s).map(EntityState::Climate),
            EntityState::Switch(s) => self.switches.insert(entity_id, s).map(EntityState::Switch),
            EntityState::Number(s) => self.numbers.insert(entity_id, s).map(EntityState::Number),
            EntityState::Sensor(s) => self.sensors.insert(entity_id, s).map(EntityState::Sensor),
            EntityState::BinarySensor(s) => self
                .binary_sensors
                .insert(entity_id, s)
                .map(EntityState::BinarySensor),
        }
    }

    pub fn remove(&mut self, entity_id: &str) -> Option<EntityState> {
        self.climates
            .remove(entity_id)
            .map(EntityState::Climate)
            .or_else(|| self.switches.remove(entity_id).map(EntityState::Switch))
            .or_else(|| self.numbers.remove(entity_id).map(EntityState::Number))
            .or_else(|| self.sensors.remove(entity_id).map(EntityState::Sensor))
            .or_else(|| {
                self.binary_sensors
                    .remove(entity_id)
                    .map(EntityState::BinarySensor)
            })
    }

    pub fn get(&self, entity_id: &str) -> Option<EntityState> {
        self.climates
            .get(entity_id)
            .cloned()
            .map(EntityState::Climate)
            .or_else(|| self.switches.get(entity_id).cloned().map(EntityState::Switch))
            .or_else(|| self.numbers.get(entity_id).cloned().map(EntityState::Number))
            .or_else(|| self.sensors.get(entity_id).cloned().map(EntityState::Sensor))
            .or_else(|| {
                self.binary_sensors
                    .get(entity_id)
                    .cloned()
                    .map(EntityState::BinarySensor)
            })
    }
}
