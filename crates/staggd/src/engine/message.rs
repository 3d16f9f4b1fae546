//! Type-safe message system for staggd
//!
//! Messages are split by direction to enforce correct usage at compile time:
//! - `FromIntegrationMessage`: Events from integrations to the engine
//! - `ToIntegrationMessage`: Commands from the engine to integrations

use serde_json::Value;
use thiserror::Error;

use super::entity::EntityDescriptor;
use super::entity::Platform;
use super::state::EntityState;
use super::state::HvacMode;

/// Messages FROM integrations TO the engine (events/state updates)
#[derive(Debug)]
pub enum FromIntegrationMessage {
    /// An entity was discovered and registered
    EntityDiscovered {
        entity_id: String,
        integration_name: String,
        descriptor: EntityDescriptor,
    },

    /// An entity was removed (device forgotten, etc.)
    EntityRemoved { entity_id: String },

    /// An entity's state changed
    StateChanged {
        entity_id: String,
        state: EntityState,
    },
}

/// Messages FROM the engine TO integrations (commands)
#[derive(Debug, Clone, PartialEq)]
pub enum ToIntegrationMessage {
    ClimateSetTemperature { entity_id: String, temperature: f64 },
    ClimateSetHvacMode { entity_id: String, mode: HvacMode },
    SwitchCommand { entity_id: String, on: bool },
    NumberSetValue { entity_id: String, value: f64 },
    /// Ask the owning integration to refresh the entity now
    UpdateEntity { entity_id: String },
}

#[derive(Debug, Error, PartialEq)]
pub enum ServiceCallError {
    #[error("unknown service {domain}.{service}")]
    UnknownService { domain: String, service: String },

    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl ToIntegrationMessage {
    pub fn entity_id(&self) -> &str {
        match self {
            ToIntegrationMessage::ClimateSetTemperature { entity_id, .. }
            | ToIntegrationMessage::ClimateSetHvacMode { entity_id, .. }
            | ToIntegrationMessage::SwitchCommand { entity_id, .. }
            | ToIntegrationMessage::NumberSetValue { entity_id, .. }
            | ToIntegrationMessage::UpdateEntity { entity_id } => entity_id,
        }
    }

    /// Platform the target entity must belong to, if the command is platform specific
    pub fn platform(&self) -> Option<Platform> {
        match self {
            ToIntegrationMessage::ClimateSetTemperature { .. }
            | ToIntegrationMessage::ClimateSetHvacMode { .. } => Some(Platform::Climate),
            ToIntegrationMessage::SwitchCommand { .. } => Some(Platform::Switch),
            ToIntegrationMessage::NumberSetValue { .. } => Some(Platform::Number),
            ToIntegrationMessage::UpdateEntity { .. } => None,
        }
    }

    /// Translate a `domain.service` call with a JSON body into a command.
    ///
    /// `climate.turn_on`/`turn_off` are expressed as HVAC mode changes.
    pub fn from_service_call(
        domain: &str,
        service: &str,
        data: &Value,
    ) -> Result<Self, ServiceCallError> {
        let entity_id = string_field(data, "entity_id")?;

        let msg = match (domain, service) {
            ("climate", "set_temperature") => ToIntegrationMessage::ClimateSetTemperature {
                entity_id,
                temperature: number_field(data, "temperature")?,
            },
            ("climate", "turn_on") => ToIntegrationMessage::ClimateSetHvacMode {
                entity_id,
                mode: HvacMode::Heat,
            },
            ("climate", "turn_off") => ToIntegrationMessage::ClimateSetHvacMode {
                entity_id,
                mode: HvacMode::Off,
            },
            ("climate", "set_hvac_mode") => {
                let mode = string_field(data, "hvac_mode")?;
                let mode = mode.parse().map_err(|_| ServiceCallError::InvalidField {
                    field: "hvac_mode",
                    reason: format!("unsupported mode '{}'", mode),
                })?;
                ToIntegrationMessage::ClimateSetHvacMode { entity_id, mode }
            }
            ("switch", "turn_on") => ToIntegrationMessage::SwitchCommand {
                entity_id,
                on: true,
            },
            ("switch", "turn_off") => ToIntegrationMessage::SwitchCommand {
                entity_id,
                on: false,
            },
            ("number", "set_value") => ToIntegrationMessage::NumberSetValue {
                entity_id,
                value: number_field(data, "value")?,
            },
            ("homeassistant", "update_entity") => ToIntegrationMessage::UpdateEntity { entity_id },
            _ => {
                return Err(ServiceCallError::UnknownService {
                    domain: domain.to_string(),
                    service: service.to_string(),
                })
            }
        };

        Ok(msg)
    }
}

fn string_field(data: &Value, field: &'static str) -> Result<String, ServiceCallError> {
    match data.get(field) {
        None | Some(Value::Null) => Err(ServiceCallError::MissingField(field)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(ServiceCallError::InvalidField {
            field,
            reason: format!("expected a string, got {}", other),
        }),
    }
}

fn number_field(data: &Value, field: &'static str) -> Result<f64, ServiceCallError> {
    match data.get(field) {
        None | Some(Value::Null) => Err(ServiceCallError::MissingField(field)),
        Some(v) => v.as_f64().ok_or_else(|| ServiceCallError::InvalidField {
            field,
            reason: format!("expected a number, got {}", v),
        }),
    }
}
