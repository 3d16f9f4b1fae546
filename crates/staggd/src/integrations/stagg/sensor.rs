use strum::EnumIter;
use strum::IntoEnumIterator;
use strum::IntoStaticStr;

use super::coordinator::KettleSnapshot;
use super::entity::EntityContext;
use super::entity::KettleEntity;
use crate::engine::Entity;
use crate::engine::EntityDescriptor;
use crate::engine::EntityState;
use crate::engine::Platform;
use crate::engine::state::SensorState;
use crate::engine::state::SensorValue;

/// Read-only values the kettle reports. The snake_case name is the entity key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum SensorKind {
    Power,
    CurrentTemperature,
    TargetTemperature,
    Hold,
    KettlePosition,
    Countdown,
}

impl SensorKind {
    pub fn key(self) -> &'static str {
        self.into()
    }

    /// Suffix of the unique id. The power switch already owns `power`.
    fn unique_key(self) -> &'static str {
        match self {
            SensorKind::Power => "power_state",
            other => other.key(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            SensorKind::Power => "Power",
            SensorKind::CurrentTemperature => "Current Temperature",
            SensorKind::TargetTemperature => "Target Temperature",
            SensorKind::Hold => "Hold Mode",
            SensorKind::KettlePosition => "Kettle Position",
            SensorKind::Countdown => "Countdown",
        }
    }

    fn icon(self) -> &'static str {
        match self {
            SensorKind::Power => "mdi:power",
            SensorKind::CurrentTemperature | SensorKind::TargetTemperature => "mdi:thermometer",
            SensorKind::Hold | SensorKind::Countdown => "mdi:timer",
            SensorKind::KettlePosition => "mdi:cup",
        }
    }

    fn device_class(self) -> Option<&'static str> {
        match self {
            SensorKind::CurrentTemperature | SensorKind::TargetTemperature => Some("temperature"),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct KettleSensor {
    kind: SensorKind,
    entity_id: String,
    descriptor: EntityDescriptor,
}

impl KettleSensor {
    pub fn new(ctx: &EntityContext, kind: SensorKind) -> Self {
        Self {
            kind,
            entity_id: ctx.entity_id(Platform::Sensor, Some(kind.key())),
            descriptor: ctx.descriptor(
                Platform::Sensor,
                kind.unique_key(),
                kind.name(),
                Some(kind.icon()),
                kind.device_class(),
            ),
        }
    }

    /// One sensor of every kind
    pub fn all(ctx: &EntityContext) -> Vec<Self> {
        SensorKind::iter().map(|kind| Self::new(ctx, kind)).collect()
    }

    fn value(&self, snapshot: &KettleSnapshot) -> Option<SensorValue> {
        let text = |s: &str| SensorValue::Text(s.to_string());
        match self.kind {
            SensorKind::Power => snapshot
                .get(|d| d.power)
                .map(|on| text(if on { "On" } else { "Off" })),
            SensorKind::CurrentTemperature => snapshot
                .get(|d| d.current_temperature)
                .map(|t| SensorValue::Numeric(f64::from(t))),
            SensorKind::TargetTemperature => snapshot
                .get(|d| d.target_temperature)
                .map(|t| SensorValue::Numeric(f64::from(t))),
            SensorKind::Hold => snapshot
                .get(|d| d.hold)
                .map(|hold| text(if hold { "Hold" } else { "Normal" })),
            SensorKind::KettlePosition => snapshot
                .get(|d| d.lifted)
                .map(|lifted| text(if lifted { "Lifted" } else { "On Base" })),
            SensorKind::Countdown => snapshot
                .get(|d| d.countdown)
                .map(|s| SensorValue::Numeric(f64::from(s))),
        }
    }

    fn unit(&self, snapshot: &KettleSnapshot) -> Option<String> {
        match self.kind {
            SensorKind::CurrentTemperature | SensorKind::TargetTemperature => {
                Some(snapshot.unit.symbol().to_string())
            }
            SensorKind::Countdown => Some("s".to_string()),
            _ => None,
        }
    }
}

impl Entity for KettleSensor {
    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn descriptor(&self) -> EntityDescriptor {
        self.descriptor.clone()
    }
}

impl KettleEntity for KettleSensor {
    fn state(&self, snapshot: &KettleSnapshot) -> EntityState {
        EntityState::Sensor(SensorState {
            available: snapshot.available(),
            value: self.value(snapshot),
            unit: self.unit(snapshot),
        })
    }
}

#[cfg(test)]
mod tests {
    use btleplug::api::BDAddr;

    use super::*;
    use crate::engine::TemperatureUnit;
    use crate::integrations::stagg::protocol::KettleReport;

    fn snapshot() -> KettleSnapshot {
        KettleSnapshot {
            data: Some(KettleReport {
                power: Some(false),
                hold: Some(true),
                target_temperature: Some(205),
                current_temperature: Some(72),
                unit: Some(TemperatureUnit::Fahrenheit),
                countdown: Some(30),
                lifted: Some(false),
            }),
            last_update_success: true,
            unit: TemperatureUnit::Fahrenheit,
        }
    }

    #[test]
    fn test_all_sensors() {
        let ctx = EntityContext::new("kitchen", BDAddr::default(), None);
        let snapshot = snapshot();

        let rendered: Vec<String> = KettleSensor::all(&ctx)
            .iter()
            .map(|s| {
                let EntityState::Sensor(state) = s.state(&snapshot) else {
                    panic!("not a sensor state");
                };
                format!(
                    "{} = {:?} {}",
                    s.entity_id(),
                    state.value,
                    state.unit.unwrap_or_default()
                )
            })
            .collect();

        insta::assert_debug_snapshot!(rendered, @r#"
        [
            "sensor.kitchen_power = Some(Text(\"Off\")) ",
            "sensor.kitchen_current_temperature = Some(Numeric(72.0)) °F",
            "sensor.kitchen_target_temperature = Some(Numeric(205.0)) °F",
            "sensor.kitchen_hold = Some(Text(\"Hold\")) ",
            "sensor.kitchen_kettle_position = Some(Text(\"On Base\")) ",
            "sensor.kitchen_countdown = Some(Numeric(30.0)) s",
        ]
        "#);
    }

    #[test]
    fn test_unavailable_without_data() {
        let ctx = EntityContext::new("kitchen", BDAddr::default(), None);
        let sensor = KettleSensor::new(&ctx, SensorKind::Hold);
        let snapshot = KettleSnapshot {
            data: None,
            last_update_success: false,
            unit: TemperatureUnit::Celsius,
        };

        assert_eq!(
            sensor.state(&snapshot),
            EntityState::Sensor(SensorState {
                available: false,
                value: None,
                unit: None,
            })
        );
    }
}
