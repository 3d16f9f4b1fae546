//! Wire format of the Stagg EKG+ serial characteristic.
//!
//! Commands are 8-byte frames carrying a rolling sequence number. State is
//! reported as notification pairs: a header frame (`ef dd <type>`) followed
//! by a payload frame.

use std::ops::RangeInclusive;

use serde::Serialize;
use tracing::debug;
use tracing::warn;
use uuid::Uuid;
use uuid::uuid;

use crate::engine::TemperatureUnit;

/// Serial port service advertised by every kettle
pub const SERVICE_UUID: Uuid = uuid!("00001820-0000-1000-8000-00805f9b34fb");

/// Characteristic used for both commands and notifications
pub const CHAR_UUID: Uuid = uuid!("00002a80-0000-1000-8000-00805f9b34fb");

/// Additional service advertised by EKG Pro models
pub const CUSTOM_SERVICE_UUID: Uuid = uuid!("021a9004-0302-4aea-bff4-6b3f1c5adfb4");

/// Must be written after connecting before the kettle accepts commands or
/// starts notifying.
pub const AUTH_SEQUENCE: [u8; 20] = [
    0xef, 0xdd, 0x0b, 0x30, 0x31, 0x32, 0x33, 0x34, 0x35, 0x36, 0x37, 0x38, 0x39, 0x30, 0x31,
    0x32, 0x33, 0x34, 0x9a, 0x6d,
];

const MAGIC: [u8; 2] = [0xef, 0xdd];
const COMMAND_FLAG: u8 = 0x0a;

const MSG_POWER: u8 = 0;
const MSG_HOLD: u8 = 1;
const MSG_TARGET_TEMP: u8 = 2;
const MSG_CURRENT_TEMP: u8 = 3;
const MSG_COUNTDOWN: u8 = 4;
const MSG_POSITION: u8 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandKind {
    Power = 0,
    TargetTemperature = 1,
}

/// Builds command frames, numbering them in sequence.
#[derive(Debug, Default)]
pub struct CommandEncoder {
    sequence: u8,
}

impl CommandEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// `ef dd 0a SEQ KIND VALUE (SEQ+VALUE) KIND`
    pub fn encode(&mut self, kind: CommandKind, value: u8) -> [u8; 8] {
        let seq = self.sequence;
        self.sequence = seq.wrapping_add(1);
        [
            MAGIC[0],
            MAGIC[1],
            COMMAND_FLAG,
            seq,
            kind as u8,
            value,
            seq.wrapping_add(value),
            kind as u8,
        ]
    }

    pub fn power(&mut self, on: bool) -> [u8; 8] {
        self.encode(CommandKind::Power, u8::from(on))
    }

    pub fn target_temperature(&mut self, degrees: u8) -> [u8; 8] {
        self.encode(CommandKind::TargetTemperature, degrees)
    }
}

impl TemperatureUnit {
    /// Setpoints the kettle accepts in this unit
    pub const fn kettle_range(self) -> RangeInclusive<u8> {
        match self {
            TemperatureUnit::Celsius => 40..=100,
            TemperatureUnit::Fahrenheit => 104..=212,
        }
    }

    /// Round and bound a requested setpoint to the kettle's range
    pub fn clamp(self, value: f64) -> u8 {
        let range = self.kettle_range();
        let (min, max) = (*range.start(), *range.end());
        let rounded = value.round();
        let clamped = if rounded.is_nan() || rounded < f64::from(min) {
            min
        } else if rounded > f64::from(max) {
            max
        } else {
            rounded as u8
        };

        if f64::from(clamped) != rounded {
            warn!(
                "Temperature {}{} outside {}-{}, using {}",
                value,
                self.symbol(),
                min,
                max,
                clamped
            );
        }
        clamped
    }
}

/// Everything learned from one batch of notifications. Fields the kettle
/// did not report are `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KettleReport {
    pub power: Option<bool>,
    pub hold: Option<bool>,
    pub target_temperature: Option<u8>,
    pub current_temperature: Option<u8>,
    pub unit: Option<TemperatureUnit>,
    pub countdown: Option<u8>,
    pub lifted: Option<bool>,
}

impl KettleReport {
    pub fn is_empty(&self) -> bool {
        *self == KettleReport::default()
    }

    /// Overlay the fields present in `newer`, keeping the rest
    pub fn merge(&mut self, newer: &KettleReport) {
        fn overlay<T: Copy>(field: &mut Option<T>, newer: Option<T>) {
            if newer.is_some() {
                *field = newer;
            }
        }

        overlay(&mut self.power, newer.power);
        overlay(&mut self.hold, newer.hold);
        overlay(&mut self.target_temperature, newer.target_temperature);
        overlay(&mut self.current_temperature, newer.current_temperature);
        overlay(&mut self.unit, newer.unit);
        overlay(&mut self.countdown, newer.countdown);
        overlay(&mut self.lifted, newer.lifted);
    }
}

fn is_header(frame: &[u8]) -> bool {
    frame.len() >= 3 && frame[..2] == MAGIC
}

fn unit_flag(flag: u8) -> TemperatureUnit {
    if flag == 1 {
        TemperatureUnit::Fahrenheit
    } else {
        TemperatureUnit::Celsius
    }
}

/// Decode a batch of notifications, in arrival order.
///
/// A header consumes the frame after it as its payload. Frames that are not
/// headers are skipped one at a time until the stream lines up again.
pub fn parse_notifications<T: AsRef<[u8]>>(frames: &[T]) -> KettleReport {
    let mut report = KettleReport::default();

    let mut i = 0;
    while i + 1 < frames.len() {
        let header = frames[i].as_ref();
        if !is_header(header) {
            i += 1;
            continue;
        }

        let payload = frames[i + 1].as_ref();
        let msg_type = header[2];
        debug!(
            "Notification type {} payload {}",
            msg_type,
            hex::encode(payload)
        );

        match (msg_type, payload) {
            (MSG_POWER, [state, ..]) => report.power = Some(*state == 1),
            (MSG_HOLD, [state, ..]) => report.hold = Some(*state == 1),
            (MSG_TARGET_TEMP, [temp, unit, ..]) => {
                report.target_temperature = Some(*temp);
                report.unit = Some(unit_flag(*unit));
            }
            (MSG_CURRENT_TEMP, [temp, unit, ..]) => {
                report.current_temperature = Some(*temp);
                report.unit = Some(unit_flag(*unit));
            }
            (MSG_COUNTDOWN, [seconds, ..]) => report.countdown = Some(*seconds),
            (MSG_POSITION, [position, ..]) => report.lifted = Some(*position == 0),
            (MSG_POWER | MSG_HOLD | MSG_TARGET_TEMP | MSG_CURRENT_TEMP | MSG_COUNTDOWN
            | MSG_POSITION, _) => {
                debug!("Short payload for message type {}", msg_type);
            }
            _ => debug!("Unknown message type {}", msg_type),
        }

        i += 2;
    }

    report
}
