use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

/// Payload published by a sensor emitter: `{"value": 21.4, "unit": "°C"}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensorReading {
    pub value: f64,
    #[serde(default)]
    pub unit: String,
}

/// ON/OFF state, both as a command sent to an actuator and as its announced state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ActuatorState {
    #[serde(rename = "ON")]
    On,
    #[serde(rename = "OFF")]
    Off,
}

impl ActuatorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActuatorState::On => "ON",
            ActuatorState::Off => "OFF",
        }
    }

    /// Parses the literal wire tokens. Anything but `ON`/`OFF` is rejected.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "ON" => Some(ActuatorState::On),
            "OFF" => Some(ActuatorState::Off),
            _ => None,
        }
    }
}

impl fmt::Display for ActuatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActuatorCommand {
    pub state: ActuatorState,
    pub timestamp: OffsetDateTime,
}

/// Administrative on/off toggle coming from the dashboard (`"on"` / `"off"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    On,
    Off,
}

impl Toggle {
    pub fn parse(action: &str) -> Option<Self> {
        match action {
            "on" => Some(Toggle::On),
            "off" => Some(Toggle::Off),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Sensor,
    Actuator,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RecordValue {
    Reading(f64),
    Command(ActuatorState),
}

/// Append-only history entry written by the active controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryRecord {
    pub controller: String,
    pub data_type: DataType,
    pub topic: String,
    pub value: RecordValue,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// One point of `GET /history/{type}`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HistoryPoint {
    pub timestamp: String,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Primary,
    Replica(usize),
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Primary => f.write_str("Primary"),
            Role::Replica(k) => write!(f, "Replica{k}"),
        }
    }
}

/// Standby →(start)→ Starting →(connected)→ Active →(stop)→ Retired
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Standby,
    Starting,
    Active,
    Retired,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PoolMember {
    pub name: String,
    pub role: String,
}
