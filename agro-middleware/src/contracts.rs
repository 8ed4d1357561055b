//! Wire contracts: topic names, payload encodings and the static validation table.

use crate::error::ControlError;
use crate::models::{ActuatorState, SensorReading};
use crate::subsystems::Subsystem;
use serde::Serialize;
use std::collections::BTreeMap;

/// Inclusive plausibility range per sensor kind. Only used to filter the
/// diagnostic snapshot, never to gate a control decision.
pub const VALIDATION_LIMITS: [(&str, f64, f64); 3] = [
    ("soil_moisture", 10.0, 60.0),
    ("luminosity", 100.0, 10000.0),
    ("temperature", 15.0, 35.0),
];

pub fn validate_reading(kind: &str, value: f64) -> bool {
    VALIDATION_LIMITS
        .iter()
        .find(|(k, _, _)| *k == kind)
        .map(|(_, min, max)| *min <= value && value <= *max)
        .unwrap_or(false)
}

pub fn state_topic(actuator_topic: &str) -> String {
    format!("{actuator_topic}/state")
}

pub fn encode_reading(reading: &SensorReading) -> Vec<u8> {
    // a struct of a float and a string cannot fail to serialize
    serde_json::to_vec(reading).unwrap_or_default()
}

pub fn decode_reading(payload: &[u8]) -> Result<SensorReading, ControlError> {
    serde_json::from_slice(payload).map_err(|e| ControlError::MalformedPayload(e.to_string()))
}

pub fn encode_command(state: ActuatorState) -> Vec<u8> {
    state.as_str().as_bytes().to_vec()
}

pub fn decode_command(payload: &[u8]) -> Result<ActuatorState, ControlError> {
    let token = String::from_utf8_lossy(payload);
    ActuatorState::from_token(token.trim())
        .ok_or_else(|| ControlError::UnknownCommand(token.into_owned()))
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    /// JSON `{value, unit}`
    Reading,
    /// `ON` / `OFF`
    Command,
    /// `ON` / `OFF`, announced by the actuator after each command
    State,
}

#[derive(Debug, Clone, Serialize)]
pub struct Contract {
    pub topic: String,
    pub subsystem: Subsystem,
    pub kind: PayloadKind,
}

#[derive(Debug, Clone)]
pub struct ContractRegistry {
    contracts: BTreeMap<String, Contract>, // topic -> Contract
}

impl ContractRegistry {
    /// Three contracts per subsystem: sensor, actuator command, actuator state.
    pub fn for_subsystems(subsystems: &[Subsystem]) -> Self {
        let mut contracts = BTreeMap::new();
        for subsystem in subsystems {
            let profile = subsystem.profile();
            for (topic, kind) in [
                (profile.sensor.topic.to_string(), PayloadKind::Reading),
                (profile.actuator_topic.to_string(), PayloadKind::Command),
                (state_topic(profile.actuator_topic), PayloadKind::State),
            ] {
                contracts.insert(topic.clone(), Contract { topic, subsystem: *subsystem, kind });
            }
        }
        Self { contracts }
    }

    pub fn list_contracts(&self) -> Vec<Contract> {
        self.contracts.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_reading_bounds() {
        assert!(!validate_reading("soil_moisture", 5.0));
        assert!(validate_reading("soil_moisture", 30.0));
        assert!(validate_reading("soil_moisture", 10.0));
        assert!(validate_reading("soil_moisture", 60.0));
        assert!(!validate_reading("temperature", 35.5));
        assert!(validate_reading("luminosity", 100.0));
        assert!(!validate_reading("humidity", 50.0));
    }

    #[test]
    fn test_decode_reading() {
        let reading = decode_reading(r#"{"value": 21.5, "unit": "°C"}"#.as_bytes()).unwrap();
        assert_eq!(reading.value, 21.5);
        assert_eq!(reading.unit, "°C");

        let integral = decode_reading(br#"{"value": 150}"#).unwrap();
        assert_eq!(integral.value, 150.0);
        assert_eq!(integral.unit, "");

        let garbage: [&[u8]; 3] = [b"not json", br#"{"unit": "%"}"#, br#"{"value": "hot"}"#];
        for garbage in garbage {
            assert!(matches!(decode_reading(garbage), Err(ControlError::MalformedPayload(_))));
        }
    }

    #[test]
    fn test_decode_command_tokens() {
        assert_eq!(decode_command(b"ON").unwrap(), ActuatorState::On);
        assert_eq!(decode_command(b"OFF").unwrap(), ActuatorState::Off);
        assert!(matches!(decode_command(b"on"), Err(ControlError::UnknownCommand(_))));
        assert!(matches!(decode_command(b"TOGGLE"), Err(ControlError::UnknownCommand(_))));
    }

    #[test]
    fn test_registry_covers_every_topic() {
        let registry = ContractRegistry::for_subsystems(&Subsystem::ALL);
        assert_eq!(registry.list_contracts().len(), 9);

        let contracts = registry.list_contracts();
        let state = contracts
            .iter()
            .find(|c| c.topic == "agriculture/actuators/cooling/state")
            .unwrap();
        assert_eq!(state.kind, PayloadKind::State);
        assert_eq!(state.subsystem, Subsystem::Cooling);
        assert_eq!(contracts.iter().filter(|c| c.kind == PayloadKind::Reading).count(), 3);
    }
}
