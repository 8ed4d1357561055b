/**
 * SUBSYSTEMS - Static description of the three greenhouse control loops
 *
 * ROLE :
 * Each subsystem (irrigation, cooling, lighting) is plain data: sensor topic,
 * actuator topic, unit, simulation range and threshold rule. Controllers are
 * generic over this profile instead of having one type per subsystem.
 *
 * DECISION RULES :
 * - irrigation : moisture < min   → ON, else OFF
 * - cooling    : temperature > max → ON, else OFF
 * - lighting   : luminosity < min  → ON, else OFF
 */

use crate::models::ActuatorState;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subsystem {
    Irrigation,
    Cooling,
    Lighting,
}

impl Subsystem {
    pub const ALL: [Subsystem; 3] =
        [Subsystem::Irrigation, Subsystem::Cooling, Subsystem::Lighting];

    pub fn key(&self) -> &'static str {
        match self {
            Subsystem::Irrigation => "irrigation",
            Subsystem::Cooling => "cooling",
            Subsystem::Lighting => "lighting",
        }
    }

    /// Accepts the subsystem key as well as the sensor names the dashboard used.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "irrigation" | "soil_moisture" | "soil-moisture" => Some(Subsystem::Irrigation),
            "cooling" | "temperature" => Some(Subsystem::Cooling),
            "lighting" | "luminosity" | "light" => Some(Subsystem::Lighting),
            _ => None,
        }
    }

    pub fn profile(&self) -> SubsystemProfile {
        match self {
            Subsystem::Irrigation => SubsystemProfile {
                subsystem: *self,
                display_name: "Irrigation",
                sensor: SensorSpec {
                    name: "Soil moisture sensor",
                    kind: "soil_moisture",
                    topic: "agriculture/sensors/soil_moisture",
                    unit: "%",
                    range: (10.0, 60.0),
                    integral: false,
                },
                actuator_name: "Irrigation system",
                actuator_topic: "agriculture/actuators/irrigation",
                threshold: Threshold::Below(30.0),
            },
            Subsystem::Cooling => SubsystemProfile {
                subsystem: *self,
                display_name: "Cooling",
                sensor: SensorSpec {
                    name: "Temperature sensor",
                    kind: "temperature",
                    topic: "agriculture/sensors/temperature",
                    unit: "°C",
                    range: (15.0, 35.0),
                    integral: false,
                },
                actuator_name: "Cooling system",
                actuator_topic: "agriculture/actuators/cooling",
                threshold: Threshold::Above(30.0),
            },
            Subsystem::Lighting => SubsystemProfile {
                subsystem: *self,
                display_name: "Lighting",
                sensor: SensorSpec {
                    name: "Light sensor",
                    kind: "luminosity",
                    topic: "agriculture/sensors/light",
                    unit: "lux",
                    range: (100.0, 10000.0),
                    integral: true,
                },
                actuator_name: "Lighting system",
                actuator_topic: "agriculture/actuators/lighting",
                threshold: Threshold::Below(200.0),
            },
        }
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Threshold rule. `Above(max)` switches ON strictly above `max`,
/// `Below(min)` switches ON strictly below `min`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Threshold {
    Above(f64),
    Below(f64),
}

impl Threshold {
    pub fn decide(&self, value: f64) -> ActuatorState {
        let on = match *self {
            Threshold::Above(max) => value > max,
            Threshold::Below(min) => value < min,
        };
        if on { ActuatorState::On } else { ActuatorState::Off }
    }

    pub fn with_limit(self, limit: f64) -> Self {
        match self {
            Threshold::Above(_) => Threshold::Above(limit),
            Threshold::Below(_) => Threshold::Below(limit),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensorSpec {
    pub name: &'static str,
    /// Key of the validation table (`soil_moisture`, `temperature`, `luminosity`)
    pub kind: &'static str,
    pub topic: &'static str,
    pub unit: &'static str,
    /// Simulation range, inclusive
    pub range: (f64, f64),
    pub integral: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubsystemProfile {
    pub subsystem: Subsystem,
    pub display_name: &'static str,
    pub sensor: SensorSpec,
    pub actuator_name: &'static str,
    pub actuator_topic: &'static str,
    pub threshold: Threshold,
}

impl SubsystemProfile {
    pub fn decide(&self, value: f64) -> ActuatorState {
        self.threshold.decide(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cooling_switches_on_above_max() {
        let cooling = Subsystem::Cooling.profile();
        assert_eq!(cooling.decide(32.0), ActuatorState::On);
        assert_eq!(cooling.decide(30.0), ActuatorState::Off);
        assert_eq!(cooling.decide(20.0), ActuatorState::Off);
    }

    #[test]
    fn test_irrigation_and_lighting_switch_on_below_min() {
        let irrigation = Subsystem::Irrigation.profile();
        assert_eq!(irrigation.decide(12.5), ActuatorState::On);
        assert_eq!(irrigation.decide(30.0), ActuatorState::Off);

        let lighting = Subsystem::Lighting.profile();
        assert_eq!(lighting.decide(150.0), ActuatorState::On);
        assert_eq!(lighting.decide(5000.0), ActuatorState::Off);
    }

    #[test]
    fn test_decide_is_pure() {
        // same input, same output, whatever happened before
        for subsystem in Subsystem::ALL {
            let profile = subsystem.profile();
            let (lo, hi) = profile.sensor.range;
            let mut v = lo;
            while v <= hi {
                let first = profile.decide(v);
                let _ = profile.decide(hi - v + lo);
                assert_eq!(profile.decide(v), first);
                v += (hi - lo) / 50.0;
            }
        }
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!(Subsystem::parse("soil-moisture"), Some(Subsystem::Irrigation));
        assert_eq!(Subsystem::parse("soil_moisture"), Some(Subsystem::Irrigation));
        assert_eq!(Subsystem::parse("temperature"), Some(Subsystem::Cooling));
        assert_eq!(Subsystem::parse("luminosity"), Some(Subsystem::Lighting));
        assert_eq!(Subsystem::parse("Lighting"), Some(Subsystem::Lighting));
        assert_eq!(Subsystem::parse("humidity"), None);
    }

    #[test]
    fn test_with_limit_keeps_direction() {
        let t = Threshold::Below(30.0).with_limit(40.0);
        assert_eq!(t, Threshold::Below(40.0));
        assert_eq!(t.decide(35.0), ActuatorState::On);
    }
}
