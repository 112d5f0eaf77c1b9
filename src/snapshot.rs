use std::time::Instant;

use chrono::{DateTime, Local};
use serde::Serialize;

/// One cycle's worth of particulate data from the PMSA003I.
///
/// Field naming follows the sensor's frame layout: `pm10` is PM1.0,
/// `pm25` is PM2.5 and `pm100` is PM10. Mass concentrations are ug/m3,
/// particle counts are per 0.1L of air.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PmReading {
    pub pm10_standard: u16,
    pub pm25_standard: u16,
    pub pm100_standard: u16,
    pub pm10_env: u16,
    pub pm25_env: u16,
    pub pm100_env: u16,
    pub particles_03um: u16,
    pub particles_05um: u16,
    pub particles_10um: u16,
    pub particles_25um: u16,
    pub particles_50um: u16,
    pub particles_100um: u16,
}

/// Temperature, humidity and pressure as read from the BME280.
#[derive(Debug, Clone, Copy)]
pub struct ClimateReading {
    pub temperature: f32,
    pub humidity: f32,
    pub pressure_kpa: f32,
}

/// The aggregate state of the most recent sampling cycle.
///
/// A snapshot is built in full by the sampling loop and then published
/// whole through a `tokio::sync::watch` channel, so readers on the server
/// threads always observe either the previous or the current cycle's data,
/// never a mix. A field is `None` when its sensor is disabled or its read
/// failed this cycle.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub station: String,
    pub timestamp: DateTime<Local>,
    #[serde(skip_serializing)]
    pub captured: Instant,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub co2_ppm: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature_celsius: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature_fahrenheit: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pressure_kpa: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe_temperature_fahrenheit: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pm10_standard: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pm25_standard: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pm100_standard: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pm10_env: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pm25_env: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pm100_env: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub particles_03um: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub particles_05um: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub particles_10um: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub particles_25um: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub particles_50um: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub particles_100um: Option<u16>,
}

impl Snapshot {
    /// A snapshot with no readings, used to seed the watch channel before
    /// the first cycle completes.
    pub fn empty(station: &str) -> Self {
        Snapshot {
            station: station.to_string(),
            timestamp: Local::now(),
            captured: Instant::now(),
            co2_ppm: None,
            temperature_celsius: None,
            temperature_fahrenheit: None,
            humidity: None,
            pressure_kpa: None,
            probe_temperature_fahrenheit: None,
            pm10_standard: None,
            pm25_standard: None,
            pm100_standard: None,
            pm10_env: None,
            pm25_env: None,
            pm100_env: None,
            particles_03um: None,
            particles_05um: None,
            particles_10um: None,
            particles_25um: None,
            particles_50um: None,
            particles_100um: None,
        }
    }

    pub fn set_pm(&mut self, pm: &PmReading) {
        self.pm10_standard = Some(pm.pm10_standard);
        self.pm25_standard = Some(pm.pm25_standard);
        self.pm100_standard = Some(pm.pm100_standard);
        self.pm10_env = Some(pm.pm10_env);
        self.pm25_env = Some(pm.pm25_env);
        self.pm100_env = Some(pm.pm100_env);
        self.particles_03um = Some(pm.particles_03um);
        self.particles_05um = Some(pm.particles_05um);
        self.particles_10um = Some(pm.particles_10um);
        self.particles_25um = Some(pm.particles_25um);
        self.particles_50um = Some(pm.particles_50um);
        self.particles_100um = Some(pm.particles_100um);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_snapshot_serializes_without_absent_fields() {
        let snapshot = Snapshot::empty("teststation");
        let doc = serde_json::to_value(&snapshot).unwrap();
        let object = doc.as_object().unwrap();

        assert_eq!(object["station"], "teststation");
        assert!(object.contains_key("timestamp"));
        assert!(!object.contains_key("co2_ppm"));
        assert!(!object.contains_key("temperature_fahrenheit"));
        assert!(!object.contains_key("pm25_standard"));
        assert!(!object.contains_key("particles_03um"));
    }

    #[test]
    fn populated_fields_appear_in_the_document() {
        let mut snapshot = Snapshot::empty("teststation");
        snapshot.co2_ppm = Some(612);
        snapshot.set_pm(&PmReading {
            pm10_standard: 1,
            pm25_standard: 2,
            pm100_standard: 3,
            pm10_env: 4,
            pm25_env: 5,
            pm100_env: 6,
            particles_03um: 7,
            particles_05um: 8,
            particles_10um: 9,
            particles_25um: 10,
            particles_50um: 11,
            particles_100um: 12,
        });

        let doc = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(doc["co2_ppm"], 612);
        assert_eq!(doc["pm25_standard"], 2);
        assert_eq!(doc["particles_100um"], 12);
    }
}
