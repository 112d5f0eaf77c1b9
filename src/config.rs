use std::path::PathBuf;

use clap::{ArgAction, Parser};

/// Monitors air quality and fans readings out to export sinks.
#[derive(Debug, Parser)]
#[command(name = "airmon")]
pub struct Config {
    /// Station name reported to every sink (defaults to the hostname).
    #[arg(long, env = "AIRMON_STATION")]
    pub station: Option<String>,

    /// Google cloud credentials file.
    #[arg(long, short = 'c', default_value = "google-creds.json")]
    pub creds: PathBuf,

    #[arg(long, short = 'd')]
    pub debug: bool,

    /// Seconds between sampling cycles.
    #[arg(long, default_value_t = 5)]
    pub sample_interval: u64,

    /// Seconds to wait between sending to the remote sheet.
    #[arg(long, short = 'l', default_value_t = 300)]
    pub log_interval: u64,

    /// Web service api port.
    #[arg(long, short = 'w', default_value_t = 8098)]
    pub wsport: u16,

    /// Metrics exposition port.
    #[arg(long, default_value_t = 9184)]
    pub metrics_port: u16,

    /// Read the SCD4x CO2 sensor.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub co2: bool,

    /// Read the PMSA003I particulate sensor.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub particulate: bool,

    /// Read the BME280 temperature/humidity/pressure sensor.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub climate: bool,

    /// Read the PCT2075 temperature probe.
    #[arg(long, default_value_t = false, action = ArgAction::Set)]
    pub probe: bool,

    /// Drive the ST7789 display and its two buttons.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub display: bool,

    /// Append rows to the remote sheet.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub remote_log: bool,
}

/// Which sensors the process reads, fixed at startup. No sensor can be
/// toggled after [`crate::sensor::SensorSet`] has been constructed.
#[derive(Debug, Clone, Copy)]
pub struct SensorEnablement {
    pub co2: bool,
    pub particulate: bool,
    pub climate: bool,
    pub probe: bool,
}

impl Config {
    pub fn enablement(&self) -> SensorEnablement {
        SensorEnablement {
            co2: self.co2,
            particulate: self.particulate,
            climate: self.climate,
            probe: self.probe,
        }
    }

    pub fn station(&self) -> String {
        self.station
            .clone()
            .unwrap_or_else(|| gethostname::gethostname().to_string_lossy().into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_surface() {
        let config = Config::parse_from(["airmon"]);
        assert_eq!(config.sample_interval, 5);
        assert_eq!(config.log_interval, 300);
        assert_eq!(config.wsport, 8098);
        assert!(config.co2);
        assert!(config.particulate);
        assert!(config.climate);
        assert!(!config.probe);
        assert!(config.remote_log);
    }

    #[test]
    fn sensors_can_be_disabled_from_the_command_line() {
        let config = Config::parse_from(["airmon", "--co2", "false", "--display", "false"]);
        assert!(!config.enablement().co2);
        assert!(!config.display);
        assert!(config.enablement().particulate);
    }
}
