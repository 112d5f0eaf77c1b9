use std::time::Duration;

use anyhow::Context as _;
use backon::BlockingRetryable;
use backon::ConstantBuilder;
use bme280::i2c::BME280;
use rppal::{hal::Delay, i2c::I2c};

use crate::config::SensorEnablement;
use crate::pct2075::Pct2075;
use crate::pmsa003i::Pmsa003i;
use crate::scd4x::Scd4x;
use crate::snapshot::{ClimateReading, PmReading};

/// CO2 source running in periodic-measurement mode.
///
/// `data_ready` is polled by the sampling loop before each read; a sensor
/// that never reports ready stalls the loop by design. Tests inject fakes
/// through this trait to bound the wait.
pub trait Co2Sensor {
    fn start_periodic(&mut self) -> Result<(), anyhow::Error>;
    fn stop_periodic(&mut self) -> Result<(), anyhow::Error>;
    fn data_ready(&mut self) -> Result<bool, anyhow::Error>;
    fn read(&mut self) -> Result<u16, anyhow::Error>;
}

pub trait ParticulateSensor {
    fn read(&mut self) -> Result<PmReading, anyhow::Error>;
}

pub trait ClimateSensor {
    fn read(&mut self) -> Result<ClimateReading, anyhow::Error>;
}

/// Single-point temperature probe (PCT2075).
pub trait TemperatureProbe {
    fn read_celsius(&mut self) -> Result<f32, anyhow::Error>;
}

/// BME280 behind the [`ClimateSensor`] port. Pressure is converted from
/// the pascals the driver reports to kPa.
pub struct Bme280Climate {
    delay: Delay,
    bme280: BME280<I2c>,
}

impl Bme280Climate {
    pub fn new() -> Result<Bme280Climate, anyhow::Error> {
        let i2c = I2c::new().context("Failed to initialize I2C")?;
        let bme280 = BME280::new_primary(i2c);

        Ok(Bme280Climate {
            delay: Delay,
            bme280,
        })
    }

    pub fn init(&mut self) -> Result<(), anyhow::Error> {
        self.bme280
            .init(&mut self.delay)
            .context("Failed to initialize BME280")?;
        Ok(())
    }
}

impl ClimateSensor for Bme280Climate {
    fn read(&mut self) -> Result<ClimateReading, anyhow::Error> {
        let m = self.bme280.measure(&mut self.delay)?;

        Ok(ClimateReading {
            temperature: m.temperature,
            humidity: m.humidity,
            pressure_kpa: m.pressure / 1000.0,
        })
    }
}

/// The enabled sensor sources, constructed once at startup.
///
/// A disabled sensor has no entry here at all, so its snapshot fields stay
/// absent for the process lifetime without per-cycle flag checks.
pub struct SensorSet {
    pub co2: Option<Box<dyn Co2Sensor + Send>>,
    pub particulate: Option<Box<dyn ParticulateSensor + Send>>,
    pub climate: Option<Box<dyn ClimateSensor + Send>>,
    pub probe: Option<Box<dyn TemperatureProbe + Send>>,
}

impl SensorSet {
    /// Opens and initializes every enabled sensor. Initialization is
    /// retried a bounded number of times; exhausting the retries is fatal.
    pub fn from_enablement(enabled: &SensorEnablement) -> Result<SensorSet, anyhow::Error> {
        let retry_builder = ConstantBuilder::default()
            .with_delay(Duration::from_millis(100))
            .with_max_times(20);

        let co2 = if enabled.co2 {
            let scd4x = Scd4x::new().context("Failed to initialize SCD4x")?;
            log::debug!("initialized SCD4x CO2 sensor");
            Some(Box::new(scd4x) as Box<dyn Co2Sensor + Send>)
        } else {
            None
        };

        let particulate = if enabled.particulate {
            let pmsa003i = Pmsa003i::new().context("Failed to initialize PMSA003I")?;
            log::debug!("initialized PMSA003I particulate sensor");
            Some(Box::new(pmsa003i) as Box<dyn ParticulateSensor + Send>)
        } else {
            None
        };

        let climate = if enabled.climate {
            let mut bme280 = Bme280Climate::new()?;
            (|| bme280.init())
                .retry(retry_builder)
                .notify(|e, dur| {
                    log::error!("{e}");
                    log::info!("Retrying in {:?}", dur);
                })
                .call()?;
            log::debug!("initialized BME280");
            Some(Box::new(bme280) as Box<dyn ClimateSensor + Send>)
        } else {
            None
        };

        let probe = if enabled.probe {
            let pct2075 = Pct2075::new().context("Failed to initialize PCT2075")?;
            log::debug!("initialized PCT2075 temperature probe");
            Some(Box::new(pct2075) as Box<dyn TemperatureProbe + Send>)
        } else {
            None
        };

        Ok(SensorSet {
            co2,
            particulate,
            climate,
            probe,
        })
    }
}
