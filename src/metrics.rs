use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use prometheus::{Gauge, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::snapshot::Snapshot;

/// One gauge per measurement kind, each labeled with the station name.
///
/// Gauges are set in place every cycle for whichever readings are present;
/// a reading absent this cycle leaves its gauge at the previous value.
pub struct SensorMetrics {
    registry: Registry,
    co2: IntGauge,
    temperature: Gauge,
    humidity: Gauge,
    pressure: Gauge,
    probe_temperature: Gauge,
    pm_mass: IntGaugeVec,
    particles: IntGaugeVec,
}

impl SensorMetrics {
    pub fn new(station: &str) -> Result<SensorMetrics, anyhow::Error> {
        let registry = Registry::new();

        let co2 = IntGauge::with_opts(
            Opts::new("airmon_co2_ppm", "CO2 concentration in parts per million.")
                .const_label("station", station),
        )?;
        let temperature = Gauge::with_opts(
            Opts::new(
                "airmon_temperature_fahrenheit",
                "BME280 temperature in degrees Fahrenheit.",
            )
            .const_label("station", station),
        )?;
        let humidity = Gauge::with_opts(
            Opts::new("airmon_humidity_percent", "Relative humidity.")
                .const_label("station", station),
        )?;
        let pressure = Gauge::with_opts(
            Opts::new("airmon_pressure_kilopascals", "Barometric pressure.")
                .const_label("station", station),
        )?;
        let probe_temperature = Gauge::with_opts(
            Opts::new(
                "airmon_probe_temperature_fahrenheit",
                "PCT2075 probe temperature in degrees Fahrenheit.",
            )
            .const_label("station", station),
        )?;
        let pm_mass = IntGaugeVec::new(
            Opts::new(
                "airmon_pm_mass_concentration",
                "Particulate mass concentration in ug/m3, by size bin.",
            )
            .const_label("station", station),
            &["size"],
        )?;
        let particles = IntGaugeVec::new(
            Opts::new(
                "airmon_particle_count",
                "Particle count per 0.1L of air, by minimum particle size in um.",
            )
            .const_label("station", station),
            &["size"],
        )?;

        registry.register(Box::new(co2.clone()))?;
        registry.register(Box::new(temperature.clone()))?;
        registry.register(Box::new(humidity.clone()))?;
        registry.register(Box::new(pressure.clone()))?;
        registry.register(Box::new(probe_temperature.clone()))?;
        registry.register(Box::new(pm_mass.clone()))?;
        registry.register(Box::new(particles.clone()))?;

        Ok(SensorMetrics {
            registry,
            co2,
            temperature,
            humidity,
            pressure,
            probe_temperature,
            pm_mass,
            particles,
        })
    }

    pub fn update(&self, snapshot: &Snapshot) {
        if let Some(co2) = snapshot.co2_ppm {
            self.co2.set(co2 as i64);
        }
        if let Some(temperature) = snapshot.temperature_fahrenheit {
            self.temperature.set(temperature as f64);
        }
        if let Some(humidity) = snapshot.humidity {
            self.humidity.set(humidity as f64);
        }
        if let Some(pressure) = snapshot.pressure_kpa {
            self.pressure.set(pressure as f64);
        }
        if let Some(probe) = snapshot.probe_temperature_fahrenheit {
            self.probe_temperature.set(probe as f64);
        }

        let masses = [
            ("1.0", snapshot.pm10_standard),
            ("2.5", snapshot.pm25_standard),
            ("10", snapshot.pm100_standard),
        ];
        for (size, value) in masses {
            if let Some(value) = value {
                self.pm_mass.with_label_values(&[size]).set(value as i64);
            }
        }

        let counts = [
            ("0.3", snapshot.particles_03um),
            ("0.5", snapshot.particles_05um),
            ("1.0", snapshot.particles_10um),
            ("2.5", snapshot.particles_25um),
            ("5.0", snapshot.particles_50um),
            ("10", snapshot.particles_100um),
        ];
        for (size, value) in counts {
            if let Some(value) = value {
                self.particles.with_label_values(&[size]).set(value as i64);
            }
        }
    }

    pub fn encode(&self) -> Result<String, anyhow::Error> {
        let mut body = String::new();
        TextEncoder::new()
            .encode_utf8(&self.registry.gather(), &mut body)
            .context("Failed to encode metrics")?;
        Ok(body)
    }
}

/// Serves the registry in the Prometheus text format on its own port.
pub async fn serve(port: u16, metrics: Arc<SensorMetrics>) -> Result<(), anyhow::Error> {
    let app = Router::new()
        .route("/metrics", get(render))
        .with_state(metrics);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind metrics port {port}"))?;
    log::info!("serving metrics at port {port}");

    axum::serve(listener, app)
        .await
        .context("Metrics server failed")
}

async fn render(State(metrics): State<Arc<SensorMetrics>>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::PmReading;

    #[test]
    fn gauges_update_from_populated_fields() {
        let metrics = SensorMetrics::new("teststation").unwrap();
        let mut snapshot = Snapshot::empty("teststation");
        snapshot.co2_ppm = Some(800);
        snapshot.temperature_fahrenheit = Some(72.5);
        snapshot.set_pm(&PmReading {
            pm10_standard: 1,
            pm25_standard: 9,
            pm100_standard: 14,
            pm10_env: 1,
            pm25_env: 9,
            pm100_env: 14,
            particles_03um: 300,
            particles_05um: 80,
            particles_10um: 20,
            particles_25um: 4,
            particles_50um: 1,
            particles_100um: 0,
        });

        metrics.update(&snapshot);

        let body = metrics.encode().unwrap();
        assert!(body.contains("airmon_co2_ppm{station=\"teststation\"} 800"));
        assert!(body.contains("airmon_pm_mass_concentration{size=\"2.5\",station=\"teststation\"} 9"));
        assert!(body.contains("airmon_particle_count{size=\"0.3\",station=\"teststation\"} 300"));
    }

    #[test]
    fn absent_fields_leave_gauges_stale() {
        let metrics = SensorMetrics::new("teststation").unwrap();
        let mut snapshot = Snapshot::empty("teststation");
        snapshot.co2_ppm = Some(650);
        metrics.update(&snapshot);

        // Next cycle the CO2 read failed; the gauge keeps its last value.
        snapshot.co2_ppm = None;
        metrics.update(&snapshot);

        let body = metrics.encode().unwrap();
        assert!(body.contains("airmon_co2_ppm{station=\"teststation\"} 650"));
    }
}
