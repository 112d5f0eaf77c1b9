use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;

use crate::classify::{celsius_to_fahrenheit, pm_band, pm_color};
use crate::display::{Button, ButtonPad, Screen};
use crate::metrics::SensorMetrics;
use crate::sensor::{Co2Sensor, SensorSet};
use crate::sheet::SheetLog;
use crate::snapshot::Snapshot;

/// Settling time added to the cycle period while the SCD4x is running
/// periodic measurements.
pub const CO2_WARMUP: Duration = Duration::from_secs(5);

const DATA_READY_POLL: Duration = Duration::from_secs(1);

/// Inter-cycle sleep: the configured interval, stretched by the warm-up
/// offset when a CO2 sensor is along for the ride.
pub fn cycle_period(sample_interval_secs: u64, co2_enabled: bool) -> Duration {
    let base = Duration::from_secs(sample_interval_secs);
    if co2_enabled { base + CO2_WARMUP } else { base }
}

/// What the two buttons ask of the loop this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenTransition {
    Show,
    Hide,
    Terminate,
}

pub fn screen_transition(a_pressed: bool, b_pressed: bool) -> Option<ScreenTransition> {
    match (a_pressed, b_pressed) {
        (true, true) => Some(ScreenTransition::Terminate),
        (true, false) => Some(ScreenTransition::Show),
        (false, true) => Some(ScreenTransition::Hide),
        (false, false) => None,
    }
}

enum Cycle {
    Published,
    /// The particulate read failed; restart the cycle without sleeping
    /// the period again.
    Retry,
    Terminate,
}

/// The orchestrating state machine: polls the sensor set on a fixed
/// cadence, publishes a fresh [`Snapshot`] through the watch channel and
/// fans it out to the enabled sinks.
///
/// The loop owns every sensor and display handle; the watch channel is
/// the only state it shares with the server threads.
pub struct Sampler {
    sensors: SensorSet,
    publisher: watch::Sender<Snapshot>,
    metrics: Arc<SensorMetrics>,
    sheet: Option<SheetLog>,
    screen: Option<Box<dyn Screen + Send>>,
    buttons: Option<Box<dyn ButtonPad + Send>>,
    station: String,
    address: String,
    period: Duration,
    screen_on: bool,
}

impl Sampler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sensors: SensorSet,
        publisher: watch::Sender<Snapshot>,
        metrics: Arc<SensorMetrics>,
        sheet: Option<SheetLog>,
        screen: Option<Box<dyn Screen + Send>>,
        buttons: Option<Box<dyn ButtonPad + Send>>,
        station: String,
        address: String,
        period: Duration,
    ) -> Sampler {
        Sampler {
            sensors,
            publisher,
            metrics,
            sheet,
            screen,
            buttons,
            station,
            address,
            period,
            screen_on: true,
        }
    }

    /// Runs until the dual-button gesture asks for termination. A CO2
    /// sensor that never reports data-ready stalls the loop indefinitely;
    /// that is a property of the hardware, not something to paper over.
    pub fn run(&mut self) -> Result<(), anyhow::Error> {
        let co2_started = match self.sensors.co2.as_mut() {
            Some(co2) => {
                co2.start_periodic()
                    .context("Failed to start periodic CO2 measurement")?;
                true
            }
            None => false,
        };
        self.set_backlight(true);

        'cycles: loop {
            thread::sleep(self.period);
            loop {
                match self.cycle() {
                    Cycle::Published => continue 'cycles,
                    Cycle::Retry => continue,
                    Cycle::Terminate => break 'cycles,
                }
            }
        }

        if co2_started {
            if let Some(co2) = self.sensors.co2.as_mut() {
                if let Err(e) = co2.stop_periodic() {
                    log::warn!("failed to stop periodic CO2 measurement: {e}");
                }
            }
        }
        log::info!("sampling loop stopped by button gesture");
        Ok(())
    }

    fn cycle(&mut self) -> Cycle {
        let co2_ppm = match self.sensors.co2.as_mut() {
            Some(sensor) => match read_co2(sensor.as_mut()) {
                Ok(ppm) => Some(ppm),
                Err(e) => {
                    log::warn!("failed to read CO2 concentration: {e}");
                    None
                }
            },
            None => None,
        };

        let pm = match self.sensors.particulate.as_mut() {
            Some(sensor) => match sensor.read() {
                Ok(reading) => Some(reading),
                Err(e) => {
                    log::warn!("unable to read from particulate sensor, retrying: {e}");
                    return Cycle::Retry;
                }
            },
            None => None,
        };

        let climate = match self.sensors.climate.as_mut() {
            Some(sensor) => match sensor.read() {
                Ok(reading) => Some(reading),
                Err(e) => {
                    log::warn!("failed to read BME280 measurements: {e}");
                    None
                }
            },
            None => None,
        };

        let probe = match self.sensors.probe.as_mut() {
            Some(sensor) => match sensor.read_celsius() {
                Ok(celsius) => Some(celsius),
                Err(e) => {
                    log::warn!("failed to read temperature probe: {e}");
                    None
                }
            },
            None => None,
        };

        let mut snapshot = Snapshot::empty(&self.station);
        snapshot.co2_ppm = co2_ppm;
        if let Some(climate) = climate {
            snapshot.temperature_celsius = Some(climate.temperature);
            snapshot.temperature_fahrenheit = Some(celsius_to_fahrenheit(climate.temperature));
            snapshot.humidity = Some(climate.humidity);
            snapshot.pressure_kpa = Some(climate.pressure_kpa);
        }
        if let Some(celsius) = probe {
            snapshot.probe_temperature_fahrenheit = Some(celsius_to_fahrenheit(celsius));
        }
        if let Some(pm) = &pm {
            snapshot.set_pm(pm);
        }

        log::debug!("{}", cycle_summary(&snapshot));

        // Publish whole, then fan out. The sinks are independent of each
        // other and only ever see the fully built snapshot.
        self.publisher.send_replace(snapshot.clone());
        self.metrics.update(&snapshot);
        let hint = self
            .sheet
            .as_mut()
            .and_then(|sheet| sheet.offer(&snapshot));

        if self.screen_on {
            if let Some(screen) = self.screen.as_mut() {
                let lines = display_lines(&snapshot, &self.address, hint);
                let background = pm_color(
                    snapshot.pm10_standard.unwrap_or(0),
                    snapshot.pm25_standard.unwrap_or(0),
                    snapshot.pm100_standard.unwrap_or(0),
                );
                if let Err(e) = screen.render(&lines, background) {
                    log::warn!("failed to render display: {e}");
                }
            }
        }
        log::debug!("sinks served in {:?}", snapshot.captured.elapsed());

        self.evaluate_buttons()
    }

    fn evaluate_buttons(&mut self) -> Cycle {
        let Some(buttons) = self.buttons.as_mut() else {
            return Cycle::Published;
        };
        let a = buttons.pressed(Button::A);
        let b = buttons.pressed(Button::B);

        match screen_transition(a, b) {
            Some(ScreenTransition::Show) => {
                self.screen_on = true;
                self.set_backlight(true);
            }
            Some(ScreenTransition::Hide) => {
                self.screen_on = false;
                self.set_backlight(false);
            }
            Some(ScreenTransition::Terminate) => return Cycle::Terminate,
            None => {}
        }
        Cycle::Published
    }

    fn set_backlight(&mut self, on: bool) {
        if let Some(screen) = self.screen.as_mut() {
            if let Err(e) = screen.set_backlight(on) {
                log::warn!("failed to switch backlight: {e}");
            }
        }
    }
}

/// Blocks until the sensor has a measurement buffered. Unbounded on
/// purpose; tests bound it by injecting a fake through [`Co2Sensor`].
fn read_co2(sensor: &mut dyn Co2Sensor) -> Result<u16, anyhow::Error> {
    loop {
        if sensor.data_ready()? {
            break;
        }
        log::debug!("CO2 sensor not ready");
        thread::sleep(DATA_READY_POLL);
    }
    sensor.read()
}

fn band_suffix(value: u16) -> String {
    pm_band(value)
        .map(|band| format!(" {band}"))
        .unwrap_or_default()
}

/// The four display lines, plus the "next logging" hint while the sheet
/// gate is closed.
fn display_lines(snapshot: &Snapshot, address: &str, hint: Option<i64>) -> Vec<String> {
    let mut lines = vec![
        snapshot.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
        format!("{} ({})", snapshot.station, address),
    ];
    if let (Some(fahrenheit), Some(humidity)) =
        (snapshot.temperature_fahrenheit, snapshot.humidity)
    {
        lines.push(format!("{fahrenheit:.2}\u{b0}F {humidity:.2}% hum"));
    }
    if let (Some(pm25), Some(pm100)) = (snapshot.pm25_standard, snapshot.pm100_standard) {
        let mut summary = format!(
            "PM2.5={pm25}{} 10={pm100}{}",
            band_suffix(pm25),
            band_suffix(pm100)
        );
        if let Some(co2) = snapshot.co2_ppm {
            summary.push_str(&format!(" CO2={co2}PPM"));
        }
        lines.push(summary);
    }
    if let Some(secs) = hint {
        lines.push(format!("next logging: {secs}"));
    }
    lines
}

fn cycle_summary(snapshot: &Snapshot) -> String {
    let mut parts = vec![snapshot.timestamp.format("%H:%M:%S").to_string()];
    if let Some(fahrenheit) = snapshot.temperature_fahrenheit {
        parts.push(format!("{fahrenheit:.2}\u{b0}F"));
    }
    if let Some(humidity) = snapshot.humidity {
        parts.push(format!("{humidity:.2}% hum"));
    }
    if let Some(pm25) = snapshot.pm25_standard {
        parts.push(format!("PM2.5={pm25}"));
    }
    if let Some(pm100) = snapshot.pm100_standard {
        parts.push(format!("PM10={pm100}"));
    }
    if let Some(co2) = snapshot.co2_ppm {
        parts.push(format!("CO2={co2}PPM"));
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use embedded_graphics::pixelcolor::Rgb565;
    use serde_json::Value;

    use super::*;
    use crate::sensor::ParticulateSensor;
    use crate::sheet::{ROW_LEN, SheetSink};
    use crate::snapshot::PmReading;

    fn sample_pm() -> PmReading {
        PmReading {
            pm10_standard: 2,
            pm25_standard: 9,
            pm100_standard: 14,
            pm10_env: 2,
            pm25_env: 9,
            pm100_env: 14,
            particles_03um: 320,
            particles_05um: 90,
            particles_10um: 25,
            particles_25um: 5,
            particles_50um: 2,
            particles_100um: 1,
        }
    }

    struct FakeCo2 {
        ppm: u16,
        started: Arc<AtomicUsize>,
        stopped: Arc<AtomicUsize>,
    }

    impl Co2Sensor for FakeCo2 {
        fn start_periodic(&mut self) -> Result<(), anyhow::Error> {
            self.started.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn stop_periodic(&mut self) -> Result<(), anyhow::Error> {
            self.stopped.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn data_ready(&mut self) -> Result<bool, anyhow::Error> {
            Ok(true)
        }
        fn read(&mut self) -> Result<u16, anyhow::Error> {
            Ok(self.ppm)
        }
    }

    struct FakePm {
        failures: usize,
    }

    impl ParticulateSensor for FakePm {
        fn read(&mut self) -> Result<PmReading, anyhow::Error> {
            if self.failures > 0 {
                self.failures -= 1;
                return Err(anyhow::anyhow!("transient read failure"));
            }
            Ok(sample_pm())
        }
    }

    struct CountingSheet {
        appends: Arc<AtomicUsize>,
    }

    impl SheetSink for CountingSheet {
        fn append_row(&mut self, _row: &[Value; ROW_LEN]) -> Result<(), anyhow::Error> {
            self.appends.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeScreen {
        renders: Arc<AtomicUsize>,
        backlight_events: Arc<Mutex<Vec<bool>>>,
    }

    impl Screen for FakeScreen {
        fn render(&mut self, _lines: &[String], _background: Rgb565) -> Result<(), anyhow::Error> {
            self.renders.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn set_backlight(&mut self, on: bool) -> Result<(), anyhow::Error> {
            self.backlight_events.lock().unwrap().push(on);
            Ok(())
        }
    }

    /// Returns the scripted (A, B) pair for the current cycle, advancing
    /// when B is sampled (the loop reads A then B once per cycle).
    struct ScriptedButtons {
        script: Vec<(bool, bool)>,
        cycle: usize,
    }

    impl ButtonPad for ScriptedButtons {
        fn pressed(&mut self, button: Button) -> bool {
            let (a, b) = self.script[self.cycle.min(self.script.len() - 1)];
            match button {
                Button::A => a,
                Button::B => {
                    self.cycle += 1;
                    b
                }
            }
        }
    }

    struct Harness {
        sampler: Sampler,
        receiver: watch::Receiver<Snapshot>,
        started: Arc<AtomicUsize>,
        stopped: Arc<AtomicUsize>,
        appends: Arc<AtomicUsize>,
        renders: Arc<AtomicUsize>,
        backlight_events: Arc<Mutex<Vec<bool>>>,
    }

    fn harness(co2: bool, pm_failures: usize, script: Vec<(bool, bool)>) -> Harness {
        let started = Arc::new(AtomicUsize::new(0));
        let stopped = Arc::new(AtomicUsize::new(0));
        let appends = Arc::new(AtomicUsize::new(0));
        let renders = Arc::new(AtomicUsize::new(0));
        let backlight_events = Arc::new(Mutex::new(Vec::new()));

        let sensors = SensorSet {
            co2: co2.then(|| {
                Box::new(FakeCo2 {
                    ppm: 640,
                    started: started.clone(),
                    stopped: stopped.clone(),
                }) as Box<dyn Co2Sensor + Send>
            }),
            particulate: Some(Box::new(FakePm {
                failures: pm_failures,
            })),
            climate: None,
            probe: None,
        };

        let (publisher, receiver) = watch::channel(Snapshot::empty("teststation"));
        let metrics = Arc::new(SensorMetrics::new("teststation").unwrap());
        let sheet = SheetLog::new(
            Box::new(CountingSheet {
                appends: appends.clone(),
            }),
            300,
        );
        let screen = FakeScreen {
            renders: renders.clone(),
            backlight_events: backlight_events.clone(),
        };
        let buttons = ScriptedButtons { script, cycle: 0 };

        let sampler = Sampler::new(
            sensors,
            publisher,
            metrics,
            Some(sheet),
            Some(Box::new(screen)),
            Some(Box::new(buttons)),
            "teststation".to_string(),
            "192.0.2.1".to_string(),
            Duration::ZERO,
        );

        Harness {
            sampler,
            receiver,
            started,
            stopped,
            appends,
            renders,
            backlight_events,
        }
    }

    #[test]
    fn dual_button_gesture_stops_co2_once_and_terminates() {
        let mut h = harness(true, 0, vec![(true, true)]);
        h.sampler.run().unwrap();

        assert_eq!(h.started.load(Ordering::SeqCst), 1);
        assert_eq!(h.stopped.load(Ordering::SeqCst), 1);
        assert_eq!(h.appends.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn particulate_failure_invokes_no_sinks_for_that_cycle() {
        let mut h = harness(true, 1, vec![(true, true)]);
        h.sampler.run().unwrap();

        // The failed attempt published nothing and touched no sink; only
        // the retry that succeeded did.
        assert_eq!(h.appends.load(Ordering::SeqCst), 1);
        assert_eq!(h.renders.load(Ordering::SeqCst), 1);
        assert_eq!(h.receiver.borrow().pm25_standard, Some(9));
    }

    #[test]
    fn disabled_sensor_fields_stay_absent() {
        let mut h = harness(false, 0, vec![(false, false), (true, true)]);
        h.sampler.run().unwrap();

        assert_eq!(h.started.load(Ordering::SeqCst), 0);
        let snapshot = h.receiver.borrow().clone();
        assert_eq!(snapshot.co2_ppm, None);
        assert_eq!(snapshot.temperature_fahrenheit, None);
        assert_eq!(snapshot.pm25_standard, Some(9));

        let doc = serde_json::to_value(&snapshot).unwrap();
        assert!(!doc.as_object().unwrap().contains_key("co2_ppm"));
    }

    #[test]
    fn hide_and_show_buttons_drive_screen_and_backlight() {
        let mut h = harness(true, 0, vec![(false, true), (true, false), (true, true)]);
        h.sampler.run().unwrap();

        // Rendered on cycles 1 and 3; cycle 2 ran with the screen hidden.
        assert_eq!(h.renders.load(Ordering::SeqCst), 2);
        let events = h.backlight_events.lock().unwrap();
        assert_eq!(events.as_slice(), &[true, false, true]);
    }

    #[test]
    fn screen_transition_is_a_three_way_state_machine() {
        assert_eq!(screen_transition(false, false), None);
        assert_eq!(screen_transition(true, false), Some(ScreenTransition::Show));
        assert_eq!(screen_transition(false, true), Some(ScreenTransition::Hide));
        assert_eq!(
            screen_transition(true, true),
            Some(ScreenTransition::Terminate)
        );
    }

    #[test]
    fn cycle_period_stretches_for_co2_warmup() {
        assert_eq!(cycle_period(5, false), Duration::from_secs(5));
        assert_eq!(cycle_period(5, true), Duration::from_secs(10));
    }

    fn uniform_snapshot(k: u16) -> Snapshot {
        let mut snapshot = Snapshot::empty("teststation");
        snapshot.co2_ppm = Some(k);
        snapshot.temperature_celsius = Some(k as f32);
        snapshot.temperature_fahrenheit = Some(k as f32);
        snapshot.humidity = Some(k as f32);
        snapshot.pressure_kpa = Some(k as f32);
        snapshot.set_pm(&PmReading {
            pm10_standard: k,
            pm25_standard: k,
            pm100_standard: k,
            pm10_env: k,
            pm25_env: k,
            pm100_env: k,
            particles_03um: k,
            particles_05um: k,
            particles_10um: k,
            particles_25um: k,
            particles_50um: k,
            particles_100um: k,
        });
        snapshot
    }

    #[test]
    fn readers_never_observe_a_partially_written_snapshot() {
        let (publisher, receiver) = watch::channel(Snapshot::empty("teststation"));

        let writer = std::thread::spawn(move || {
            for k in 1..=1000u16 {
                publisher.send_replace(uniform_snapshot(k));
            }
        });

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let receiver = receiver.clone();
                std::thread::spawn(move || {
                    for _ in 0..5000 {
                        let snapshot = receiver.borrow().clone();
                        match snapshot.co2_ppm {
                            None => {
                                assert_eq!(snapshot.pm25_standard, None);
                                assert_eq!(snapshot.humidity, None);
                            }
                            Some(k) => {
                                assert_eq!(snapshot.pm10_standard, Some(k));
                                assert_eq!(snapshot.pm25_standard, Some(k));
                                assert_eq!(snapshot.particles_100um, Some(k));
                                assert_eq!(snapshot.humidity, Some(k as f32));
                            }
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }

    #[test]
    fn display_lines_follow_the_four_line_layout() {
        let mut snapshot = uniform_snapshot(9);
        snapshot.co2_ppm = Some(640);
        let lines = display_lines(&snapshot, "192.0.2.1", Some(120));

        assert_eq!(lines.len(), 5);
        assert_eq!(lines[1], "teststation (192.0.2.1)");
        assert_eq!(lines[2], "9.00\u{b0}F 9.00% hum");
        assert_eq!(lines[3], "PM2.5=9 good 10=9 good CO2=640PPM");
        assert_eq!(lines[4], "next logging: 120");
    }
}
