use std::fs;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Local, TimeDelta};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::snapshot::Snapshot;

/// Number of values in one appended row: date, time, temperature,
/// humidity, the three PM mass concentrations, the six particle-count
/// bins, station identity, CO2.
pub const ROW_LEN: usize = 15;

/// Destination for appended rows. The production implementation talks to
/// the Google Sheets API; tests substitute a counter.
pub trait SheetSink {
    fn append_row(&mut self, row: &[Value; ROW_LEN]) -> Result<(), anyhow::Error>;
}

#[derive(Debug, Deserialize)]
struct SheetCredentials {
    spreadsheet_id: String,
    worksheet: String,
    token: String,
}

/// Appends rows to a Google Sheets worksheet over the values:append REST
/// endpoint. Token acquisition is the operator's problem; the credentials
/// file carries a ready-to-use bearer token alongside the sheet identity.
pub struct SheetsClient {
    http: reqwest::blocking::Client,
    url: String,
    token: String,
}

impl SheetsClient {
    pub fn from_credentials_file(path: &Path) -> Result<SheetsClient, anyhow::Error> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read credentials file {}", path.display()))?;
        let creds: SheetCredentials =
            serde_json::from_str(&raw).context("Failed to parse credentials file")?;

        let url = format!(
            "https://sheets.googleapis.com/v4/spreadsheets/{}/values/{}:append",
            creds.spreadsheet_id, creds.worksheet
        );

        Ok(SheetsClient {
            http: reqwest::blocking::Client::new(),
            url,
            token: creds.token,
        })
    }
}

impl SheetSink for SheetsClient {
    fn append_row(&mut self, row: &[Value; ROW_LEN]) -> Result<(), anyhow::Error> {
        self.http
            .post(&self.url)
            .bearer_auth(&self.token)
            .query(&[("valueInputOption", "USER_ENTERED")])
            .json(&json!({ "values": [row] }))
            .send()
            .context("Failed to send append request")?
            .error_for_status()
            .context("Sheet append rejected")?;
        Ok(())
    }
}

/// Rate-limiting timestamp for the remote log. Mutated only on a
/// successful append, so a failed append is retried as soon as the next
/// cycle finds the interval elapsed.
#[derive(Debug)]
pub struct LogGate {
    interval: TimeDelta,
    last_logged: Option<DateTime<Local>>,
}

impl LogGate {
    pub fn new(interval_secs: u64) -> LogGate {
        LogGate {
            interval: TimeDelta::seconds(interval_secs as i64),
            last_logged: None,
        }
    }

    pub fn should_log(&self, now: DateTime<Local>) -> bool {
        match self.last_logged {
            None => true,
            Some(last) => now - last > self.interval,
        }
    }

    pub fn mark_logged(&mut self, now: DateTime<Local>) {
        self.last_logged = Some(now);
    }

    /// Seconds until the next append attempt, shown on the display while
    /// the gate is closed.
    pub fn remaining_secs(&self, now: DateTime<Local>) -> i64 {
        match self.last_logged {
            None => 0,
            Some(last) => (self.interval - (now - last)).num_seconds(),
        }
    }
}

/// The rate-limited remote log sink: a [`SheetSink`] behind a [`LogGate`].
pub struct SheetLog {
    sink: Box<dyn SheetSink + Send>,
    gate: LogGate,
    interval_secs: u64,
}

impl SheetLog {
    pub fn new(sink: Box<dyn SheetSink + Send>, interval_secs: u64) -> SheetLog {
        SheetLog {
            sink,
            gate: LogGate::new(interval_secs),
            interval_secs,
        }
    }

    /// Offers a snapshot to the sink. Appends a row when the gate allows
    /// it; otherwise returns the seconds remaining until the next attempt.
    /// An append failure is logged and leaves the gate untouched.
    pub fn offer(&mut self, snapshot: &Snapshot) -> Option<i64> {
        let now = snapshot.timestamp;
        if self.gate.should_log(now) {
            log::info!(
                "{} logging to sheet every {}s",
                now.format("%H:%M:%S"),
                self.interval_secs
            );
            match self.sink.append_row(&row_values(snapshot)) {
                Ok(()) => self.gate.mark_logged(now),
                Err(e) => log::warn!("failed to append values to sheet: {e}"),
            }
            None
        } else {
            Some(self.gate.remaining_secs(now))
        }
    }
}

/// Flattens a snapshot into the fixed 15-column row schema. Absent
/// readings become empty cells.
pub fn row_values(snapshot: &Snapshot) -> [Value; ROW_LEN] {
    [
        json!(snapshot.timestamp.format("%Y-%m-%d").to_string()),
        json!(snapshot.timestamp.format("%H:%M:%S").to_string()),
        json!(snapshot.temperature_fahrenheit),
        json!(snapshot.humidity),
        json!(snapshot.pm10_standard),
        json!(snapshot.pm25_standard),
        json!(snapshot.pm100_standard),
        json!(snapshot.particles_03um),
        json!(snapshot.particles_05um),
        json!(snapshot.particles_10um),
        json!(snapshot.particles_25um),
        json!(snapshot.particles_50um),
        json!(snapshot.particles_100um),
        json!(snapshot.station),
        json!(snapshot.co2_ppm),
    ]
}
