use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use log::LevelFilter;
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};
use tokio::sync::watch;

use config::Config;
use display::{ButtonPad, GpioButtons, Screen, St7789Screen};
use metrics::SensorMetrics;
use sampler::Sampler;
use sensor::SensorSet;
use sheet::{SheetLog, SheetsClient};
use snapshot::Snapshot;

mod api;
mod classify;
mod config;
mod display;
mod metrics;
mod pct2075;
mod pmsa003i;
mod sampler;
mod scd4x;
mod sensor;
mod sheet;
mod snapshot;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::parse();

    let level = if config.debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    TermLogger::init(
        level,
        ConfigBuilder::new()
            .set_time_format_rfc3339()
            .set_time_offset_to_local()
            .map_err(|_| anyhow::anyhow!("Failed to set time offset to local"))?
            .build(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .context("Failed to initialize logger")?;

    if let Err(e) = run(config).await {
        log::error!("{e:#}");
        std::process::exit(1);
    }

    Ok(())
}

pub async fn run(config: Config) -> Result<(), anyhow::Error> {
    let station = config.station();
    let address = local_ip();
    log::info!("station is {station} ({address})");

    let (publisher, snapshot_rx) = watch::channel(Snapshot::empty(&station));
    let metrics =
        Arc::new(SensorMetrics::new(&station).context("Failed to build metrics registry")?);

    let wsport = config.wsport;
    tokio::spawn(async move {
        if let Err(e) = api::serve(wsport, snapshot_rx).await {
            log::error!("{e:#}");
        }
    });

    let metrics_port = config.metrics_port;
    let exported = metrics.clone();
    tokio::spawn(async move {
        if let Err(e) = metrics::serve(metrics_port, exported).await {
            log::error!("{e:#}");
        }
    });

    // Sensor and display handles are opened on the sampling thread and
    // stay there; an initialization failure is fatal.
    let sampling = tokio::task::spawn_blocking(move || -> Result<(), anyhow::Error> {
        let enablement = config.enablement();
        let sensors = SensorSet::from_enablement(&enablement)?;

        let sheet = if config.remote_log {
            let client = SheetsClient::from_credentials_file(&config.creds)?;
            log::info!("initialized worksheet client");
            Some(SheetLog::new(Box::new(client), config.log_interval))
        } else {
            None
        };

        let (screen, buttons) = if config.display {
            let screen = Box::new(St7789Screen::new()?) as Box<dyn Screen + Send>;
            let buttons = Box::new(GpioButtons::new()?) as Box<dyn ButtonPad + Send>;
            (Some(screen), Some(buttons))
        } else {
            (None, None)
        };

        let period = sampler::cycle_period(config.sample_interval, enablement.co2);
        let mut sampler = Sampler::new(
            sensors, publisher, metrics, sheet, screen, buttons, station, address, period,
        );
        sampler.run()
    });

    sampling.await.context("Sampling loop panicked")??;
    Ok(())
}

/// Local address shown on the display's station line. Connecting a UDP
/// socket never sends a packet; it just selects the outbound interface.
fn local_ip() -> String {
    std::net::UdpSocket::bind(("0.0.0.0", 0))
        .and_then(|socket| {
            socket.connect(("10.255.255.255", 1))?;
            socket.local_addr()
        })
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|_| "127.0.0.1".to_string())
}
