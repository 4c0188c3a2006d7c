//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Binary entrypoint for the GridZen live monitor."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
mod monitor;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use gz_common::logging::init_tracing;
use gz_common::AppConfig;
use gz_metrics::{new_registry, spawn_http_server, MonitorMetrics};
use gz_msg::{Forecast, SessionSummary};
use gz_net::{ApiClient, ConnectionManager, ResourcePoller};
use serde::Serialize;
use tokio::signal;
use tracing::{info, warn};
use url::Url;

use crate::monitor::{fetch_outcome, Monitor};

const SERVICE_NAME: &str = "gz-monitor";

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "GridZen live microgrid monitor",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", global = true, help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(
        long,
        value_name = "URL",
        global = true,
        env = "GZ_MONITOR_BASE_URL",
        help = "Override the backend base URL"
    )]
    base_url: Option<Url>,

    #[arg(long, value_name = "N", global = true, help = "Override the history window capacity")]
    capacity: Option<usize>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Follow the live stream and poll forecast and summary (default)")]
    Run,
    #[command(about = "Fetch the generation forecast once and print it")]
    Forecast {
        #[arg(long, help = "Forecast horizon in hours (6-48)")]
        hours: Option<u32>,
    },
    #[command(about = "Fetch the lifetime summary once and print it")]
    Summary,
    #[command(about = "Check backend health")]
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let candidates = [PathBuf::from("configs/monitor.toml")];
    let loaded = AppConfig::load_with_source(cli.config.as_deref(), &candidates)?;
    let mut config = loaded.config;
    if let Some(base_url) = cli.base_url {
        config.endpoint.base_url = base_url;
    }
    if let Some(capacity) = cli.capacity {
        config.history.capacity = capacity;
    }
    config.validate()?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            init_tracing(SERVICE_NAME, &config.logging)?;
            info!(config_path = %loaded.source.display(), base_url = %config.endpoint.base_url, "configuration loaded");
            run_monitor(config).await?
        }
        Commands::Forecast { hours } => {
            let client = ApiClient::from_config(&config.endpoint, &config.fetch)?;
            let forecast = client
                .forecast(hours.unwrap_or(config.fetch.forecast_hours))
                .await?;
            print_json(&forecast)?;
        }
        Commands::Summary => {
            let client = ApiClient::from_config(&config.endpoint, &config.fetch)?;
            print_json(&client.summary().await?)?;
        }
        Commands::Health => {
            let client = ApiClient::from_config(&config.endpoint, &config.fetch)?;
            let health = client.health().await?;
            print_json(&health)?;
            if !health.is_ok() {
                anyhow::bail!("backend reports status `{}`", health.status);
            }
        }
    }

    Ok(())
}

async fn run_monitor(config: AppConfig) -> Result<()> {
    let registry = new_registry();
    let (metrics, metrics_server) = if config.metrics.enabled {
        let metrics = MonitorMetrics::new(registry.clone())?;
        metrics.set_build_info(env!("CARGO_PKG_VERSION"));
        let server = spawn_http_server(registry, config.metrics.listen)?;
        info!(address = %server.addr(), "metrics exporter enabled");
        (Some(metrics), Some(server))
    } else {
        info!("metrics exporter disabled by configuration");
        (None, None)
    };

    let client = ApiClient::from_config(&config.endpoint, &config.fetch)?;
    let forecast_poller = {
        let client = client.clone();
        let metrics = metrics.clone();
        let hours = config.fetch.forecast_hours;
        ResourcePoller::<Forecast>::spawn("forecast", config.fetch.poll_every(), move || {
            let client = client.clone();
            let metrics = metrics.clone();
            async move {
                let result = client.forecast(hours).await;
                if let Some(metrics) = &metrics {
                    metrics.record_fetch("forecast", fetch_outcome(&result));
                }
                result
            }
        })
    };
    let summary_poller = {
        let client = client.clone();
        let metrics = metrics.clone();
        ResourcePoller::<SessionSummary>::spawn("summary", config.fetch.poll_every(), move || {
            let client = client.clone();
            let metrics = metrics.clone();
            async move {
                let result = client.summary().await;
                if let Some(metrics) = &metrics {
                    metrics.record_fetch("summary", fetch_outcome(&result));
                }
                result
            }
        })
    };
    let forecast = forecast_poller.subscribe();
    let summary = summary_poller.subscribe();

    let (mut manager, mut events) = ConnectionManager::websocket(&config.endpoint, &config.stream)?;
    let mut monitor = Monitor::new(&config, metrics);
    manager.connect();
    info!(endpoint = %manager.endpoint(), "monitor running; waiting for termination signal");

    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result?;
                info!("ctrl-c received; shutting down");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else {
                    warn!("stream event channel closed");
                    break;
                };
                if monitor.handle(event) {
                    let line = monitor.dashboard(&summary.borrow(), &forecast.borrow());
                    if let Some(line) = line {
                        line.log();
                    }
                }
            }
        }
    }

    manager.disconnect().await;
    forecast_poller.shutdown().await;
    summary_poller.shutdown().await;
    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    info!(
        frames = ?manager.frame_stats(),
        attempts = manager.attempts(),
        applied = monitor.live().sequence(),
        last_state = %monitor.connection(),
        "monitor stopped"
    );
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
