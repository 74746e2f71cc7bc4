use std::time::Duration;

use agri_monitor::{
    config::{Config, read_config_file},
    manager::IngestManager,
};
use anyhow::Context;
use clap::Parser;
use tokio::time;
use tracing::{error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

const STATUS_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file (JSON); defaults are used for everything when omitted
    #[arg(short)]
    file: Option<String>,

    /// Log everything down to TRACE
    #[arg(short, long)]
    verbose: bool,
}

fn log_filter(verbose: bool) -> filter::Targets {
    let level = if verbose {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    };
    filter::Targets::new().with_targets(vec![
        ("agri_monitor", level),
        (env!("CARGO_CRATE_NAME"), level),
        ("rumqttc", LevelFilter::WARN),
    ])
}

fn init(verbose: bool) {
    dotenv::dotenv().ok();

    let filter = log_filter(verbose);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init(args.verbose);
    trace!("started with args: {args:?}");

    let config = match &args.file {
        Some(path) => read_config_file(path)?,
        None => Config::default(),
    };
    config.validate().context("invalid configuration")?;

    info!(
        "starting ingestion from {}:{} (topics: {})",
        config.mqtt_broker,
        config.mqtt_port,
        config.mqtt_topics.join(", ")
    );

    let mut manager = IngestManager::new(config).await?;
    manager.start().await?;

    let mut status = time::interval(STATUS_INTERVAL);
    status.tick().await;

    loop {
        tokio::select! {
            _ = status.tick() => log_status(&manager).await,
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("failed to listen for Ctrl-C: {e}");
                }
                info!("shutting down");
                break;
            }
        }
    }

    manager.stop().await
}

async fn log_status(manager: &IngestManager) {
    match manager.get_statistics().await {
        Ok(stats) => info!(
            "status: {} | received {} | processed {} | dropped {} | errors {} | readings {} | devices {} | active alerts {}",
            stats.connection_status,
            stats.messages_received,
            stats.messages_processed,
            stats.messages_dropped,
            stats.processing_errors,
            stats.total_readings,
            stats.unique_devices,
            stats.active_alerts
        ),
        Err(e) => error!("failed to read statistics: {e:#}"),
    }
}
