//! metasysd - Metasys stream importer daemon
//!
//! Logs on to a Metasys server, holds its push stream open and forwards
//! value updates for the configured sensors downstream.
//!
//! Usage:
//!   metasysd [OPTIONS] <config.toml>
//!
//! Options:
//!   --json-logs   Emit logs as JSON lines

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use metasys_client::MetasysClient;
use metasys_core::{
    AuditCategory, ChannelObservationSink, InMemorySensorRepository, Observation, TracingMetrics,
};
use metasys_importer::{Collaborators, StreamImporter};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::DaemonConfig;

const PUBLISHER_DRAIN: std::time::Duration = std::time::Duration::from_secs(5);

/// Parsed command-line arguments
struct Args {
    /// Daemon config file (TOML)
    config_path: Option<PathBuf>,
    /// Log as JSON instead of human-readable lines
    json_logs: bool,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut result = Args {
        config_path: None,
        json_logs: false,
    };

    for arg in &args {
        match arg.as_str() {
            "--json-logs" => result.json_logs = true,
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            arg if !arg.starts_with('-') => {
                // Positional argument = config file
                result.config_path = Some(PathBuf::from(arg));
            }
            _ => eprintln!("Unknown argument: {}", arg),
        }
    }

    result
}

fn print_help() {
    eprintln!(
        r#"metasysd - Metasys stream importer daemon

Usage: metasysd [OPTIONS] <config.toml>

Options:
      --json-logs   Emit logs as JSON lines
  -h, --help        Print this help message

Log levels are taken from RUST_LOG, e.g.
  RUST_LOG=metasysd=info,metasys_importer=debug metasysd config.toml
"#
    );
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "metasysd=info,metasys_importer=info,metasys_client=info,metasys_core=info".into()
    });
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = parse_args();
    init_tracing(args.json_logs);

    let Some(config_path) = args.config_path else {
        print_help();
        anyhow::bail!("No config file given");
    };

    tracing::info!("Starting metasysd (Metasys stream importer)");
    tracing::info!("Loading config from: {}", config_path.display());
    let config = DaemonConfig::load(&config_path)?;

    let client = Arc::new(
        MetasysClient::with_config(
            &config.upstream.base_url,
            config.upstream.request_timeout(),
            config.upstream.connect_timeout(),
        )
        .context("Failed to create Metasys client")?,
    );
    let stream_url = client.stream_url().context("Invalid stream URL")?;

    let sensors = Arc::new(InMemorySensorRepository::from_sensors(
        config.sensors.iter().cloned(),
    ));
    tracing::info!(sensors = config.sensors.len(), "Sensor mappings loaded");

    let (sink, observations) = ChannelObservationSink::new();
    let publisher = tokio::spawn(run_publisher(observations));

    let importer = StreamImporter::new(
        config.importer.clone(),
        config.upstream.credentials(),
        stream_url,
        Collaborators::from_client(client, sensors, Arc::new(sink), Arc::new(TracingMetrics)),
    )?;

    importer
        .start()
        .await
        .context("Initial logon to the Metasys server failed")?;

    let mut background = Vec::new();
    if let Some(interval) = config.importer.trend_poll_interval() {
        tracing::info!(interval_ms = interval.as_millis() as u64, "Trend polling enabled");
        background.push(tokio::spawn(run_trend_poll(importer.clone(), interval)));
    }
    if let Some(interval) = config.report.interval() {
        background.push(tokio::spawn(run_report(importer.clone(), interval)));
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    tracing::info!("Shutdown requested");

    for task in background {
        task.abort();
        let _ = task.await;
    }
    importer.shutdown().await;
    report(&importer);

    // The importer holds the last sender; dropping it ends the publisher
    drop(importer);
    match tokio::time::timeout(PUBLISHER_DRAIN, publisher).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "Publisher task ended abnormally"),
        Err(_) => tracing::warn!("Publisher did not drain in time"),
    }

    tracing::info!("metasysd stopped");
    Ok(())
}

/// Downstream delivery: one structured log line per observation
async fn run_publisher(mut observations: UnboundedReceiver<Observation>) {
    while let Some(observation) = observations.recv().await {
        match serde_json::to_string(&observation) {
            Ok(json) => tracing::info!(target: "metasysd::observation", "{}", json),
            Err(e) => tracing::warn!(sensor_id = %observation.sensor_id, error = %e, "Unserializable observation"),
        }
    }
}

async fn run_trend_poll(importer: Arc<StreamImporter>, interval: std::time::Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let published = importer.poll_trends(interval).await;
        tracing::debug!(published, "Trend samples published");
    }
}

async fn run_report(importer: Arc<StreamImporter>, interval: std::time::Duration) {
    let mut ticker = tokio::time::interval(interval);
    // First tick completes immediately
    ticker.tick().await;
    loop {
        ticker.tick().await;
        report(&importer);
    }
}

fn report(importer: &StreamImporter) {
    let health = importer.health().snapshot();
    let audit = importer.audit().get_all();
    let failing: Vec<&str> = audit
        .iter()
        .filter(|(_, state)| {
            let failed = state.get(AuditCategory::Failed);
            let latest = state.latest();
            matches!((failed, latest), (Some(f), Some(l)) if f.timestamp == l.timestamp)
        })
        .map(|(id, _)| id.as_str())
        .collect();

    tracing::info!(
        frames = health.frames_received,
        published = health.observations_published,
        unmapped = health.sensors_unmapped,
        unknown = health.unknown_events,
        logon_failures = health.logon_failures,
        subscribe_failures = health.subscribe_failures,
        reconnects = health.reconnects,
        last_heartbeat = ?health.last_heartbeat,
        stream = ?importer.stream().state(),
        tracked = audit.len(),
        failing = ?failing,
        "Importer health"
    );
}
