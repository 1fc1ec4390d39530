//! Telemetry Agent - simulated sensor device with a local batch forwarder
//!
//! The producer half generates readings and publishes them in batches. By
//! default batches go through an in-process channel to the forwarder half,
//! which republishes every reading individually downstream.

use anyhow::{Context, Result};
use std::sync::Arc;
use telemetry_lib::{
    forward::{BatchForwarder, IngestionStats, IngestionWorker},
    health::{components, HealthRegistry},
    observability::{StructuredLogger, TelemetryMetrics},
    producer::DriverBuilder,
    sinks::{ChannelSink, DownstreamSink, HttpSink, HttpSinkConfig, LogSink, Sink},
};
use tokio::task::JoinHandle;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = config::AgentConfig::load()?;
    info!(device_id = %config.device_id, "Agent configured");

    let health_registry = HealthRegistry::new();
    let metrics = TelemetryMetrics::new();

    let logger = StructuredLogger::new(&config.device_id);
    logger.log_startup(AGENT_VERSION, config.batch_size, config.tick_interval_ms);

    let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    let (sink, worker_task): (Arc<dyn Sink>, Option<JoinHandle<IngestionStats>>) =
        match &config.upstream_url {
            Some(url) => {
                let sink = HttpSink::new(HttpSinkConfig::new(url))
                    .context("Invalid upstream_url")?;
                (Arc::new(sink) as Arc<dyn Sink>, None)
            }
            None => {
                let (sink, receiver) = ChannelSink::new(config.channel_capacity);
                let downstream: Arc<dyn DownstreamSink> = match &config.downstream_url {
                    Some(url) => Arc::new(
                        HttpSink::new(HttpSinkConfig::new(url))
                            .context("Invalid downstream_url")?,
                    ),
                    None => Arc::new(LogSink::new()),
                };

                let forwarder = BatchForwarder::new(downstream, config.forwarder_config())
                    .with_logger(logger.clone());
                let worker = IngestionWorker::new(receiver, Arc::new(forwarder))
                    .with_health(health_registry.clone());
                (
                    Arc::new(sink) as Arc<dyn Sink>,
                    Some(tokio::spawn(worker.run())),
                )
            }
        };

    let driver = DriverBuilder::new()
        .sink(sink)
        .config(config.driver_config())
        .logger(logger.clone())
        .health(health_registry.clone())
        .build()?;

    let handle = match driver.start().await {
        Ok(handle) => handle,
        Err(e) => {
            health_registry
                .set_unhealthy(components::PUBLISHER, e.to_string())
                .await;
            return Err(e).context("Failed to start telemetry driver");
        }
    };

    health_registry.set_ready(true).await;

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    health_registry.set_ready(false).await;

    let report = handle.stop().await?;
    info!(
        readings = report.readings_generated,
        published = report.batches_published,
        dropped = report.batches_dropped,
        discarded = report.readings_discarded,
        "Driver stopped"
    );

    // The worker exits once the driver has released the channel sender
    if let Some(task) = worker_task {
        let stats = task.await?;
        info!(
            accepted = stats.batches_accepted,
            rejected = stats.batches_rejected,
            sent = stats.elements_sent,
            failed = stats.elements_failed,
            "Forwarder drained"
        );
    }

    api_handle.abort();
    Ok(())
}
