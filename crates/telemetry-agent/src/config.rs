//! Agent configuration
//!
//! Read from an optional file named by `TELEMETRY_CONFIG`, then from
//! `TELEMETRY_*` environment variables (e.g. `TELEMETRY_BATCH_SIZE=20`).

use anyhow::{ensure, Context, Result};
use serde::Deserialize;
use std::time::Duration;
use telemetry_lib::forward::ForwarderConfig;
use telemetry_lib::generator::GeneratorConfig;
use telemetry_lib::producer::{DriverConfig, RetryPolicy};

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Identifier attached to structured log events
    #[serde(default = "default_device_id")]
    pub device_id: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Readings per published batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    #[serde(default)]
    pub flush_on_stop: bool,

    #[serde(default = "default_variance")]
    pub variance_temp: f64,

    #[serde(default = "default_variance")]
    pub variance_humidity: f64,

    #[serde(default = "default_initial_value")]
    pub initial_temp: f64,

    #[serde(default = "default_initial_value")]
    pub initial_humidity: f64,

    /// Fixed generator seed for reproducible runs
    #[serde(default)]
    pub seed: Option<u64>,

    /// Publish attempts per batch (1 = log and drop)
    #[serde(default = "default_publish_max_attempts")]
    pub publish_max_attempts: u32,

    #[serde(default = "default_publish_backoff_ms")]
    pub publish_backoff_ms: u64,

    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    /// Concurrent downstream sends per inbound batch
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Capacity of the in-process ingestion channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Publish batches to this HTTP ingress instead of the local forwarder
    #[serde(default)]
    pub upstream_url: Option<String>,

    /// Republish forwarded elements to this HTTP endpoint; logged when unset
    #[serde(default)]
    pub downstream_url: Option<String>,
}

fn default_device_id() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "sim-device".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_batch_size() -> usize {
    telemetry_lib::DEFAULT_BATCH_SIZE
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_variance() -> f64 {
    telemetry_lib::generator::DEFAULT_VARIANCE
}

fn default_initial_value() -> f64 {
    telemetry_lib::generator::DEFAULT_INITIAL_VALUE
}

fn default_publish_max_attempts() -> u32 {
    1
}

fn default_publish_backoff_ms() -> u64 {
    1000
}

fn default_stop_timeout_ms() -> u64 {
    5000
}

fn default_max_in_flight() -> usize {
    1
}

fn default_channel_capacity() -> usize {
    16
}

impl AgentConfig {
    /// Load configuration from the optional config file and environment
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Ok(path) = std::env::var("TELEMETRY_CONFIG") {
            builder = builder.add_source(config::File::with_name(&path));
        }

        let source = builder
            .add_source(config::Environment::with_prefix("TELEMETRY").try_parsing(true))
            .build()
            .context("Failed to read telemetry configuration")?;

        Self::from_source(source)
    }

    pub fn from_source(source: config::Config) -> Result<Self> {
        let config: Self = source
            .try_deserialize()
            .context("Invalid telemetry configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.batch_size > 0, "batch_size must be greater than zero");
        ensure!(
            self.tick_interval_ms > 0,
            "tick_interval_ms must be greater than zero"
        );
        ensure!(
            (0.0..1.0).contains(&self.variance_temp)
                && (0.0..1.0).contains(&self.variance_humidity),
            "variances must be in [0, 1)"
        );
        ensure!(self.channel_capacity > 0, "channel_capacity must be greater than zero");
        Ok(())
    }

    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            batch_size: self.batch_size,
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            flush_on_stop: self.flush_on_stop,
            generator: GeneratorConfig {
                initial_temp: self.initial_temp,
                initial_humidity: self.initial_humidity,
                variance_temp: self.variance_temp,
                variance_humidity: self.variance_humidity,
                seed: self.seed,
            },
            retry: RetryPolicy {
                max_attempts: self.publish_max_attempts,
                backoff: Duration::from_millis(self.publish_backoff_ms),
            },
            stop_timeout: Duration::from_millis(self.stop_timeout_ms),
        }
    }

    pub fn forwarder_config(&self) -> ForwarderConfig {
        ForwarderConfig {
            max_in_flight: self.max_in_flight,
        }
    }
}
