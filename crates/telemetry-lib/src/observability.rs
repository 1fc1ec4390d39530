//! Observability infrastructure for the telemetry forwarder
//!
//! Provides:
//! - Prometheus metrics (readings, batches, publish latency, forward outcomes)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter,
    IntGauge,
};
use std::sync::OnceLock;
use tracing::{debug, error, info, warn};

/// Default histogram buckets for publish latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<TelemetryMetricsInner> = OnceLock::new();

struct TelemetryMetricsInner {
    readings_generated: IntCounter,
    buffered_readings: IntGauge,
    batches_published: IntCounter,
    publish_failures: IntCounter,
    batches_dropped: IntCounter,
    readings_discarded: IntCounter,
    publish_latency_seconds: Histogram,
    elements_forwarded: IntCounter,
    element_failures: IntCounter,
    batches_rejected: IntCounter,
}

impl TelemetryMetricsInner {
    fn new() -> Self {
        Self {
            readings_generated: register_int_counter!(
                "telemetry_readings_generated_total",
                "Total number of synthetic readings generated"
            )
            .expect("Failed to register readings_generated"),

            buffered_readings: register_int_gauge!(
                "telemetry_buffered_readings",
                "Readings currently held in the batch accumulator"
            )
            .expect("Failed to register buffered_readings"),

            batches_published: register_int_counter!(
                "telemetry_batches_published_total",
                "Batches acknowledged by the upstream sink"
            )
            .expect("Failed to register batches_published"),

            publish_failures: register_int_counter!(
                "telemetry_publish_failures_total",
                "Failed publish attempts, including retried ones"
            )
            .expect("Failed to register publish_failures"),

            batches_dropped: register_int_counter!(
                "telemetry_batches_dropped_total",
                "Batches dropped after exhausting publish attempts or timing out on stop"
            )
            .expect("Failed to register batches_dropped"),

            readings_discarded: register_int_counter!(
                "telemetry_readings_discarded_total",
                "Unpublished readings discarded on stop with flush_on_stop disabled"
            )
            .expect("Failed to register readings_discarded"),

            publish_latency_seconds: register_histogram!(
                "telemetry_publish_latency_seconds",
                "Time spent in a single publish attempt",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register publish_latency_seconds"),

            elements_forwarded: register_int_counter!(
                "telemetry_elements_forwarded_total",
                "Elements successfully republished downstream"
            )
            .expect("Failed to register elements_forwarded"),

            element_failures: register_int_counter!(
                "telemetry_element_failures_total",
                "Elements whose downstream send failed"
            )
            .expect("Failed to register element_failures"),

            batches_rejected: register_int_counter!(
                "telemetry_batches_rejected_total",
                "Inbound batches rejected by shape validation"
            )
            .expect("Failed to register batches_rejected"),
        }
    }
}

/// Lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct TelemetryMetrics {
    _private: (),
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(TelemetryMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &TelemetryMetricsInner {
        GLOBAL_METRICS.get_or_init(TelemetryMetricsInner::new)
    }

    pub fn inc_readings_generated(&self) {
        self.inner().readings_generated.inc();
    }

    pub fn set_buffered_readings(&self, count: usize) {
        self.inner().buffered_readings.set(count as i64);
    }

    pub fn inc_batches_published(&self) {
        self.inner().batches_published.inc();
    }

    pub fn inc_publish_failures(&self) {
        self.inner().publish_failures.inc();
    }

    pub fn inc_batches_dropped(&self) {
        self.inner().batches_dropped.inc();
    }

    pub fn inc_readings_discarded(&self, count: usize) {
        self.inner().readings_discarded.inc_by(count as u64);
    }

    pub fn observe_publish_latency(&self, duration_secs: f64) {
        self.inner().publish_latency_seconds.observe(duration_secs);
    }

    pub fn inc_elements_forwarded(&self) {
        self.inner().elements_forwarded.inc();
    }

    pub fn inc_element_failures(&self) {
        self.inner().element_failures.inc();
    }

    pub fn inc_batches_rejected(&self) {
        self.inner().batches_rejected.inc();
    }

    pub fn batches_published(&self) -> u64 {
        self.inner().batches_published.get()
    }

    pub fn readings_discarded(&self) -> u64 {
        self.inner().readings_discarded.get()
    }

    pub fn batches_rejected(&self) -> u64 {
        self.inner().batches_rejected.get()
    }
}

/// Structured logger for device and forwarder events
///
/// Provides consistent event-tagged records so log pipelines can
/// filter on `event` without parsing messages.
#[derive(Clone)]
pub struct StructuredLogger {
    device_id: String,
}

impl StructuredLogger {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn log_startup(&self, version: &str, batch_size: usize, tick_interval_ms: u64) {
        info!(
            event = "device_started",
            device = %self.device_id,
            version = %version,
            batch_size = batch_size,
            tick_interval_ms = tick_interval_ms,
            "Telemetry device started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "device_shutdown",
            device = %self.device_id,
            reason = %reason,
            "Telemetry device shutting down"
        );
    }

    pub fn log_connected(&self, sink: &str) {
        info!(event = "sink_connected", device = %self.device_id, sink = %sink, "Connected");
    }

    pub fn log_connect_failed(&self, sink: &str, error: &str) {
        error!(
            event = "sink_connect_failed",
            device = %self.device_id,
            sink = %sink,
            error = %error,
            "Device could not connect to sink"
        );
    }

    /// Periodic buffer progress, every 10 readings (60 marks a full minute at 1s ticks)
    pub fn log_buffer_progress(&self, buffered: usize, total: u64) {
        if total == 0 || total % 10 != 0 {
            return;
        }

        debug!(
            event = "buffer_progress",
            device = %self.device_id,
            buffered = buffered,
            total_readings = total,
            minute_mark = total % 60 == 0,
            "Accumulating readings"
        );
    }

    pub fn log_batch_published(&self, readings: usize, attempts: u32, ack: &str) {
        info!(
            event = "batch_published",
            device = %self.device_id,
            readings = readings,
            attempts = attempts,
            ack = %ack,
            "Batch published"
        );
    }

    pub fn log_batch_dropped(&self, readings: usize, attempts: u32, error: &str) {
        error!(
            event = "batch_dropped",
            device = %self.device_id,
            readings = readings,
            attempts = attempts,
            error = %error,
            "Dropping batch after failed publish"
        );
    }

    pub fn log_partial_discarded(&self, readings: usize) {
        warn!(
            event = "partial_batch_discarded",
            device = %self.device_id,
            readings = readings,
            "Discarding unpublished readings on stop (flush_on_stop disabled)"
        );
    }

    pub fn log_batch_rejected(&self, invocation: &str, reason: &str) {
        warn!(
            event = "batch_rejected",
            device = %self.device_id,
            invocation = %invocation,
            reason = %reason,
            "Unrecognized inbound batch format"
        );
    }
}
