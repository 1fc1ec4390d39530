//! Producer driver
//!
//! Owns the tick loop and its lifecycle:
//! `Stopped -> Connecting -> Running -> Stopped`. Each tick generates one
//! reading, appends it to the accumulator and dispatches a publish when the
//! batch is full. Publishes run on a background task so the next tick can
//! proceed, but at most one is in flight at a time.

use super::{BatchAccumulator, Publisher};
use crate::error::DriverError;
use crate::generator::{GeneratorConfig, ReadingGenerator};
use crate::health::{components, HealthRegistry};
use crate::models::{Batch, DEFAULT_BATCH_SIZE};
use crate::observability::{StructuredLogger, TelemetryMetrics};
use crate::sinks::Sink;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

/// Lifecycle state of a driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Stopped,
    Connecting,
    Running,
}

/// Publish retry policy. One attempt means log and drop on failure.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::from_secs(1),
        }
    }
}

/// Configuration for the producer driver
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Readings per batch (default: 20)
    pub batch_size: usize,
    /// Tick interval (default: 1 second)
    pub tick_interval: Duration,
    /// Publish the partial batch on stop instead of discarding it
    pub flush_on_stop: bool,
    pub generator: GeneratorConfig,
    pub retry: RetryPolicy,
    /// How long stop waits for an in-flight publish (default: 5 seconds)
    pub stop_timeout: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            tick_interval: Duration::from_secs(1),
            flush_on_stop: false,
            generator: GeneratorConfig::default(),
            retry: RetryPolicy::default(),
            stop_timeout: Duration::from_secs(5),
        }
    }
}

/// Summary returned when a driver stops
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverReport {
    pub readings_generated: u64,
    pub batches_published: u64,
    pub batches_dropped: u64,
    pub readings_dropped: u64,
    /// Readings discarded on stop because `flush_on_stop` was off
    pub readings_discarded: u64,
}

/// Producer driver, not yet started
pub struct Driver {
    sink: Arc<dyn Sink>,
    config: DriverConfig,
    accumulator: BatchAccumulator,
    generator: ReadingGenerator,
    logger: StructuredLogger,
    health: Option<HealthRegistry>,
}

impl Driver {
    /// Connect to the sink and start ticking.
    ///
    /// A connect failure is fatal: the driver never ticks and the error is
    /// returned to the caller.
    pub async fn start(self) -> Result<DriverHandle, DriverError> {
        let (state_tx, state_rx) = watch::channel(DriverState::Stopped);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let producer = self.connect(state_tx, shutdown_rx).await?;

        let task = tokio::spawn(producer.run());

        Ok(DriverHandle {
            shutdown: shutdown_tx,
            state: state_rx,
            task,
        })
    }

    async fn connect(
        self,
        state: watch::Sender<DriverState>,
        stop_signal: broadcast::Receiver<()>,
    ) -> Result<ProducerLoop, DriverError> {
        state.send_replace(DriverState::Connecting);

        let connection = match self.sink.connect().await {
            Ok(connection) => connection,
            Err(e) => {
                self.logger
                    .log_connect_failed(self.sink.name(), &e.to_string());
                state.send_replace(DriverState::Stopped);
                return Err(e.into());
            }
        };
        self.logger.log_connected(self.sink.name());

        if let Some(health) = &self.health {
            health.register(components::GENERATOR).await;
            health.register(components::PUBLISHER).await;
        }

        state.send_replace(DriverState::Running);

        Ok(ProducerLoop {
            generator: self.generator,
            accumulator: self.accumulator,
            publisher: Publisher::new(connection),
            config: self.config,
            logger: self.logger,
            health: self.health,
            metrics: TelemetryMetrics::new(),
            in_flight: None,
            pending: None,
            report: DriverReport::default(),
            state,
            stop_signal,
        })
    }
}

/// Handle to a running driver
pub struct DriverHandle {
    shutdown: broadcast::Sender<()>,
    state: watch::Receiver<DriverState>,
    task: JoinHandle<DriverReport>,
}

impl DriverHandle {
    pub fn state(&self) -> DriverState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<DriverState> {
        self.state.clone()
    }

    /// Request a graceful stop and wait for the loop to finish
    pub async fn stop(self) -> Result<DriverReport, DriverError> {
        // The loop may already have exited; nothing to signal then
        let _ = self.shutdown.send(());
        Ok(self.task.await?)
    }
}

/// Outcome of one batch after all publish attempts
#[derive(Debug)]
enum PublishOutcome {
    Published,
    Dropped { readings: usize },
}

struct InFlight {
    handle: JoinHandle<PublishOutcome>,
    readings: usize,
}

/// Running producer state, owned by a single task
struct ProducerLoop {
    generator: ReadingGenerator,
    accumulator: BatchAccumulator,
    publisher: Publisher,
    config: DriverConfig,
    logger: StructuredLogger,
    health: Option<HealthRegistry>,
    metrics: TelemetryMetrics,
    in_flight: Option<InFlight>,
    /// Flushed batch held back because stop arrived while the previous publish ran
    pending: Option<Batch>,
    report: DriverReport,
    state: watch::Sender<DriverState>,
    stop_signal: broadcast::Receiver<()>,
}

impl ProducerLoop {
    async fn run(mut self) -> DriverReport {
        info!(
            interval_ms = self.config.tick_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "Starting producer loop"
        );

        let mut ticker = interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !self.tick().await {
                        info!("Stop requested while waiting on previous publish");
                        break;
                    }
                }
                // A dropped handle closes the channel, which also lands here
                _ = self.stop_signal.recv() => {
                    info!("Stopping producer loop");
                    break;
                }
            }
        }

        self.shutdown().await
    }

    /// Returns false when stop was requested during the tick
    async fn tick(&mut self) -> bool {
        let reading = self.generator.next_reading();
        self.accumulator.append(reading);
        self.report.readings_generated += 1;
        self.metrics.inc_readings_generated();
        self.logger
            .log_buffer_progress(self.accumulator.len(), self.accumulator.total_appended());

        let running = match self.accumulator.flush_if_full() {
            Some(batch) => self.dispatch(batch).await,
            None => true,
        };

        self.metrics.set_buffered_readings(self.accumulator.len());
        running
    }

    /// Start publishing a flushed batch in the background.
    ///
    /// Publishes stay serialized so batches arrive in flush order. If stop is
    /// requested while the previous publish is still running, the batch is
    /// parked in `pending` and the stop path takes over.
    async fn dispatch(&mut self, batch: Batch) -> bool {
        if let Some(mut in_flight) = self.in_flight.take() {
            tokio::select! {
                result = &mut in_flight.handle => {
                    self.record_joined(result, in_flight.readings);
                }
                _ = self.stop_signal.recv() => {
                    self.in_flight = Some(in_flight);
                    self.pending = Some(batch);
                    return false;
                }
            }
        }

        let readings = batch.len();
        let handle = tokio::spawn(publish_with_retry(
            self.publisher.clone(),
            batch,
            self.config.retry.clone(),
            self.logger.clone(),
            self.health.clone(),
        ));
        self.in_flight = Some(InFlight { handle, readings });
        true
    }

    fn record_joined(&mut self, result: Result<PublishOutcome, JoinError>, readings: usize) {
        let outcome = result.unwrap_or_else(|e| {
            error!(error = %e, "Publish task failed");
            PublishOutcome::Dropped { readings }
        });
        self.record(outcome);
    }

    fn record(&mut self, outcome: PublishOutcome) {
        match outcome {
            PublishOutcome::Published => self.report.batches_published += 1,
            PublishOutcome::Dropped { readings } => {
                self.report.batches_dropped += 1;
                self.report.readings_dropped += readings as u64;
            }
        }
    }

    async fn shutdown(mut self) -> DriverReport {
        let timeout = self.config.stop_timeout;

        if let Some(mut in_flight) = self.in_flight.take() {
            match tokio::time::timeout(timeout, &mut in_flight.handle).await {
                Ok(result) => self.record_joined(result, in_flight.readings),
                Err(_) => {
                    error!(
                        readings = in_flight.readings,
                        timeout_ms = timeout.as_millis() as u64,
                        "In-flight publish did not finish before stop timeout, aborting"
                    );
                    in_flight.handle.abort();
                    self.metrics.inc_batches_dropped();
                    self.record(PublishOutcome::Dropped {
                        readings: in_flight.readings,
                    });
                }
            }
        }

        // The parked batch precedes the partial one in flush order
        let leftovers = [self.pending.take(), self.accumulator.take_partial()];
        for batch in leftovers.into_iter().flatten() {
            self.finish_leftover(batch).await;
        }
        self.metrics.set_buffered_readings(0);

        if let Some(health) = &self.health {
            health.set_unhealthy(components::GENERATOR, "stopped").await;
        }
        self.state.send_replace(DriverState::Stopped);

        info!(
            readings = self.report.readings_generated,
            published = self.report.batches_published,
            dropped = self.report.batches_dropped,
            "Producer loop stopped"
        );
        self.report
    }

    /// Publish or discard a batch left over at stop, per `flush_on_stop`
    async fn finish_leftover(&mut self, batch: Batch) {
        let readings = batch.len();
        if !self.config.flush_on_stop {
            self.logger.log_partial_discarded(readings);
            self.metrics.inc_readings_discarded(readings);
            self.report.readings_discarded += readings as u64;
            return;
        }

        info!(readings = readings, "Flushing remaining batch on stop");
        let publish = publish_with_retry(
            self.publisher.clone(),
            batch,
            self.config.retry.clone(),
            self.logger.clone(),
            self.health.clone(),
        );
        match tokio::time::timeout(self.config.stop_timeout, publish).await {
            Ok(outcome) => self.record(outcome),
            Err(_) => {
                error!(readings = readings, "Final flush timed out");
                self.metrics.inc_batches_dropped();
                self.record(PublishOutcome::Dropped { readings });
            }
        }
    }
}

async fn publish_with_retry(
    publisher: Publisher,
    batch: Batch,
    retry: RetryPolicy,
    logger: StructuredLogger,
    health: Option<HealthRegistry>,
) -> PublishOutcome {
    let max_attempts = retry.max_attempts.max(1);
    let mut attempts = 0;

    loop {
        attempts += 1;
        match publisher.publish(&batch).await {
            Ok(ack) => {
                logger.log_batch_published(batch.len(), attempts, ack.token());
                if let Some(health) = &health {
                    health.set_healthy(components::PUBLISHER).await;
                }
                return PublishOutcome::Published;
            }
            Err(e) if attempts < max_attempts => {
                warn!(
                    error = %e,
                    attempt = attempts,
                    max_attempts = max_attempts,
                    "Failed to publish batch, retrying"
                );
                tokio::time::sleep(retry.backoff).await;
            }
            Err(e) => {
                logger.log_batch_dropped(batch.len(), attempts, &e.to_string());
                TelemetryMetrics::new().inc_batches_dropped();
                if let Some(health) = &health {
                    health
                        .set_degraded(components::PUBLISHER, format!("batch dropped: {}", e))
                        .await;
                }
                return PublishOutcome::Dropped {
                    readings: batch.len(),
                };
            }
        }
    }
}

/// Builder for creating a driver
pub struct DriverBuilder {
    sink: Option<Arc<dyn Sink>>,
    config: DriverConfig,
    logger: Option<StructuredLogger>,
    health: Option<HealthRegistry>,
}

impl DriverBuilder {
    pub fn new() -> Self {
        Self {
            sink: None,
            config: DriverConfig::default(),
            logger: None,
            health: None,
        }
    }

    pub fn sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: DriverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.config.tick_interval = interval;
        self
    }

    pub fn flush_on_stop(mut self, flush: bool) -> Self {
        self.config.flush_on_stop = flush;
        self
    }

    pub fn generator(mut self, generator: GeneratorConfig) -> Self {
        self.config.generator = generator;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.config.stop_timeout = timeout;
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn build(self) -> Result<Driver> {
        let sink = self
            .sink
            .ok_or_else(|| anyhow::anyhow!("Sink is required"))?;
        anyhow::ensure!(
            !self.config.tick_interval.is_zero(),
            "tick interval must be greater than zero"
        );
        let accumulator = BatchAccumulator::new(self.config.batch_size)?;
        let generator = ReadingGenerator::new(&self.config.generator);

        Ok(Driver {
            sink,
            config: self.config,
            accumulator,
            generator,
            logger: self.logger.unwrap_or_else(|| StructuredLogger::new("device")),
            health: self.health,
        })
    }
}

impl Default for DriverBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConnectError, SendError};
    use crate::models::{Ack, TelemetryRecord};
    use crate::sinks::{async_trait, Connection, HttpSink, HttpSinkConfig};
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Mock sink recording every payload; fails the first `fail_first` sends
    #[derive(Default)]
    struct MockSink {
        payloads: Arc<Mutex<Vec<Vec<TelemetryRecord>>>>,
        attempts: Arc<AtomicUsize>,
        fail_first: usize,
        refuse_connect: bool,
    }

    struct MockConnection {
        payloads: Arc<Mutex<Vec<Vec<TelemetryRecord>>>>,
        attempts: Arc<AtomicUsize>,
        fail_first: usize,
    }

    #[async_trait]
    impl Sink for MockSink {
        fn name(&self) -> &str {
            "mock"
        }

        async fn connect(&self) -> Result<Arc<dyn Connection>, ConnectError> {
            if self.refuse_connect {
                return Err(ConnectError::Unavailable("refused".to_string()));
            }
            Ok(Arc::new(MockConnection {
                payloads: self.payloads.clone(),
                attempts: self.attempts.clone(),
                fail_first: self.fail_first,
            }))
        }
    }

    #[async_trait]
    impl Connection for MockConnection {
        async fn send(&self, payload: Bytes) -> Result<Ack, SendError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_first {
                return Err(SendError::Transport("unreachable".to_string()));
            }
            let records = serde_json::from_slice(&payload).unwrap();
            self.payloads.lock().unwrap().push(records);
            Ok(Ack::new(attempt.to_string()))
        }
    }

    fn seeded() -> GeneratorConfig {
        GeneratorConfig {
            seed: Some(1),
            ..Default::default()
        }
    }

    /// Connected loop plus the stop sender that keeps it from seeing a closed channel
    async fn connected(builder: DriverBuilder) -> (ProducerLoop, broadcast::Sender<()>) {
        let (state_tx, _state_rx) = watch::channel(DriverState::Stopped);
        let (stop_tx, stop_rx) = broadcast::channel(1);
        let producer = builder
            .build()
            .unwrap()
            .connect(state_tx, stop_rx)
            .await
            .unwrap();
        (producer, stop_tx)
    }

    /// Temperatures the seeded generator yields for the first `n` ticks
    fn expected_temps(n: usize) -> Vec<f64> {
        let mut generator = ReadingGenerator::new(&seeded());
        (0..n).map(|_| generator.next_reading().temperature).collect()
    }

    #[test]
    fn test_driver_config_default() {
        let config = DriverConfig::default();
        assert_eq!(config.batch_size, 20);
        assert_eq!(config.tick_interval, Duration::from_secs(1));
        assert!(!config.flush_on_stop);
        assert_eq!(config.retry.max_attempts, 1);
        assert_eq!(config.generator.variance_temp, 0.03);
        assert_eq!(config.generator.variance_humidity, 0.03);
    }

    #[test]
    fn test_builder_requires_sink() {
        assert!(DriverBuilder::new().build().is_err());
    }

    #[test]
    fn test_builder_rejects_zero_batch_size() {
        let result = DriverBuilder::new()
            .sink(Arc::new(MockSink::default()))
            .batch_size(0)
            .build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_seven_ticks_with_flush_on_stop() {
        let sink = MockSink::default();
        let payloads = sink.payloads.clone();
        let (mut producer, _stop) = connected(
            DriverBuilder::new()
                .sink(Arc::new(sink))
                .batch_size(3)
                .flush_on_stop(true)
                .generator(seeded()),
        )
        .await;

        for _ in 0..7 {
            producer.tick().await;
        }
        assert_eq!(producer.accumulator.len(), 1);

        let report = producer.shutdown().await;
        assert_eq!(report.readings_generated, 7);
        assert_eq!(report.batches_published, 3);
        assert_eq!(report.readings_discarded, 0);

        let payloads = payloads.lock().unwrap();
        let sizes: Vec<usize> = payloads.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 1]);

        let temps: Vec<f64> = payloads.iter().flatten().map(|r| r.temp).collect();
        assert_eq!(temps, expected_temps(7));
    }

    #[tokio::test]
    async fn test_partial_batch_discarded_without_flush_on_stop() {
        let sink = MockSink::default();
        let payloads = sink.payloads.clone();
        let (mut producer, _stop) = connected(
            DriverBuilder::new()
                .sink(Arc::new(sink))
                .batch_size(3)
                .generator(seeded()),
        )
        .await;

        let metrics = TelemetryMetrics::new();
        let discarded_before = metrics.readings_discarded();

        for _ in 0..7 {
            producer.tick().await;
        }
        let report = producer.shutdown().await;

        assert_eq!(report.batches_published, 2);
        assert_eq!(report.readings_discarded, 1);
        // A discard is not a dropped batch, in the report or in metrics
        assert_eq!(report.batches_dropped, 0);
        assert!(metrics.readings_discarded() > discarded_before);
        assert_eq!(payloads.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_policy_recovers_batch() {
        let sink = MockSink {
            fail_first: 2,
            ..Default::default()
        };
        let payloads = sink.payloads.clone();
        let attempts = sink.attempts.clone();
        let (mut producer, _stop) = connected(
            DriverBuilder::new()
                .sink(Arc::new(sink))
                .batch_size(2)
                .retry(RetryPolicy {
                    max_attempts: 3,
                    backoff: Duration::from_millis(100),
                }),
        )
        .await;

        producer.tick().await;
        producer.tick().await;
        let report = producer.shutdown().await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(report.batches_published, 1);
        assert_eq!(report.batches_dropped, 0);
        assert_eq!(payloads.lock().unwrap()[0].len(), 2);
    }

    #[tokio::test]
    async fn test_failed_publish_is_dropped_and_loop_continues() {
        let sink = MockSink {
            fail_first: 1,
            ..Default::default()
        };
        let payloads = sink.payloads.clone();
        let health = HealthRegistry::new();
        let (mut producer, _stop) = connected(
            DriverBuilder::new()
                .sink(Arc::new(sink))
                .batch_size(2)
                .health(health.clone()),
        )
        .await;

        for _ in 0..4 {
            producer.tick().await;
        }
        let report = producer.shutdown().await;

        assert_eq!(report.batches_dropped, 1);
        assert_eq!(report.readings_dropped, 2);
        assert_eq!(report.batches_published, 1);
        assert_eq!(payloads.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_never_ticks() {
        let sink = MockSink {
            refuse_connect: true,
            ..Default::default()
        };
        let attempts = sink.attempts.clone();
        let driver = DriverBuilder::new().sink(Arc::new(sink)).build().unwrap();

        let result = driver.start().await;

        assert!(matches!(result, Err(DriverError::Connect(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unreachable_http_ingress_keeps_driver_stopped() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/ingest", listener.local_addr().unwrap());
        drop(listener);

        let sink = HttpSink::new(HttpSinkConfig::new(&url)).unwrap();
        let build = || DriverBuilder::new().sink(Arc::new(sink.clone())).build().unwrap();

        let (state_tx, state_rx) = watch::channel(DriverState::Stopped);
        let (_stop_tx, stop_rx) = broadcast::channel(1);
        let result = build().connect(state_tx, stop_rx).await;
        assert!(matches!(result, Err(DriverError::Connect(ConnectError::Unavailable(_)))));
        assert_eq!(*state_rx.borrow(), DriverState::Stopped);

        assert!(matches!(build().start().await, Err(DriverError::Connect(_))));
    }
}
