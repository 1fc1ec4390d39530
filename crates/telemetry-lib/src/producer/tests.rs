//! Integration tests for the producer driver
//!
//! These tests run the real tick loop on paused tokio time and verify:
//! - State transitions across start and stop
//! - Batches reach the sink in order, with a final flush on stop
//! - Stop waits for a slow in-flight publish, bounded by the stop timeout
//! - Dropping the handle runs the same stop path

use super::*;
use crate::error::{ConnectError, SendError};
use crate::models::{Ack, TelemetryRecord};
use crate::sinks::{async_trait, ChannelSink, Connection, Sink};
use bytes::Bytes;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Sink whose sends take a fixed amount of (virtual) time
struct SlowSink {
    delay: Duration,
    received: Arc<Mutex<Vec<usize>>>,
}

struct SlowConnection {
    delay: Duration,
    received: Arc<Mutex<Vec<usize>>>,
}

#[async_trait]
impl Sink for SlowSink {
    fn name(&self) -> &str {
        "slow"
    }

    async fn connect(&self) -> Result<Arc<dyn Connection>, ConnectError> {
        Ok(Arc::new(SlowConnection {
            delay: self.delay,
            received: self.received.clone(),
        }))
    }
}

#[async_trait]
impl Connection for SlowConnection {
    async fn send(&self, payload: Bytes) -> Result<Ack, SendError> {
        tokio::time::sleep(self.delay).await;
        let records: Vec<TelemetryRecord> = serde_json::from_slice(&payload).unwrap();
        self.received.lock().unwrap().push(records.len());
        Ok(Ack::default())
    }
}

mod lifecycle_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_start_tick_and_stop_with_flush() {
        let (sink, mut rx) = ChannelSink::new(16);
        let driver = DriverBuilder::new()
            .sink(Arc::new(sink))
            .batch_size(3)
            .tick_interval(Duration::from_secs(1))
            .flush_on_stop(true)
            .build()
            .unwrap();

        let handle = driver.start().await.unwrap();
        assert_eq!(handle.state(), DriverState::Running);

        // Ticks fire at 0s, 1s, 2s and 3s
        tokio::time::sleep(Duration::from_millis(3_500)).await;

        let mut state = handle.subscribe_state();
        let report = handle.stop().await.unwrap();
        assert_eq!(*state.borrow_and_update(), DriverState::Stopped);

        let mut sizes = Vec::new();
        while let Ok(payload) = rx.try_recv() {
            let records: Vec<TelemetryRecord> = serde_json::from_slice(&payload).unwrap();
            sizes.push(records.len());
        }

        assert_eq!(report.readings_generated, 4);
        assert_eq!(sizes, vec![3, 1]);
        assert_eq!(report.batches_published, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_waits_for_in_flight_publish() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let driver = DriverBuilder::new()
            .sink(Arc::new(SlowSink {
                delay: Duration::from_secs(2),
                received: received.clone(),
            }))
            .batch_size(1)
            .tick_interval(Duration::from_secs(10))
            .stop_timeout(Duration::from_secs(5))
            .build()
            .unwrap();

        let handle = driver.start().await.unwrap();
        // First tick flushes immediately; its publish needs 2s
        tokio::time::sleep(Duration::from_millis(100)).await;
        let report = handle.stop().await.unwrap();

        assert_eq!(report.batches_published, 1);
        assert_eq!(*received.lock().unwrap(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_timeout_aborts_stuck_publish() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let driver = DriverBuilder::new()
            .sink(Arc::new(SlowSink {
                delay: Duration::from_secs(60),
                received: received.clone(),
            }))
            .batch_size(1)
            .tick_interval(Duration::from_secs(10))
            .stop_timeout(Duration::from_secs(1))
            .build()
            .unwrap();

        let handle = driver.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let report = handle.stop().await.unwrap();

        assert_eq!(report.batches_published, 0);
        assert_eq!(report.batches_dropped, 1);
        assert_eq!(report.readings_dropped, 1);
        assert!(received.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_bounded_while_next_batch_waits_on_publish() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let driver = DriverBuilder::new()
            .sink(Arc::new(SlowSink {
                delay: Duration::from_secs(3600),
                received: received.clone(),
            }))
            .batch_size(1)
            .tick_interval(Duration::from_secs(1))
            .stop_timeout(Duration::from_secs(1))
            .build()
            .unwrap();

        let handle = driver.start().await.unwrap();
        // Tick at 0s starts the stuck publish; the tick at 1s flushes a second
        // batch that has to wait for it
        tokio::time::sleep(Duration::from_millis(1_500)).await;

        let started = Instant::now();
        let report = handle.stop().await.unwrap();
        let waited = started.elapsed();

        assert!(
            waited <= Duration::from_secs(2),
            "stop took {waited:?} with a 1s stop timeout"
        );
        assert_eq!(report.readings_generated, 2);
        assert_eq!(report.batches_published, 0);
        assert_eq!(report.batches_dropped, 1);
        assert_eq!(report.readings_discarded, 1);
        assert!(received.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_stops_and_flushes() {
        let (sink, mut rx) = ChannelSink::new(16);
        let handle = DriverBuilder::new()
            .sink(Arc::new(sink))
            .batch_size(3)
            .tick_interval(Duration::from_secs(1))
            .flush_on_stop(true)
            .build()
            .unwrap()
            .start()
            .await
            .unwrap();

        // Ticks at 0s and 1s leave a partial batch of two
        tokio::time::sleep(Duration::from_millis(1_500)).await;

        let mut state = handle.subscribe_state();
        drop(handle);
        state
            .wait_for(|s| *s == DriverState::Stopped)
            .await
            .unwrap();

        let payload = rx.try_recv().unwrap();
        let records: Vec<TelemetryRecord> = serde_json::from_slice(&payload).unwrap();
        assert_eq!(records.len(), 2);
        assert!(rx.try_recv().is_err());
    }
}
