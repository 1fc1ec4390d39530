//! Batch publisher
//!
//! Encodes a batch to the wire format and hands it to the upstream
//! connection. One call is one attempt; retries belong to the driver.

use crate::error::SendError;
use crate::models::{Ack, Batch};
use crate::observability::TelemetryMetrics;
use crate::sinks::Connection;
use bytes::Bytes;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

#[derive(Clone)]
pub struct Publisher {
    connection: Arc<dyn Connection>,
    metrics: TelemetryMetrics,
}

impl Publisher {
    pub fn new(connection: Arc<dyn Connection>) -> Self {
        Self {
            connection,
            metrics: TelemetryMetrics::new(),
        }
    }

    /// Send a batch once. The batch is only borrowed, so a failed attempt
    /// leaves it intact for the caller to retry.
    pub async fn publish(&self, batch: &Batch) -> Result<Ack, SendError> {
        let payload = batch
            .encode()
            .map_err(|e| SendError::Encode(e.to_string()))?;

        let start = Instant::now();
        let result = self.connection.send(Bytes::from(payload)).await;
        self.metrics
            .observe_publish_latency(start.elapsed().as_secs_f64());

        match &result {
            Ok(ack) => {
                self.metrics.inc_batches_published();
                debug!(readings = batch.len(), ack = %ack.token(), "Publish attempt succeeded");
            }
            Err(e) => {
                self.metrics.inc_publish_failures();
                debug!(readings = batch.len(), error = %e, "Publish attempt failed");
            }
        }

        result
    }
}
