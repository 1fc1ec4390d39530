//! Ingestion worker
//!
//! Plays the role of the message-ingestion runtime: receives raw batch
//! payloads from a channel and invokes the forwarder once per payload,
//! in arrival order.

use super::{BatchForwarder, ForwardContext};
use crate::error::ShapeError;
use crate::health::{components, HealthRegistry};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Counters for the ingestion worker
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestionStats {
    pub payloads_received: u64,
    pub batches_accepted: u64,
    pub batches_rejected: u64,
    pub elements_sent: u64,
    pub elements_failed: u64,
    pub defects: u64,
}

pub struct IngestionWorker {
    receiver: mpsc::Receiver<Bytes>,
    forwarder: Arc<BatchForwarder>,
    stats: IngestionStats,
    health: Option<HealthRegistry>,
}

impl IngestionWorker {
    pub fn new(receiver: mpsc::Receiver<Bytes>, forwarder: Arc<BatchForwarder>) -> Self {
        Self {
            receiver,
            forwarder,
            stats: IngestionStats::default(),
            health: None,
        }
    }

    /// Report forwarder and downstream health into `health`
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Run until every sender of the channel is dropped
    pub async fn run(mut self) -> IngestionStats {
        info!("Starting ingestion worker");
        if let Some(health) = self.health.clone() {
            health.register(components::FORWARDER).await;
            health.register(components::DOWNSTREAM).await;
        }

        while let Some(payload) = self.receiver.recv().await {
            self.handle(payload).await;
        }

        let stats = self.stats;
        info!(
            payloads = stats.payloads_received,
            accepted = stats.batches_accepted,
            rejected = stats.batches_rejected,
            sent = stats.elements_sent,
            failed = stats.elements_failed,
            "Ingestion channel closed, worker exiting"
        );
        stats
    }

    async fn handle(&mut self, payload: Bytes) {
        let ctx = ForwardContext::next();
        self.stats.payloads_received += 1;

        let raw: serde_json::Value = match serde_json::from_slice(&payload) {
            Ok(value) => value,
            Err(e) => {
                self.forwarder
                    .reject(&ctx, &ShapeError::Malformed(e.to_string()));
                self.stats.batches_rejected += 1;
                return;
            }
        };

        // Owned handles only across the awaits below
        let forwarder = Arc::clone(&self.forwarder);
        let health = self.health.clone();

        match forwarder.forward(&ctx, &raw).await {
            Ok(outcomes) if outcomes.is_empty() => {
                self.stats.batches_rejected += 1;
            }
            Ok(outcomes) => {
                let total = outcomes.len();
                let sent = outcomes.iter().filter(|o| o.sent).count() as u64;
                let failed = total as u64 - sent;
                debug!(
                    invocation = %ctx.invocation_id(),
                    sent = sent,
                    failed = failed,
                    "Inbound batch forwarded"
                );

                self.stats.batches_accepted += 1;
                self.stats.elements_sent += sent;
                self.stats.elements_failed += failed;

                if let Some(health) = health {
                    if failed > 0 {
                        let message = format!("{} of {} elements failed", failed, total);
                        health.set_degraded(components::DOWNSTREAM, message).await;
                    } else {
                        health.set_healthy(components::DOWNSTREAM).await;
                    }
                }
            }
            Err(e) => {
                // The runtime owns redelivery; record the defect and keep consuming
                error!(invocation = %ctx.invocation_id(), error = %e, "Forwarder defect");
                self.stats.defects += 1;
                if let Some(health) = health {
                    health
                        .set_unhealthy(components::FORWARDER, e.to_string())
                        .await;
                }
            }
        }
    }
}
