//! Batch fan-out forwarder
//!
//! Splits an inbound batch into its elements and republishes each one to a
//! downstream sink. Element failures are recorded in the outcome list and
//! never stop the remaining elements from being attempted.

use crate::error::{ForwardError, ShapeError};
use crate::models::ForwardOutcome;
use crate::observability::{StructuredLogger, TelemetryMetrics};
use crate::sinks::DownstreamSink;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt, TryStreamExt};
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info_span, warn, Instrument};

/// Fields every inbound element must expose
pub const REQUIRED_FIELDS: [&str; 2] = ["timestamp", "epoch"];

static INVOCATION_SEQ: AtomicU64 = AtomicU64::new(0);

/// Per-invocation context supplied by the ingestion runtime
#[derive(Debug, Clone)]
pub struct ForwardContext {
    invocation_id: String,
}

impl ForwardContext {
    pub fn new(invocation_id: impl Into<String>) -> Self {
        Self {
            invocation_id: invocation_id.into(),
        }
    }

    /// Context with a process-unique invocation id
    pub fn next() -> Self {
        let seq = INVOCATION_SEQ.fetch_add(1, Ordering::Relaxed);
        Self::new(format!("inv-{}-{}", chrono::Utc::now().timestamp_millis(), seq))
    }

    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }
}

/// Configuration for the forwarder
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    /// Concurrent downstream sends within one batch (1 = sequential)
    pub max_in_flight: usize,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self { max_in_flight: 1 }
    }
}

/// Result of forwarding several inbound batches in one invocation
#[derive(Debug, Default)]
pub struct ForwardReport {
    /// Outcomes of each accepted batch, in delivery order
    pub batches: Vec<Vec<ForwardOutcome>>,
    pub rejected: usize,
}

impl ForwardReport {
    pub fn sent(&self) -> usize {
        self.batches.iter().flatten().filter(|o| o.sent).count()
    }

    pub fn failed(&self) -> usize {
        self.batches.iter().flatten().filter(|o| !o.sent).count()
    }
}

/// Check the inbound batch shape and return its elements.
///
/// Accepted: a non-empty array whose every element is an object carrying
/// all [`REQUIRED_FIELDS`].
pub fn validate_batch(raw: &Value) -> Result<&[Value], ShapeError> {
    let elements = raw.as_array().ok_or(ShapeError::NotAnArray)?;
    if elements.is_empty() {
        return Err(ShapeError::Empty);
    }

    for (index, element) in elements.iter().enumerate() {
        let object = element
            .as_object()
            .ok_or(ShapeError::NotAnObject { index })?;
        if let Some(field) = REQUIRED_FIELDS.iter().find(|f| !object.contains_key(**f)) {
            return Err(ShapeError::MissingField {
                index,
                field: *field,
            });
        }
    }

    Ok(elements.as_slice())
}

pub struct BatchForwarder {
    sink: Arc<dyn DownstreamSink>,
    config: ForwarderConfig,
    logger: StructuredLogger,
    metrics: TelemetryMetrics,
}

impl BatchForwarder {
    pub fn new(sink: Arc<dyn DownstreamSink>, config: ForwarderConfig) -> Self {
        Self {
            sink,
            config,
            logger: StructuredLogger::new("forwarder"),
            metrics: TelemetryMetrics::new(),
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Forward one inbound batch.
    ///
    /// A malformed batch is logged and yields no outcomes. Only a defect
    /// (a panicking sink) is returned as an error.
    pub async fn forward(
        &self,
        ctx: &ForwardContext,
        raw: &Value,
    ) -> Result<Vec<ForwardOutcome>, ForwardError> {
        let elements = match validate_batch(raw) {
            Ok(elements) => elements,
            Err(shape) => {
                self.reject(ctx, &shape);
                return Ok(Vec::new());
            }
        };

        let span = info_span!(
            "forward",
            invocation = %ctx.invocation_id(),
            elements = elements.len(),
            sink = %self.sink.name()
        );

        // Boxed so the stream's future type stays `Send` for spawned callers
        let sends: Vec<BoxFuture<'_, Result<ForwardOutcome, ForwardError>>> = elements
            .iter()
            .enumerate()
            .map(|(index, element)| self.forward_element(index, element).boxed())
            .collect();

        futures::stream::iter(sends)
            .buffered(self.config.max_in_flight.max(1))
            .try_collect()
            .instrument(span)
            .await
    }

    /// Forward every batch delivered in one runtime invocation, in order
    pub async fn forward_all(
        &self,
        ctx: &ForwardContext,
        messages: &[Value],
    ) -> Result<ForwardReport, ForwardError> {
        let mut report = ForwardReport::default();

        for message in messages {
            let outcomes = self.forward(ctx, message).await?;
            if outcomes.is_empty() {
                report.rejected += 1;
            } else {
                report.batches.push(outcomes);
            }
        }

        Ok(report)
    }

    pub(crate) fn reject(&self, ctx: &ForwardContext, shape: &ShapeError) {
        self.metrics.inc_batches_rejected();
        self.logger
            .log_batch_rejected(ctx.invocation_id(), &shape.to_string());
    }

    async fn forward_element(
        &self,
        index: usize,
        element: &Value,
    ) -> Result<ForwardOutcome, ForwardError> {
        debug!(index = index, element = %element, "Forwarding element");

        let result = AssertUnwindSafe(self.sink.send(element))
            .catch_unwind()
            .await
            .map_err(|panic| ForwardError::Defect {
                index,
                message: panic_message(panic.as_ref()),
            })?;

        Ok(match result {
            Ok(_ack) => {
                self.metrics.inc_elements_forwarded();
                ForwardOutcome::sent(index, element.clone())
            }
            Err(e) => {
                self.metrics.inc_element_failures();
                warn!(index = index, error = %e, "Failed to forward element");
                ForwardOutcome::failed(index, element.clone(), e)
            }
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "downstream sink panicked".to_string()
    }
}
