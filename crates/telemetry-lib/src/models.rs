//! Core data models for the telemetry forwarder

use crate::error::SendError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Default maximum number of readings per batch
pub const DEFAULT_BATCH_SIZE: usize = 20;

/// A single synthetic sensor reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    pub temperature: f64,
    pub humidity: f64,
}

impl Reading {
    pub fn new(timestamp: DateTime<Utc>, temperature: f64, humidity: f64) -> Self {
        Self {
            timestamp,
            temperature,
            humidity,
        }
    }

    /// Whole seconds since the Unix epoch, floored
    pub fn epoch(&self) -> i64 {
        self.timestamp.timestamp()
    }

    /// Convert to the flat wire record consumed by the forwarder
    pub fn to_record(&self) -> TelemetryRecord {
        TelemetryRecord {
            timestamp: self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            epoch: self.epoch(),
            temp: self.temperature,
            humidity: self.humidity,
        }
    }
}

/// Wire representation of a reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub timestamp: String,
    pub epoch: i64,
    pub temp: f64,
    pub humidity: f64,
}

/// Ordered, immutable group of readings flushed as a unit
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    readings: Vec<Reading>,
}

impl Batch {
    pub(crate) fn from_readings(readings: Vec<Reading>) -> Self {
        Self { readings }
    }

    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Encode as a JSON array of [`TelemetryRecord`]s
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        let records: Vec<TelemetryRecord> = self.readings.iter().map(Reading::to_record).collect();
        serde_json::to_vec(&records)
    }
}

/// Opaque acknowledgment returned by a sink on success
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ack(String);

impl Ack {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn token(&self) -> &str {
        &self.0
    }
}

/// Result of forwarding one element of an inbound batch
#[derive(Debug, Clone)]
pub struct ForwardOutcome {
    /// Position of the element in the inbound batch
    pub index: usize,
    pub element: serde_json::Value,
    pub sent: bool,
    pub error: Option<SendError>,
}

impl ForwardOutcome {
    pub fn sent(index: usize, element: serde_json::Value) -> Self {
        Self {
            index,
            element,
            sent: true,
            error: None,
        }
    }

    pub fn failed(index: usize, element: serde_json::Value, error: SendError) -> Self {
        Self {
            index,
            element,
            sent: false,
            error: Some(error),
        }
    }
}
