//! Batching telemetry forwarder
//!
//! This crate provides the core functionality for:
//! - Synthetic sensor reading generation
//! - Size-triggered batching and publishing to an upstream sink
//! - Fan-out of inbound batches to a downstream sink with per-element isolation
//! - Health checks and observability

pub mod error;
pub mod forward;
pub mod generator;
pub mod health;
pub mod models;
pub mod observability;
pub mod producer;
pub mod sinks;

pub use error::{ConnectError, DriverError, ForwardError, SendError, ShapeError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{StructuredLogger, TelemetryMetrics};
