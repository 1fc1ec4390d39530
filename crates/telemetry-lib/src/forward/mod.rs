//! Consumer side: fan inbound batches out to a downstream sink
//!
//! This module provides:
//! - Shape validation of inbound batches
//! - Per-element republishing with failure isolation
//! - An ingestion worker that feeds channel payloads to the forwarder

mod forwarder;
mod worker;


pub use forwarder::{
    validate_batch, BatchForwarder, ForwardContext, ForwardReport, ForwarderConfig,
    REQUIRED_FIELDS,
};
pub use worker::{IngestionStats, IngestionWorker};
