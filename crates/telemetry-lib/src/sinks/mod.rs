//! Sink capabilities for both halves of the forwarder
//!
//! The producer side connects to a [`Sink`] once and then sends serialized
//! batches through the returned [`Connection`]. The forwarder side sends one
//! element at a time to a [`DownstreamSink`]. Transports live behind these
//! traits so the core never depends on a particular broker.

mod channel;
mod http;
mod log;

pub use channel::{ChannelConnection, ChannelSink};
pub use http::{HttpSink, HttpSinkConfig};
pub use log::LogSink;

use crate::error::{ConnectError, SendError};
use crate::models::Ack;
use bytes::Bytes;
use std::sync::Arc;

pub use async_trait::async_trait;

/// Upstream sink that batches are published to
#[async_trait]
pub trait Sink: Send + Sync {
    /// Sink name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Establish a connection used for all subsequent sends
    async fn connect(&self) -> Result<Arc<dyn Connection>, ConnectError>;
}

/// Established upstream connection
#[async_trait]
pub trait Connection: Send + Sync {
    /// Deliver one serialized batch
    async fn send(&self, payload: Bytes) -> Result<Ack, SendError>;
}

/// Downstream sink that receives individual forwarded elements
#[async_trait]
pub trait DownstreamSink: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, element: &serde_json::Value) -> Result<Ack, SendError>;
}
