//! In-process sink backed by a tokio channel
//!
//! Used to hand published batches to an [`IngestionWorker`](crate::forward::IngestionWorker)
//! running in the same process.

use super::{async_trait, Connection, Sink};
use crate::error::{ConnectError, SendError};
use crate::models::Ack;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Sink that forwards payloads into an mpsc channel
pub struct ChannelSink {
    sender: mpsc::Sender<Bytes>,
}

impl ChannelSink {
    /// Create a new channel sink and the receiving end for the consumer
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl Sink for ChannelSink {
    fn name(&self) -> &str {
        "channel"
    }

    async fn connect(&self) -> Result<Arc<dyn Connection>, ConnectError> {
        if self.sender.is_closed() {
            return Err(ConnectError::Unavailable(
                "ingestion channel receiver dropped".to_string(),
            ));
        }

        Ok(Arc::new(ChannelConnection {
            sender: self.sender.clone(),
            sequence: AtomicU64::new(0),
        }))
    }
}

/// Connection handle returned by [`ChannelSink::connect`]
pub struct ChannelConnection {
    sender: mpsc::Sender<Bytes>,
    sequence: AtomicU64,
}

#[async_trait]
impl Connection for ChannelConnection {
    async fn send(&self, payload: Bytes) -> Result<Ack, SendError> {
        // Waits while the channel is full
        self.sender
            .send(payload)
            .await
            .map_err(|_| SendError::Closed)?;

        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        Ok(Ack::new(format!("channel-{}", seq)))
    }
}
