//! Downstream sink that only writes forwarded elements to the log

use super::{async_trait, DownstreamSink};
use crate::error::SendError;
use crate::models::Ack;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Logs every element it receives; never fails
#[derive(Default)]
pub struct LogSink {
    count: AtomicU64,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of elements logged so far
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DownstreamSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, element: &serde_json::Value) -> Result<Ack, SendError> {
        let seq = self.count.fetch_add(1, Ordering::Relaxed);
        info!(seq = seq, element = %element, "Forwarded element");
        Ok(Ack::new(seq.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_log_sink_acks_in_sequence() {
        let sink = LogSink::new();

        let first = sink.send(&json!({"epoch": 1})).await.unwrap();
        let second = sink.send(&json!({"epoch": 2})).await.unwrap();

        assert_eq!(first.token(), "0");
        assert_eq!(second.token(), "1");
        assert_eq!(sink.count(), 2);
    }
}
