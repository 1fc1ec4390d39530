//! HTTP JSON sink
//!
//! POSTs payloads to a fixed ingress URL. Any 2xx response is an
//! acknowledgment; other statuses become [`SendError::Rejected`].

use super::{async_trait, Connection, DownstreamSink, Sink};
use crate::error::{ConnectError, SendError};
use crate::models::Ack;
use bytes::Bytes;
use reqwest::{header, Client, Response};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Configuration for the HTTP sink
#[derive(Debug, Clone)]
pub struct HttpSinkConfig {
    /// Ingress endpoint that receives the POSTed JSON
    pub endpoint: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl HttpSinkConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Sink that delivers JSON over HTTP
#[derive(Clone)]
pub struct HttpSink {
    client: Client,
    endpoint: Url,
}

impl HttpSink {
    /// Create a new HTTP sink, validating the endpoint up front
    pub fn new(config: HttpSinkConfig) -> Result<Self, ConnectError> {
        let endpoint = Url::parse(&config.endpoint)
            .map_err(|e| ConnectError::invalid_endpoint(&config.endpoint, e.to_string()))?;

        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(ConnectError::invalid_endpoint(
                &config.endpoint,
                format!("unsupported scheme '{}'", endpoint.scheme()),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ConnectError::Client(e.to_string()))?;

        Ok(Self { client, endpoint })
    }

    async fn post(&self, body: Bytes) -> Result<Ack, SendError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        ack_from_response(response).await
    }
}

async fn ack_from_response(response: Response) -> Result<Ack, SendError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(SendError::rejected(status.as_u16(), body));
    }

    let token = response
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| status.as_u16().to_string());

    Ok(Ack::new(token))
}

#[async_trait]
impl Sink for HttpSink {
    fn name(&self) -> &str {
        "http"
    }

    /// Check the ingress answers before any batch is published.
    ///
    /// Any HTTP status counts as reachable; only transport failures fail
    /// the connect. The checked client is then reused for every send.
    async fn connect(&self) -> Result<Arc<dyn Connection>, ConnectError> {
        let response = self
            .client
            .head(self.endpoint.clone())
            .send()
            .await
            .map_err(|e| ConnectError::Unavailable(format!("{}: {}", self.endpoint, e)))?;

        debug!(
            endpoint = %self.endpoint,
            status = response.status().as_u16(),
            "Ingress reachable"
        );
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl Connection for HttpSink {
    async fn send(&self, payload: Bytes) -> Result<Ack, SendError> {
        self.post(payload).await
    }
}

#[async_trait]
impl DownstreamSink for HttpSink {
    fn name(&self) -> &str {
        "http"
    }

    async fn send(&self, element: &serde_json::Value) -> Result<Ack, SendError> {
        let body = serde_json::to_vec(element).map_err(|e| SendError::Encode(e.to_string()))?;
        self.post(Bytes::from(body)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// URL on a local port that nothing listens on
    fn closed_port_url() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("http://127.0.0.1:{}/ingest", port)
    }

    #[test]
    fn test_rejects_invalid_endpoint() {
        let result = HttpSink::new(HttpSinkConfig::new("not a url"));
        assert!(matches!(result, Err(ConnectError::InvalidEndpoint { .. })));

        let result = HttpSink::new(HttpSinkConfig::new("ftp://example.com/ingest"));
        assert!(matches!(result, Err(ConnectError::InvalidEndpoint { .. })));
    }

    #[tokio::test]
    async fn test_connect_fails_when_ingress_unreachable() {
        let sink = HttpSink::new(HttpSinkConfig::new(closed_port_url())).unwrap();

        assert!(matches!(
            sink.connect().await,
            Err(ConnectError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_batch_post_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/ingest")
            .match_header("content-type", "application/json")
            .match_body("[{\"epoch\":1}]")
            .with_status(202)
            .with_header("x-request-id", "req-1")
            .create_async()
            .await;

        let sink = HttpSink::new(HttpSinkConfig::new(format!("{}/ingest", server.url()))).unwrap();
        let conn = sink.connect().await.unwrap();
        let ack = conn
            .send(Bytes::from_static(b"[{\"epoch\":1}]"))
            .await
            .unwrap();

        assert_eq!(ack.token(), "req-1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_success_status_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/events")
            .with_status(503)
            .with_body("throttled")
            .create_async()
            .await;

        let sink = HttpSink::new(HttpSinkConfig::new(format!("{}/events", server.url()))).unwrap();
        let err = DownstreamSink::send(&sink, &json!({"timestamp": "t1", "epoch": 1}))
            .await
            .unwrap_err();

        assert_eq!(err, SendError::rejected(503, "throttled"));
    }
}
