//! Transport seam between gateway adapters and their processors.
//!
//! Adapters only build vendor-shaped requests and parse vendor-shaped
//! responses; whether the bytes travel over HTTP or come from the
//! simulated processor is decided here. Swapping the simulation for the
//! live client never touches the adapter's mapping logic.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Default deadline for a processor round trip. A timeout is surfaced
/// as a failed payment response, never a hanging call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Test-card prefixes honored by the simulated processors. Anything
/// else with a syntactically valid number declines.
pub fn test_card_approves(number: &str) -> bool {
    number.starts_with("4580") || number.starts_with("4111")
}

/// Outbound request in the vendor's encoding.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub url: String,
    pub body: TransportBody,
}

#[derive(Debug, Clone)]
pub enum TransportBody {
    /// application/x-www-form-urlencoded key/value pairs.
    Form(Vec<(String, String)>),
    /// application/json document.
    Json(serde_json::Value),
}

impl TransportRequest {
    /// Look up a form field by name. None for JSON bodies.
    pub fn form_field(&self, name: &str) -> Option<&str> {
        match &self.body {
            TransportBody::Form(fields) => fields
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str()),
            TransportBody::Json(_) => None,
        }
    }

    /// Look up a top-level JSON string field. None for form bodies.
    pub fn json_field(&self, name: &str) -> Option<&str> {
        match &self.body {
            TransportBody::Json(value) => value.get(name).and_then(|v| v.as_str()),
            TransportBody::Form(_) => None,
        }
    }
}

/// Raw processor reply.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

#[async_trait]
pub trait GatewayTransport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse>;
}

/// Live HTTP client with a per-request deadline.
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl GatewayTransport for HttpTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
        let builder = match &request.body {
            TransportBody::Form(fields) => self.client.post(&request.url).form(fields),
            TransportBody::Json(value) => self.client.post(&request.url).json(value),
        };

        let response = builder
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| anyhow!("processor request failed: {}", e))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| anyhow!("processor response unreadable: {}", e))?;

        Ok(TransportResponse { status, body })
    }
}

/// In-process stand-in for a processor. Each adapter supplies a
/// responder that answers in its vendor's wire shape.
pub struct SimulatedTransport {
    respond: Box<dyn Fn(&TransportRequest) -> TransportResponse + Send + Sync>,
}

impl SimulatedTransport {
    pub fn new<F>(respond: F) -> Self
    where
        F: Fn(&TransportRequest) -> TransportResponse + Send + Sync + 'static,
    {
        Self {
            respond: Box::new(respond),
        }
    }
}

#[async_trait]
impl GatewayTransport for SimulatedTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
        Ok((self.respond)(&request))
    }
}
