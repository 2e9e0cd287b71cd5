// HTTP transport backed by reqwest
// Sends resolved requests and decodes response bodies as JSON when possible,
// falling back to a plain string body.

use crate::transport::{Transport, TransportError, TransportRequest, TransportResponse};
use async_trait::async_trait;
use indexmap::IndexMap;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, trace};

/// HTTP transport configuration. Missing fields take their defaults when
/// deserialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HttpConfig {
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
    /// User agent sent with every request
    pub user_agent: String,
    /// Headers added to every request; per-request headers win on conflict
    pub default_headers: IndexMap<String, String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30000,
            user_agent: concat!("rapier/", env!("CARGO_PKG_VERSION")).to_string(),
            default_headers: IndexMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    config: HttpConfig,
    http_client: HttpClient,
}

impl HttpTransport {
    /// Create a new transport with the given configuration
    pub fn new(config: HttpConfig) -> Result<Self, TransportError> {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| TransportError::Connection(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        debug!("Sending {} request to {}", request.method, request.url);

        let mut builder = self
            .http_client
            .request(request.method.clone(), &request.url);

        for (name, value) in self.config.default_headers.iter() {
            if !request.headers.contains_key(name) {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        for (name, value) in request.headers.iter() {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let pairs = request.query_pairs();
        if !pairs.is_empty() {
            builder = builder.query(&pairs);
        }
        if let Some(body) = &request.body {
            trace!("Request body: {}", body);
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::Codec(format!("Failed to read response body: {}", e)))?;

        trace!("Response body: {}", text);
        debug!("Received status {} from {}", status, request.url);

        Ok(TransportResponse::new(status, decode_body(&text)))
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else if err.is_builder() {
        TransportError::InvalidRequest(err.to_string())
    } else {
        TransportError::Connection(err.to_string())
    }
}

fn decode_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}
