use async_trait::async_trait;
use http::Method;
use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Request timed out: {0}")]
    Timeout(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Codec error: {0}")]
    Codec(String),
}

/// A fully resolved request handed to a [`Transport`].
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: IndexMap<String, String>,
    pub query: Map<String, Value>,
    pub body: Option<Value>,
}

impl TransportRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: IndexMap::new(),
            query: Map::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_query(mut self, query: Map<String, Value>) -> Self {
        self.query = query;
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Flatten the query record into string pairs.
    ///
    /// Scalars are rendered without JSON quoting, arrays repeat the key once
    /// per element and nested objects are sent as compact JSON.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::with_capacity(self.query.len());
        for (key, value) in &self.query {
            match value {
                Value::Null => {}
                Value::Array(items) => {
                    for item in items {
                        pairs.push((key.clone(), query_scalar(item)));
                    }
                }
                other => pairs.push((key.clone(), query_scalar(other))),
            }
        }
        pairs
    }

    /// JSON description of this request, echoed back to callers as `request`.
    pub fn describe(&self) -> Value {
        json!({
            "method": self.method.as_str(),
            "url": self.url,
            "headers": self.headers,
            "query": self.query,
            "body": self.body,
        })
    }
}

fn query_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// What came back from the remote side.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Value,
}

impl TransportResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn ok(body: Value) -> Self {
        Self::new(200, body)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends a resolved request and reports the status and body.
///
/// Implementations never interpret the body beyond decoding it; a non-success
/// status is a valid `Ok` response, only transport-level failures are `Err`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_pairs_flatten_values() {
        let mut query = Map::new();
        query.insert("name".into(), json!("rapier"));
        query.insert("flag".into(), json!(true));
        query.insert("ids".into(), json!([1, 2]));
        query.insert("skip".into(), Value::Null);
        query.insert("filter".into(), json!({"a": 1}));

        let request = TransportRequest::new(Method::GET, "http://h/a").with_query(query);
        let pairs = request.query_pairs();

        assert_eq!(
            pairs,
            vec![
                ("name".to_string(), "rapier".to_string()),
                ("flag".to_string(), "true".to_string()),
                ("ids".to_string(), "1".to_string()),
                ("ids".to_string(), "2".to_string()),
                ("filter".to_string(), "{\"a\":1}".to_string()),
            ]
        );
    }

    #[test]
    fn test_describe_echoes_request() {
        let request = TransportRequest::new(Method::POST, "http://h/a/1")
            .with_header("x-token", "abc")
            .with_body(json!({"x": true}));

        let described = request.describe();
        assert_eq!(described["method"], "POST");
        assert_eq!(described["url"], "http://h/a/1");
        assert_eq!(described["headers"]["x-token"], "abc");
        assert_eq!(described["body"], json!({"x": true}));
    }

    #[test]
    fn test_response_success_range() {
        assert!(TransportResponse::ok(Value::Null).is_success());
        assert!(TransportResponse::new(299, Value::Null).is_success());
        assert!(!TransportResponse::new(199, Value::Null).is_success());
        assert!(!TransportResponse::new(404, Value::Null).is_success());
    }
}
