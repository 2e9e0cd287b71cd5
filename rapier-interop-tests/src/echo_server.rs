// Echo server
// Answers every request with a JSON description of what it received:
// method, path, query, body and headers. A `code` parameter in the query or
// the JSON body selects the response status.

use axum::{
    body::Bytes,
    extract::Query,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::IntoResponse,
    Json, Router,
};
use serde_json::{json, Map, Value};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const HOST_ENV: &str = "RAPIER_ECHO_HOST";
pub const PORT_ENV: &str = "RAPIER_ECHO_PORT";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for EchoServerConfig {
    fn default() -> Self {
        EchoServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8181,
        }
    }
}

impl EchoServerConfig {
    /// Bind to any free port on the loopback interface
    pub fn ephemeral() -> Self {
        EchoServerConfig {
            port: 0,
            ..Self::default()
        }
    }

    /// Defaults overridden by `RAPIER_ECHO_HOST` and `RAPIER_ECHO_PORT`
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();
        if let Ok(host) = std::env::var(HOST_ENV) {
            config.host = host;
        }
        if let Ok(port) = std::env::var(PORT_ENV) {
            config.port = port
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid {} '{}': {}", PORT_ENV, port, e))?;
        }
        Ok(config)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

pub fn router() -> Router {
    Router::new().fallback(echo)
}

/// A running echo server; stopped when dropped
#[derive(Debug)]
pub struct EchoServer {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl EchoServer {
    pub async fn start(config: &EchoServerConfig) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(config.addr()).await?;
        let addr = listener.local_addr()?;
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router()).await {
                warn!("Echo server stopped: {}", e);
            }
        });
        info!("Echo server listening on {}", addr);
        Ok(EchoServer { addr, handle })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL with a trailing slash, e.g. `http://127.0.0.1:8181/`
    pub fn base_url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    pub fn shutdown(self) {
        self.handle.abort();
    }
}

impl Drop for EchoServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Serve until the process exits
pub async fn run(config: &EchoServerConfig) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.addr()).await?;
    info!("Echo server listening on {}", listener.local_addr()?);
    axum::serve(listener, router()).await?;
    Ok(())
}

async fn echo(
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(pairs): Query<Vec<(String, String)>>,
    body: Bytes,
) -> impl IntoResponse {
    let query = collect_query(pairs);
    let body = decode_body(&body);
    let status = requested_status(&query, &body);

    let headers: Map<String, Value> = headers
        .iter()
        .filter_map(|(name, value)| {
            let value = value.to_str().ok()?;
            Some((name.to_string(), Value::String(value.to_string())))
        })
        .collect();

    debug!("{} {} -> {}", method, uri.path(), status.as_u16());
    let echoed = json!({
        "method": method.as_str(),
        "path": uri.path(),
        "query": query,
        "body": body,
        "headers": headers,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });
    (status, Json(echoed))
}

/// Repeated keys collect into an array
fn collect_query(pairs: Vec<(String, String)>) -> Map<String, Value> {
    let mut query = Map::new();
    for (key, value) in pairs {
        match query.get_mut(&key) {
            Some(Value::Array(items)) => items.push(Value::String(value)),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(value)]);
            }
            None => {
                query.insert(key, Value::String(value));
            }
        }
    }
    query
}

fn decode_body(body: &Bytes) -> Value {
    if body.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

fn requested_status(query: &Map<String, Value>, body: &Value) -> StatusCode {
    let code = query
        .get("code")
        .or_else(|| body.get("code"))
        .and_then(|code| match code {
            Value::String(s) => s.parse::<u16>().ok(),
            Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
            _ => None,
        });
    code.and_then(|code| StatusCode::from_u16(code).ok())
        .unwrap_or(StatusCode::OK)
}
