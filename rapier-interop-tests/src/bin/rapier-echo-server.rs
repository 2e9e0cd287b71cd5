//! Standalone echo server for exercising rapier clients by hand.
//!
//! Listens on `RAPIER_ECHO_HOST`:`RAPIER_ECHO_PORT` (default
//! `127.0.0.1:8181`). Set `RAPIER_LOG_DIR` to also log to rotating files.

use anyhow::Result;
use rapier_interop_tests::echo_server::{self, EchoServerConfig};
use rapier_interop_tests::init_logging;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    match std::env::var("RAPIER_LOG_DIR") {
        Ok(dir) => init_logging(dir, "rapier-echo-server")?,
        Err(_) => tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_target(false)
            .init(),
    }

    let config = EchoServerConfig::from_env()?;
    info!("Starting echo server on http://{}/", config.addr());

    if let Err(e) = echo_server::run(&config).await {
        error!("Echo server error: {}", e);
        std::process::exit(1);
    }
    Ok(())
}
