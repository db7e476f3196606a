//! nettools
//!
//! Capturing TCP proxy driven over stdio.
//!
//! This service:
//! - Serves `start_proxy`, `get_proxy_output`, `stop_proxy` and `list_proxies`
//!   as MCP tools on stdin/stdout
//! - Relays each client connection to its forward target
//! - Records every relayed chunk with a hex dump and a protocol guess
//! - Stops all proxies when input closes or on Ctrl-C

use std::sync::Arc;

use anyhow::Result;
use tokio::io::BufReader;
use tracing::{error, info};

use nettools_proxy::{logging, Config, McpServer, ProxyRegistry, ProxyTools, ToolDefaults};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    logging::init(&config)?;

    info!(
        bind_ip = %config.bind_ip,
        default_forward_host = %config.default_forward_host,
        default_capture_limit = config.default_capture_limit,
        dial_timeout_ms = config.dial_timeout.as_millis() as u64,
        "Starting nettools"
    );

    let registry = Arc::new(ProxyRegistry::new(config.proxy_options()));
    let tools = ProxyTools::new(Arc::clone(&registry), ToolDefaults::from(&config));
    let server = McpServer::new(tools);

    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();

    tokio::select! {
        result = server.serve(stdin, stdout) => {
            if let Err(e) = result {
                error!(error = %e, "Tool server failed");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl-C");
        }
    }

    let stopped = registry.len().await;
    registry.stop_all().await;
    info!(stopped, "Shutdown complete");

    Ok(())
}
