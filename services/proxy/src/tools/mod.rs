//! Tool adapter over the proxy registry.
//!
//! Each tool takes a JSON argument object and returns a JSON payload.
//! Engine failures (already running, bind failure, unknown port) come back
//! as `{"error": ...}` payloads; only malformed arguments fail the call.

mod args;
mod output;

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::config::Config;
use crate::error::ProxyError;
use crate::proxy::{format_target, ProxyInstance, ProxyRegistry};

pub use args::Args;
pub use output::{
    format_usage, CaptureRecord, ErrorOutput, ListResult, OutputResult, ProxyCaptures,
    ProxyListing, StartOutput, StopOutput,
};

pub const START_PROXY: &str = "start_proxy";
pub const GET_PROXY_OUTPUT: &str = "get_proxy_output";
pub const STOP_PROXY: &str = "stop_proxy";
pub const LIST_PROXIES: &str = "list_proxies";

/// Transport-level tool failures.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Tool metadata advertised to the calling host.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

/// Values applied when a start request leaves an option out.
#[derive(Debug, Clone)]
pub struct ToolDefaults {
    pub forward_host: String,
    pub capture_limit: usize,
}

impl From<&Config> for ToolDefaults {
    fn from(config: &Config) -> Self {
        Self {
            forward_host: config.default_forward_host.clone(),
            capture_limit: config.default_capture_limit,
        }
    }
}

impl Default for ToolDefaults {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// The four proxy tools bound to one registry.
pub struct ProxyTools {
    registry: Arc<ProxyRegistry>,
    defaults: ToolDefaults,
}

impl ProxyTools {
    pub fn new(registry: Arc<ProxyRegistry>, defaults: ToolDefaults) -> Self {
        Self { registry, defaults }
    }

    pub fn registry(&self) -> &Arc<ProxyRegistry> {
        &self.registry
    }

    pub fn definitions() -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: START_PROXY,
                description: "Start a network proxy that captures traffic between a client and server",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "listen_port": {
                            "type": "number",
                            "description": "Port to listen on for incoming connections"
                        },
                        "forward_host": {
                            "type": "string",
                            "description": "Host to forward connections to (default: localhost)"
                        },
                        "forward_port": {
                            "type": "number",
                            "description": "Port to forward connections to"
                        },
                        "capture_limit": {
                            "type": "number",
                            "description": "Maximum bytes to capture (default: 10MB)"
                        }
                    },
                    "required": ["listen_port", "forward_port"]
                }),
            },
            ToolDefinition {
                name: GET_PROXY_OUTPUT,
                description: "Get captured traffic from one or all proxies and optionally clear the buffer",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "listen_port": {
                            "type": "number",
                            "description": "Specific proxy port to get output from (omit for all proxies)"
                        },
                        "clear_buffer": {
                            "type": "boolean",
                            "description": "Whether to clear the buffer after reading (default: true)"
                        }
                    }
                }),
            },
            ToolDefinition {
                name: STOP_PROXY,
                description: "Stop a running proxy",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "listen_port": {
                            "type": "number",
                            "description": "Port of the proxy to stop"
                        }
                    },
                    "required": ["listen_port"]
                }),
            },
            ToolDefinition {
                name: LIST_PROXIES,
                description: "List all running proxies with their status",
                input_schema: json!({
                    "type": "object",
                    "properties": {}
                }),
            },
        ]
    }

    /// Dispatch a tool call by name.
    pub async fn call(&self, name: &str, arguments: Option<&Value>) -> Result<Value, ToolError> {
        let args = args::as_object(arguments)?;
        debug!(tool = name, "Tool call");

        match name {
            START_PROXY => self.start_proxy(&args).await,
            GET_PROXY_OUTPUT => self.get_proxy_output(&args).await,
            STOP_PROXY => self.stop_proxy(&args).await,
            LIST_PROXIES => self.list_proxies().await,
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }

    pub async fn start_proxy(&self, args: &Args) -> Result<Value, ToolError> {
        let listen_port = args::require_port(args, "listen_port")?;
        let forward_port = args::require_port(args, "forward_port")?;
        let forward_host = args::get_string(args, "forward_host")?
            .filter(|host| !host.is_empty())
            .unwrap_or_else(|| self.defaults.forward_host.clone());
        let capture_limit = args::get_int(args, "capture_limit")?
            .filter(|limit| *limit > 0)
            .map(|limit| usize::try_from(limit).unwrap_or(usize::MAX))
            .unwrap_or(self.defaults.capture_limit);

        match self
            .registry
            .start(listen_port, &forward_host, forward_port, capture_limit)
            .await
        {
            Ok(_) => to_value(StartOutput {
                status: "started",
                listen_port,
                forward_to: format_target(&forward_host, forward_port),
            }),
            Err(e) => error_payload(e),
        }
    }

    pub async fn get_proxy_output(&self, args: &Args) -> Result<Value, ToolError> {
        let listen_port = args::get_port(args, "listen_port")?;
        let clear_buffer = args::get_bool(args, "clear_buffer")?.unwrap_or(true);

        let proxies = match listen_port {
            Some(port) => match self.registry.get(port).await {
                Some(proxy) => vec![proxy],
                None => return error_payload(ProxyError::NotFound { port }),
            },
            None => sorted(self.registry.get_all().await),
        };

        let proxies = proxies
            .iter()
            .map(|proxy| {
                let captures = proxy
                    .buffer()
                    .get_all()
                    .iter()
                    .map(|packet| CaptureRecord::from(packet.as_ref()))
                    .collect();
                let buffer = proxy.buffer().stats();
                let output = ProxyCaptures {
                    listen_port: proxy.listen_port(),
                    forward_to: proxy.forward_to().to_string(),
                    captures,
                    total_bytes_captured: proxy.stats().bytes_captured,
                    buffer_usage: format_usage(buffer.usage_percent),
                    buffer_bytes: buffer.bytes,
                };

                if clear_buffer {
                    proxy.buffer().clear();
                }
                output
            })
            .collect();

        to_value(OutputResult { proxies })
    }

    pub async fn stop_proxy(&self, args: &Args) -> Result<Value, ToolError> {
        let listen_port = args::require_port(args, "listen_port")?;

        match self.registry.stop(listen_port).await {
            Ok(bytes_captured) => to_value(StopOutput {
                status: "stopped",
                listen_port,
                bytes_captured,
            }),
            Err(e) => error_payload(e),
        }
    }

    pub async fn list_proxies(&self) -> Result<Value, ToolError> {
        let proxies = sorted(self.registry.get_all().await)
            .iter()
            .map(|proxy| ProxyListing::from(&proxy.summary()))
            .collect();

        to_value(ListResult { proxies })
    }
}

fn sorted(mut proxies: Vec<Arc<ProxyInstance>>) -> Vec<Arc<ProxyInstance>> {
    proxies.sort_by_key(|proxy| proxy.listen_port());
    proxies
}

fn to_value<T: Serialize>(output: T) -> Result<Value, ToolError> {
    Ok(serde_json::to_value(output)?)
}

fn error_payload(err: impl std::fmt::Display) -> Result<Value, ToolError> {
    to_value(ErrorOutput {
        error: err.to_string(),
    })
}
