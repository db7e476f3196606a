use std::io;

use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::{
    CallToolParams, Request, Response, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST,
    METHOD_NOT_FOUND, PARSE_ERROR, PROTOCOL_VERSION, SERVER_NAME,
};
use crate::tools::{ProxyTools, ToolError};

/// JSON-RPC front end for [`ProxyTools`].
pub struct McpServer {
    tools: ProxyTools,
}

impl McpServer {
    pub fn new(tools: ProxyTools) -> Self {
        Self { tools }
    }

    pub fn tools(&self) -> &ProxyTools {
        &self.tools
    }

    /// Read requests line by line until EOF, writing one response line per
    /// request. Blank lines are skipped; a line that is not UTF-8 gets a
    /// parse error and the loop keeps going.
    pub async fn serve<R, W>(&self, mut reader: R, mut writer: W) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!("Tool server ready");

        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }

            let response = match std::str::from_utf8(&buf) {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => self.handle_line(line.trim()).await,
                Err(e) => {
                    warn!(error = %e, "Message is not valid UTF-8");
                    Some(Response::error(
                        Value::Null,
                        PARSE_ERROR,
                        format!("parse error: {e}"),
                    ))
                }
            };

            if let Some(response) = response {
                let mut out = serde_json::to_vec(&response)?;
                out.push(b'\n');
                writer.write_all(&out).await?;
                writer.flush().await?;
            }
        }

        info!("Tool server input closed");
        Ok(())
    }

    /// Handle one raw message. Returns `None` for notifications.
    pub async fn handle_line(&self, line: &str) -> Option<Response> {
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Unparseable message");
                return Some(Response::error(
                    Value::Null,
                    PARSE_ERROR,
                    format!("parse error: {e}"),
                ));
            }
        };

        let id = value.get("id").cloned().unwrap_or(Value::Null);
        match serde_json::from_value::<Request>(value) {
            Ok(request) => self.handle_request(request).await,
            Err(e) => Some(Response::error(
                id,
                INVALID_REQUEST,
                format!("invalid request: {e}"),
            )),
        }
    }

    pub async fn handle_request(&self, request: Request) -> Option<Response> {
        let Some(id) = request.id.clone() else {
            debug!(method = %request.method, "Notification");
            return None;
        };

        debug!(method = %request.method, "Request");
        let response = match request.method.as_str() {
            "initialize" => Response::result(id, initialize_result()),
            "ping" => Response::result(id, json!({})),
            "tools/list" => Response::result(
                id,
                json!({ "tools": ProxyTools::definitions() }),
            ),
            "tools/call" => self.call_tool(id, request.params).await,
            other => Response::error(
                id,
                METHOD_NOT_FOUND,
                format!("method not found: {other}"),
            ),
        };
        Some(response)
    }

    async fn call_tool(&self, id: Value, params: Option<Value>) -> Response {
        let params: CallToolParams = match params.map(serde_json::from_value) {
            Some(Ok(params)) => params,
            Some(Err(e)) => {
                return Response::error(id, INVALID_PARAMS, format!("invalid params: {e}"))
            }
            None => return Response::error(id, INVALID_PARAMS, "missing params"),
        };

        let result = self
            .tools
            .call(&params.name, params.arguments.as_ref())
            .await
            .and_then(|payload| Ok(serde_json::to_string_pretty(&payload)?));

        match result {
            Ok(text) => Response::result(
                id,
                json!({ "content": [{ "type": "text", "text": text }] }),
            ),
            Err(e @ (ToolError::InvalidArguments(_) | ToolError::UnknownTool(_))) => {
                Response::error(id, INVALID_PARAMS, e.to_string())
            }
            Err(e @ ToolError::Serialization(_)) => {
                warn!(tool = %params.name, error = %e, "Tool result not serializable");
                Response::error(id, INTERNAL_ERROR, e.to_string())
            }
        }
    }
}

fn initialize_result() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": { "tools": {} },
        "serverInfo": {
            "name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION"),
        }
    })
}
