//! JSON-RPC 2.0 client over newline-delimited stdio.
//!
//! The transport is strictly request-then-read: there is no multiplexing,
//! so concurrent callers serialize on one lock and pipelining is
//! unsupported. Request ids increase monotonically for the lifetime of one
//! client; a response whose id does not match the outstanding request is
//! dropped and reading continues.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{BridgeError, BridgeErrorKind, BridgeResult};
use crate::process::AgentIo;

/// Protocol version this client negotiates during `initialize`.
pub const SUPPORTED_PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

/// Error object from a JSON-RPC response.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Result of the `initialize` handshake.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    #[serde(default)]
    pub server_info: Option<ServerInfo>,
}

/// Capabilities declared by the agent during `initialize`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    #[serde(default)]
    pub tools: Option<ToolsCapability>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    #[serde(default)]
    pub list_changed: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// A tool advertised by the agent via `tools/list`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Value,
}

#[derive(Debug, Deserialize)]
struct ListToolsResult {
    #[serde(default)]
    tools: Vec<ToolInfo>,
}

/// One content item from a `tools/call` result.
///
/// Loosely-typed result payloads are decoded into explicit variants instead
/// of being passed around as open maps.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolContent {
    Text(String),
    /// Content of a kind this client does not interpret, kept verbatim.
    Other(Value),
}

/// Typed result of a `tools/call` invocation.
#[derive(Debug, Clone, Default)]
pub struct ToolCallResult {
    pub content: Vec<ToolContent>,
    pub is_error: bool,
}

impl ToolCallResult {
    fn from_value(value: Value) -> Self {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(default)]
            content: Vec<Value>,
            #[serde(default, rename = "isError")]
            is_error: bool,
        }

        let raw: Raw = serde_json::from_value(value).unwrap_or(Raw {
            content: Vec::new(),
            is_error: false,
        });

        let content = raw
            .content
            .into_iter()
            .map(|item| {
                if item.get("type").and_then(Value::as_str) == Some("text") {
                    if let Some(text) = item.get("text").and_then(Value::as_str) {
                        return ToolContent::Text(text.to_string());
                    }
                }
                ToolContent::Other(item)
            })
            .collect();

        Self {
            content,
            is_error: raw.is_error,
        }
    }

    /// Concatenated text content items.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for item in &self.content {
            if let ToolContent::Text(text) = item {
                out.push_str(text);
            }
        }
        out
    }
}

struct Inner<R, W> {
    reader: R,
    writer: W,
}

/// JSON-RPC 2.0 client with method-id correlation.
pub struct RpcClient<R, W> {
    inner: Mutex<Inner<R, W>>,
    next_id: AtomicI64,
    initialized: AtomicBool,
}

/// RPC client bound to an agent subprocess's stdio.
pub type AgentRpcClient = RpcClient<BufReader<ChildStdout>, ChildStdin>;

impl AgentRpcClient {
    /// Wraps the stdio handles of a freshly spawned agent process.
    pub fn from_io(io: AgentIo) -> Self {
        Self::new(BufReader::new(io.stdout), io.stdin)
    }
}

impl<R, W> RpcClient<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            inner: Mutex::new(Inner { reader, writer }),
            next_id: AtomicI64::new(0),
            initialized: AtomicBool::new(false),
        }
    }

    /// Negotiates protocol version and capabilities.
    ///
    /// Must be called once before any other method; fails fast when the
    /// agent declares an incompatible protocol version.
    ///
    /// # Errors
    /// `Protocol` on version mismatch or a malformed result, `Rpc` when the
    /// agent rejects the handshake, `Transport` on pipe failure.
    pub async fn initialize(
        &self,
        client_name: &str,
        client_version: &str,
    ) -> BridgeResult<InitializeResult> {
        let params = json!({
            "protocolVersion": SUPPORTED_PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": client_name,
                "version": client_version,
            },
        });

        let result = self.request("initialize", params).await?;
        let parsed: InitializeResult = serde_json::from_value(result).map_err(|e| {
            BridgeError::with_details(
                BridgeErrorKind::Protocol,
                "malformed initialize result",
                e.to_string(),
            )
        })?;

        if parsed.protocol_version != SUPPORTED_PROTOCOL_VERSION {
            return Err(BridgeError::new(
                BridgeErrorKind::Protocol,
                format!(
                    "incompatible protocol version '{}' (supported: {SUPPORTED_PROTOCOL_VERSION})",
                    parsed.protocol_version
                ),
            ));
        }

        self.initialized.store(true, Ordering::SeqCst);
        Ok(parsed)
    }

    /// Lists the tools the agent exposes.
    ///
    /// # Errors
    /// `Protocol` if called before `initialize` or on a malformed result.
    pub async fn list_tools(&self) -> BridgeResult<Vec<ToolInfo>> {
        self.ensure_initialized()?;
        let result = self.request("tools/list", json!({})).await?;
        let parsed: ListToolsResult = serde_json::from_value(result).map_err(|e| {
            BridgeError::with_details(
                BridgeErrorKind::Protocol,
                "malformed tools/list result",
                e.to_string(),
            )
        })?;
        Ok(parsed.tools)
    }

    /// Invokes a tool and blocks until the matching-id response arrives.
    ///
    /// # Errors
    /// `Rpc` carrying the agent's code/message when the response holds an
    /// error object; never silently swallowed.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> BridgeResult<ToolCallResult> {
        self.ensure_initialized()?;
        let params = json!({
            "name": name,
            "arguments": arguments,
        });
        let result = self.request("tools/call", params).await?;
        Ok(ToolCallResult::from_value(result))
    }

    fn ensure_initialized(&self) -> BridgeResult<()> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BridgeError::new(
                BridgeErrorKind::Protocol,
                "initialize must be called before other RPC methods",
            ))
        }
    }

    async fn request(&self, method: &str, params: Value) -> BridgeResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let mut inner = self.inner.lock().await;

        let encoded = request.to_string();
        inner
            .writer
            .write_all(encoded.as_bytes())
            .await
            .map_err(|e| BridgeError::transport("failed to write request", &e))?;
        inner
            .writer
            .write_all(b"\n")
            .await
            .map_err(|e| BridgeError::transport("failed to write request", &e))?;
        inner
            .writer
            .flush()
            .await
            .map_err(|e| BridgeError::transport("failed to flush request", &e))?;

        let mut line = String::new();
        loop {
            line.clear();
            let read = inner
                .reader
                .read_line(&mut line)
                .await
                .map_err(|e| BridgeError::transport("failed to read response", &e))?;
            if read == 0 {
                return Err(BridgeError::new(
                    BridgeErrorKind::Transport,
                    format!("agent closed the pipe before responding to '{method}'"),
                ));
            }

            let trimmed = line.trim_end();
            if trimmed.is_empty() {
                continue;
            }

            let response: JsonRpcResponse = match serde_json::from_str(trimmed) {
                Ok(r) => r,
                Err(err) => {
                    warn!(%err, "skipping malformed response line");
                    continue;
                }
            };

            if response.id != Some(id) {
                debug!(
                    expected = id,
                    got = ?response.id,
                    "dropping response with mismatched id"
                );
                continue;
            }

            // An invalid response carrying both result and error is treated
            // as the error; it must never crash the client.
            if let Some(error) = response.error {
                let mut bridge = BridgeError::rpc(error.code, error.message);
                if let Some(data) = error.data {
                    bridge.details = Some(data.to_string());
                }
                return Err(bridge);
            }

            return Ok(response.result.unwrap_or(Value::Null));
        }
    }
}
