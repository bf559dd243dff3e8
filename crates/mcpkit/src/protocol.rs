//! MCP method dispatch.
//!
//! Routes JSON-RPC methods to a [`Handler`]. Both transports funnel through
//! [`dispatch`], so HTTP and stdio clients see identical behavior.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::Instrument;

use crate::types::error::ErrorData;
use crate::types::jsonrpc::{JsonRpcMessage, JsonRpcReply};
use crate::types::protocol::{
    Implementation, InitializeParams, InitializeResult, ServerCapabilities, PROTOCOL_VERSION,
};
use crate::types::tool::{CallToolParams, CallToolResult, ListToolsResult, Tool};

/// Implemented by the application to expose its tools.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Every tool this server answers to, with its argument schema.
    fn tools(&self) -> Vec<Tool>;

    /// Execute a tool call. `name` is guaranteed to be one of [`Handler::tools`].
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, ErrorData>;

    fn server_info(&self) -> Implementation;

    fn instructions(&self) -> Option<String> {
        None
    }
}

/// Shared state handed to the transports.
pub struct McpServer<H> {
    pub handler: Arc<H>,
}

impl<H: Handler> McpServer<H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }
}

/// Dispatch one inbound message.
///
/// Returns `None` for notifications, which never get a reply.
pub async fn dispatch<H: Handler>(
    server: &McpServer<H>,
    message: &JsonRpcMessage,
) -> Option<JsonRpcReply> {
    if message.is_notification() {
        tracing::debug!(method = %message.method, "notification received");
        return None;
    }

    let request_id = message
        .id
        .as_ref()
        .map(|id| id.to_string())
        .unwrap_or_default();

    let span = tracing::info_span!(
        "mcp.dispatch",
        rpc.system = "jsonrpc",
        rpc.method = %message.method,
        rpc.jsonrpc.request_id = %request_id,
        error.type = tracing::field::Empty,
        rpc.jsonrpc.error_code = tracing::field::Empty,
    );

    let result = async {
        let result = dispatch_method(server, message).await;
        if let Err(ref error) = result {
            let span = tracing::Span::current();
            span.record("error.type", error.kind());
            span.record("rpc.jsonrpc.error_code", error.code);
        }
        result
    }
    .instrument(span)
    .await;

    Some(JsonRpcReply::from_result(message.id.clone(), result))
}

async fn dispatch_method<H: Handler>(
    server: &McpServer<H>,
    message: &JsonRpcMessage,
) -> Result<Value, ErrorData> {
    match message.method.as_str() {
        "initialize" => handle_initialize(server, message),
        "ping" => Ok(serde_json::json!({})),
        "tools/list" => to_value(&ListToolsResult::all(server.handler.tools())),
        "tools/call" => handle_call_tool(server, message).await,
        other => Err(ErrorData::method_not_found(other)),
    }
}

fn handle_initialize<H: Handler>(
    server: &McpServer<H>,
    message: &JsonRpcMessage,
) -> Result<Value, ErrorData> {
    let params: Option<InitializeParams> = message
        .params
        .clone()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| ErrorData::invalid_params(format!("Invalid initialize params: {}", e)))?;

    if let Some(client) = params.as_ref().and_then(|p| p.client_info.as_ref()) {
        tracing::info!(client.name = %client.name, client.version = %client.version, "client initialized");
    }

    let result = InitializeResult {
        protocol_version: PROTOCOL_VERSION.to_string(),
        capabilities: ServerCapabilities::tools(),
        server_info: server.handler.server_info(),
        instructions: server.handler.instructions(),
    };
    to_value(&result)
}

async fn handle_call_tool<H: Handler>(
    server: &McpServer<H>,
    message: &JsonRpcMessage,
) -> Result<Value, ErrorData> {
    let params: CallToolParams = message
        .params
        .clone()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| ErrorData::invalid_params(format!("Invalid call params: {}", e)))?
        .ok_or_else(|| ErrorData::invalid_params("Missing call params"))?;

    let known = server
        .handler
        .tools()
        .iter()
        .any(|tool| tool.name == params.name);
    if !known {
        tracing::warn!(tool = %params.name, "call for unknown tool");
        return to_value(&CallToolResult::error(format!("Unknown tool: {}", params.name)));
    }

    let arguments = Value::Object(params.arguments.unwrap_or_default());
    let span = tracing::info_span!("mcp.tool.call", mcp.tool.name = %params.name);
    let result = server
        .handler
        .call_tool(&params.name, arguments)
        .instrument(span)
        .await?;
    to_value(&result)
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, ErrorData> {
    serde_json::to_value(value)
        .map_err(|e| ErrorData::internal_error(format!("Failed to serialize result: {}", e)))
}
