//! MCP method names, handshake parameters and result decoding.
//!
//! Both transports build requests and unwrap results through these helpers,
//! so the typed view of a response does not depend on how it travelled.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::errors::McpError;
use super::types::{
    CallToolResult, Envelope, McpContent, McpPrompt, McpResource, McpTool, PromptMessage,
};

// ─── Methods ─────────────────────────────────────────────────────────────────

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
pub const METHOD_TOOLS_LIST: &str = "tools/list";
pub const METHOD_TOOLS_CALL: &str = "tools/call";
pub const METHOD_RESOURCES_LIST: &str = "resources/list";
pub const METHOD_RESOURCES_READ: &str = "resources/read";
pub const METHOD_PROMPTS_LIST: &str = "prompts/list";
pub const METHOD_PROMPTS_GET: &str = "prompts/get";

/// Protocol revision announced by stdio clients.
pub const STDIO_PROTOCOL_VERSION: &str = "2024-11-05";

/// Protocol revision announced by HTTP clients.
pub const HTTP_PROTOCOL_VERSION: &str = "2025-06-18";

/// Name reported in `clientInfo`.
pub const CLIENT_NAME: &str = "mcp-hub";

// ─── Request Params ──────────────────────────────────────────────────────────

/// `initialize` params for a stdio server.
pub fn stdio_initialize_params() -> Value {
    initialize_params(
        STDIO_PROTOCOL_VERSION,
        json!({ "tools": {}, "resources": {}, "prompts": {} }),
    )
}

/// `initialize` params for an HTTP server.
pub fn http_initialize_params() -> Value {
    initialize_params(
        HTTP_PROTOCOL_VERSION,
        json!({ "roots": { "listChanged": false } }),
    )
}

fn initialize_params(protocol_version: &str, capabilities: Value) -> Value {
    json!({
        "protocolVersion": protocol_version,
        "capabilities": capabilities,
        "clientInfo": {
            "name": CLIENT_NAME,
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

pub fn call_tool_params(tool: &str, arguments: Value) -> Value {
    let arguments = if arguments.is_null() { json!({}) } else { arguments };
    json!({ "name": tool, "arguments": arguments })
}

pub fn read_resource_params(uri: &str) -> Value {
    json!({ "uri": uri })
}

pub fn get_prompt_params(name: &str, arguments: Value) -> Value {
    let arguments = if arguments.is_null() { json!({}) } else { arguments };
    json!({ "name": name, "arguments": arguments })
}

// ─── Result Decoding ─────────────────────────────────────────────────────────

/// Extract the `result` of a response, converting an `error` object into
/// [`McpError::ProtocolError`].
///
/// A response carrying neither field (or `"result": null`) yields `Null`.
pub fn extract_result(server: &str, method: &str, response: Envelope) -> Result<Value, McpError> {
    if let Some(err) = response.error {
        return Err(McpError::ProtocolError {
            server: server.to_string(),
            method: method.to_string(),
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }
    Ok(response.result.unwrap_or(Value::Null))
}

/// Deserialize a result payload, labelling failures with the method.
pub fn decode<T: DeserializeOwned>(server: &str, method: &str, result: Value) -> Result<T, McpError> {
    serde_json::from_value(result).map_err(|e| McpError::MalformedResponse {
        server: server.to_string(),
        reason: format!("unexpected '{method}' result: {e}"),
    })
}

#[derive(Deserialize)]
struct ToolsPage {
    #[serde(default)]
    tools: Vec<McpTool>,
}

#[derive(Deserialize)]
struct ResourcesPage {
    #[serde(default)]
    resources: Vec<McpResource>,
}

#[derive(Deserialize)]
struct PromptsPage {
    #[serde(default)]
    prompts: Vec<McpPrompt>,
}

#[derive(Deserialize)]
struct ResourceRead {
    #[serde(default)]
    contents: Vec<McpContent>,
}

#[derive(Deserialize)]
struct PromptGet {
    #[serde(default)]
    messages: Vec<PromptMessage>,
}

/// Decode `tools/list` and tag each tool with its server.
pub fn parse_tools(server: &str, result: Value) -> Result<Vec<McpTool>, McpError> {
    let page: ToolsPage = decode(server, METHOD_TOOLS_LIST, result)?;
    Ok(page
        .tools
        .into_iter()
        .map(|mut tool| {
            tool.server_name = server.to_string();
            tool
        })
        .collect())
}

/// Decode `resources/list` and tag each resource with its server.
pub fn parse_resources(server: &str, result: Value) -> Result<Vec<McpResource>, McpError> {
    let page: ResourcesPage = decode(server, METHOD_RESOURCES_LIST, result)?;
    Ok(page
        .resources
        .into_iter()
        .map(|mut resource| {
            resource.server_name = server.to_string();
            resource
        })
        .collect())
}

/// Decode `prompts/list` and tag each prompt with its server.
pub fn parse_prompts(server: &str, result: Value) -> Result<Vec<McpPrompt>, McpError> {
    let page: PromptsPage = decode(server, METHOD_PROMPTS_LIST, result)?;
    Ok(page
        .prompts
        .into_iter()
        .map(|mut prompt| {
            prompt.server_name = server.to_string();
            prompt
        })
        .collect())
}

pub fn parse_call_tool(server: &str, result: Value) -> Result<CallToolResult, McpError> {
    decode(server, METHOD_TOOLS_CALL, result)
}

/// First content item of `resources/read`.
pub fn parse_resource_contents(server: &str, result: Value) -> Result<McpContent, McpError> {
    let read: ResourceRead = decode(server, METHOD_RESOURCES_READ, result)?;
    read.contents
        .into_iter()
        .next()
        .ok_or_else(|| McpError::MalformedResponse {
            server: server.to_string(),
            reason: "resources/read returned no contents".into(),
        })
}

/// First message of `prompts/get`.
pub fn parse_prompt_message(server: &str, result: Value) -> Result<PromptMessage, McpError> {
    let get: PromptGet = decode(server, METHOD_PROMPTS_GET, result)?;
    get.messages
        .into_iter()
        .next()
        .ok_or_else(|| McpError::MalformedResponse {
            server: server.to_string(),
            reason: "prompts/get returned no messages".into(),
        })
}

/// Turn a `tools/call` failure into data when the server itself refused.
///
/// Protocol errors become an error-flagged result; everything else
/// (timeouts, broken pipes) stays an error.
pub fn tool_failure_as_result(err: McpError) -> Result<CallToolResult, McpError> {
    match err {
        McpError::ProtocolError { message, .. } => Ok(CallToolResult::error(message)),
        other => Err(other),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
