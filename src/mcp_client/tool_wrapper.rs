//! Adapter exposing MCP tools as agent-callable functions.
//!
//! Each [`McpToolAdapter`] pairs one discovered tool with the manager that
//! routes it, under a namespaced name (`mcp_{server}_{tool}`) so tools from
//! different servers never collide in a flat function list.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use super::manager::McpManager;
use super::types::{CallToolResult, McpTool, ToolCallResult};

pub struct McpToolAdapter {
    tool: McpTool,
    manager: Arc<McpManager>,
}

impl McpToolAdapter {
    pub fn new(tool: McpTool, manager: Arc<McpManager>) -> Self {
        Self { tool, manager }
    }

    /// Namespaced name, `mcp_{server}_{tool}`.
    pub fn name(&self) -> String {
        format!("mcp_{}_{}", self.tool.server_name, self.tool.name)
    }

    pub fn description(&self) -> String {
        let description = if self.tool.description.trim().is_empty() {
            format!("MCP tool {} from {} server", self.tool.name, self.tool.server_name)
        } else {
            self.tool.description.clone()
        };
        format!("[MCP:{}] {}", self.tool.server_name, description)
    }

    pub fn server_name(&self) -> &str {
        &self.tool.server_name
    }

    /// Tool name as the server knows it, without the prefix.
    pub fn tool_name(&self) -> &str {
        &self.tool.name
    }

    pub fn tool(&self) -> &McpTool {
        &self.tool
    }

    /// True while the owning server is registered and running.
    pub async fn is_available(&self) -> bool {
        match self.manager.get_server(&self.tool.server_name).await {
            Some(server) => server.is_running().await,
            None => false,
        }
    }

    /// Call the tool through the manager. Never fails: routing errors and
    /// tool refusals both come back as an unsuccessful result.
    pub async fn execute(&self, arguments: Value, cancel: &CancellationToken) -> ToolCallResult {
        let start = Instant::now();
        let arguments = match arguments {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };

        let outcome = self
            .manager
            .call_tool(&self.tool.server_name, &self.tool.name, arguments, cancel)
            .await;
        let elapsed = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) => self.convert(result, elapsed),
            Err(e) => ToolCallResult {
                tool_name: self.name(),
                success: false,
                output: String::new(),
                errors: vec![e.to_string()],
                metadata: self.base_metadata(0),
                execution_time_ms: elapsed,
            },
        }
    }

    fn convert(&self, result: CallToolResult, elapsed: u64) -> ToolCallResult {
        let mut metadata = self.base_metadata(result.content.len());

        let non_text: Vec<Value> = result
            .content
            .iter()
            .filter(|c| c.kind != "text")
            .map(|c| {
                json!({
                    "type": c.kind,
                    "mimeType": c.mime_type,
                    "uri": c.uri,
                    "bytes": c.data.as_ref().or(c.blob.as_ref()).map_or(0, String::len),
                })
            })
            .collect();
        if !non_text.is_empty() {
            metadata.insert("non_text_content".into(), Value::Array(non_text));
        }

        let texts: Vec<String> = result
            .content
            .iter()
            .filter(|c| c.kind == "text")
            .filter_map(|c| c.text.clone())
            .collect();

        if result.is_error {
            ToolCallResult {
                tool_name: self.name(),
                success: false,
                output: String::new(),
                errors: texts,
                metadata,
                execution_time_ms: elapsed,
            }
        } else {
            ToolCallResult {
                tool_name: self.name(),
                success: true,
                output: texts.join("\n"),
                errors: Vec::new(),
                metadata,
                execution_time_ms: elapsed,
            }
        }
    }

    fn base_metadata(&self, content_count: usize) -> Map<String, Value> {
        let mut metadata = Map::new();
        metadata.insert("server_name".into(), json!(self.tool.server_name));
        metadata.insert("tool_name".into(), json!(self.tool.name));
        metadata.insert("content_count".into(), json!(content_count));
        metadata.insert("mcp_source".into(), json!(true));
        metadata
    }

    /// OpenAI function-calling definition for this tool.
    pub fn to_function_definition(&self) -> Value {
        let parameters = match &self.tool.input_schema {
            Value::Object(schema) if !schema.is_empty() => Value::Object(schema.clone()),
            _ => json!({"type": "object", "properties": {}}),
        };
        json!({
            "type": "function",
            "function": {
                "name": self.name(),
                "description": self.description(),
                "parameters": parameters,
            }
        })
    }
}

/// Adapters for every tool currently reachable through `manager`.
pub async fn adapt_all_tools(
    manager: &Arc<McpManager>,
    cancel: &CancellationToken,
) -> Vec<McpToolAdapter> {
    manager
        .get_all_tools(cancel)
        .await
        .into_iter()
        .map(|tool| McpToolAdapter::new(tool, manager.clone()))
        .collect()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
