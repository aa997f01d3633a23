//! The transport-independent server interface.
//!
//! [`McpServer`] is implemented by the stdio and HTTP clients. Transports
//! provide lifecycle, the handshake and a raw `request`; the typed MCP
//! operations are shared default methods that auto-initialize and decode.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::config::{ServerConfig, TransportKind};
use super::errors::McpError;
use super::http_client::HttpClient;
use super::protocol;
use super::stdio_client::StdioClient;
use super::types::{CallToolResult, InitializeResult, McpContent, McpPrompt, McpResource, McpTool, PromptMessage};

/// Point-in-time view of one client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerStatus {
    pub name: String,
    pub transport: TransportKind,
    pub running: bool,
    pub initialized: bool,
    pub restart_count: u32,
    pub started_at: Option<DateTime<Utc>>,
}

/// One MCP server connection, independent of transport.
#[async_trait]
pub trait McpServer: Send + Sync {
    fn name(&self) -> &str;

    fn config(&self) -> &ServerConfig;

    /// Bring the connection up. Does not perform the handshake.
    async fn start(&self) -> Result<(), McpError>;

    /// Tear the connection down and reset state for a later `start`.
    async fn stop(&self) -> Result<(), McpError>;

    async fn is_running(&self) -> bool;

    async fn status(&self) -> ServerStatus;

    /// The server's `initialize` result, once the handshake has completed.
    async fn server_info(&self) -> Option<InitializeResult>;

    /// Perform the handshake. Returns immediately if already initialized.
    async fn initialize(&self, cancel: &CancellationToken) -> Result<(), McpError>;

    /// Send one request and return its `result`. Does not initialize.
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        cancel: &CancellationToken,
    ) -> Result<Value, McpError>;

    async fn list_tools(&self, cancel: &CancellationToken) -> Result<Vec<McpTool>, McpError> {
        self.initialize(cancel).await?;
        let result = self.request(protocol::METHOD_TOOLS_LIST, None, cancel).await?;
        protocol::parse_tools(self.name(), result)
    }

    /// Call a tool. A refusal from the server comes back as an
    /// error-flagged result rather than `Err`.
    async fn call_tool(
        &self,
        tool: &str,
        arguments: Value,
        cancel: &CancellationToken,
    ) -> Result<CallToolResult, McpError> {
        self.initialize(cancel).await?;
        let params = protocol::call_tool_params(tool, arguments);
        match self
            .request(protocol::METHOD_TOOLS_CALL, Some(params), cancel)
            .await
        {
            Ok(result) => protocol::parse_call_tool(self.name(), result),
            Err(err) => protocol::tool_failure_as_result(err),
        }
    }

    async fn list_resources(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<McpResource>, McpError> {
        self.initialize(cancel).await?;
        let result = self
            .request(protocol::METHOD_RESOURCES_LIST, None, cancel)
            .await?;
        protocol::parse_resources(self.name(), result)
    }

    async fn read_resource(
        &self,
        uri: &str,
        cancel: &CancellationToken,
    ) -> Result<McpContent, McpError> {
        self.initialize(cancel).await?;
        let params = protocol::read_resource_params(uri);
        let result = self
            .request(protocol::METHOD_RESOURCES_READ, Some(params), cancel)
            .await?;
        protocol::parse_resource_contents(self.name(), result)
    }

    async fn list_prompts(&self, cancel: &CancellationToken) -> Result<Vec<McpPrompt>, McpError> {
        self.initialize(cancel).await?;
        let result = self
            .request(protocol::METHOD_PROMPTS_LIST, None, cancel)
            .await?;
        protocol::parse_prompts(self.name(), result)
    }

    async fn get_prompt(
        &self,
        name: &str,
        arguments: Value,
        cancel: &CancellationToken,
    ) -> Result<PromptMessage, McpError> {
        self.initialize(cancel).await?;
        let params = protocol::get_prompt_params(name, arguments);
        let result = self
            .request(protocol::METHOD_PROMPTS_GET, Some(params), cancel)
            .await?;
        protocol::parse_prompt_message(self.name(), result)
    }
}

/// Build the client matching the config's transport kind.
pub fn create_server(config: ServerConfig) -> Result<Arc<dyn McpServer>, McpError> {
    config.validate()?;
    Ok(match config.transport {
        TransportKind::Stdio => Arc::new(StdioClient::new(config)),
        TransportKind::Http => Arc::new(HttpClient::new(config)?),
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_server_selects_transport() {
        let stdio = create_server(ServerConfig::stdio("local", "cat", &[])).unwrap();
        assert_eq!(stdio.config().transport, TransportKind::Stdio);
        assert!(!stdio.is_running().await);

        let http = create_server(ServerConfig::http("remote", "http://127.0.0.1:9/mcp")).unwrap();
        assert_eq!(http.name(), "remote");
        assert_eq!(http.status().await.transport, TransportKind::Http);
    }

    #[test]
    fn test_create_server_validates() {
        assert!(matches!(
            create_server(ServerConfig::stdio("bad", "", &[])),
            Err(McpError::ConfigError { .. })
        ));
    }

    #[tokio::test]
    async fn test_operations_require_running_client() {
        let server = create_server(ServerConfig::stdio("idle", "cat", &[])).unwrap();
        let err = server
            .list_tools(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::NotRunning { .. }));

        let err = server
            .call_tool("x", Value::Null, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::NotRunning { .. }));
    }
}
