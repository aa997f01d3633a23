//! MCP client: stdio and HTTP transports plus multi-server management.
//!
//! This module handles:
//! - JSON-RPC 2.0 correlation over child-process stdio
//! - JSON-RPC over HTTP POST with session and cookie continuity
//! - Server lifecycle (spawn, handshake, restart with backoff, graceful stop)
//! - Aggregating tools, resources and prompts across servers
//! - Server templates and GitHub server auto-discovery
//!
//! [`McpManager`] is the entry point; [`McpToolAdapter`] exposes discovered
//! tools to an agent's function-calling layer.

pub mod config;
pub mod discovery;
pub mod errors;
pub mod http_client;
pub mod lifecycle;
pub mod manager;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod stdio_client;
pub mod tool_wrapper;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use config::{McpSettings, ServerConfig, TransportKind};
pub use errors::McpError;
pub use http_client::HttpClient;
pub use manager::{ManagerStats, McpManager};
pub use registry::{ConfigOverrides, ServerTemplate, TemplateRegistry};
pub use server::{create_server, McpServer, ServerStatus};
pub use stdio_client::StdioClient;
pub use tool_wrapper::{adapt_all_tools, McpToolAdapter};
pub use types::{CallToolResult, McpContent, McpPrompt, McpResource, McpTool, PromptMessage, ToolCallResult};
