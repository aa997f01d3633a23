//! MCP Manager: a named collection of server clients.
//!
//! Owns every registered client behind the [`McpServer`] trait and provides
//! the aggregate operations:
//! - concurrent `start_all` / `stop_all`, reporting all failures together
//! - concurrent `get_all_tools` (and resources/prompts) that return partial
//!   results when some servers are unhealthy
//! - routing of tool calls, resource reads and prompt fetches by server name
//! - restart with backoff and auto-discovery of a GitHub server
//!
//! Fan-out operations spawn one task per server and wait for all of them.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::config::{McpSettings, ServerConfig};
use super::discovery::{self, GITHUB_SERVER_NAME};
use super::errors::McpError;
use super::lifecycle;
use super::server::{create_server, McpServer, ServerStatus};
use super::types::{CallToolResult, McpContent, McpPrompt, McpResource, McpTool, PromptMessage};

// ─── Stats ───────────────────────────────────────────────────────────────────

/// Snapshot of every registered server.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStats {
    pub total_servers: usize,
    pub running_servers: usize,
    pub servers: Vec<ServerStatus>,
    pub collected_at: DateTime<Utc>,
}

// ─── McpManager ──────────────────────────────────────────────────────────────

/// Registry of MCP server clients keyed by server name.
#[derive(Default)]
pub struct McpManager {
    servers: RwLock<HashMap<String, Arc<dyn McpServer>>>,
}

impl McpManager {
    /// An empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a manager from settings: register every enabled server, start
    /// the auto-start ones when the settings allow it, and try GitHub
    /// discovery when requested and no GitHub server is configured.
    ///
    /// Start and discovery failures are logged, not returned.
    pub async fn from_settings(
        settings: &McpSettings,
        cancel: &CancellationToken,
    ) -> Result<Self, McpError> {
        settings.validate()?;
        let manager = Self::new();
        if !settings.enabled {
            tracing::info!("MCP disabled, no servers registered");
            return Ok(manager);
        }

        for config in settings.enabled_servers() {
            manager.add_server(config).await?;
        }

        if settings.auto_start {
            if let Err(e) = manager.start_all().await {
                tracing::warn!(error = %e, "some MCP servers failed to start");
            }
        }

        if settings.auto_discover && manager.get_server(GITHUB_SERVER_NAME).await.is_none() {
            if let Err(e) = manager.auto_discover_github_server(cancel).await {
                tracing::warn!(error = %e, "GitHub MCP server not discovered");
            }
        }

        Ok(manager)
    }

    // ─── Registration ────────────────────────────────────────────────────

    /// Build a client for `config` and register it.
    pub async fn add_server(&self, config: ServerConfig) -> Result<Arc<dyn McpServer>, McpError> {
        let server = create_server(config)?;
        self.register(server.clone()).await?;
        Ok(server)
    }

    /// Register an already-built client.
    pub async fn register(&self, server: Arc<dyn McpServer>) -> Result<(), McpError> {
        let name = server.name().to_string();
        let mut servers = self.servers.write().await;
        if servers.contains_key(&name) {
            return Err(McpError::DuplicateServer { name });
        }
        tracing::info!(
            server = %name,
            transport = %server.config().transport,
            "added MCP server"
        );
        servers.insert(name, server);
        Ok(())
    }

    /// Unregister a server, stopping it first if it is running.
    ///
    /// A failed stop is logged; the server is removed regardless.
    pub async fn remove_server(&self, name: &str) -> Result<(), McpError> {
        let server = self
            .servers
            .write()
            .await
            .remove(name)
            .ok_or_else(|| McpError::UnknownServer {
                name: name.to_string(),
            })?;

        if server.is_running().await {
            if let Err(e) = server.stop().await {
                tracing::warn!(server = name, error = %e, "failed to stop server during removal");
            }
        }
        tracing::info!(server = name, "removed MCP server");
        Ok(())
    }

    pub async fn get_server(&self, name: &str) -> Option<Arc<dyn McpServer>> {
        self.servers.read().await.get(name).cloned()
    }

    /// Registered server names, sorted.
    pub async fn list_servers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.servers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn server_count(&self) -> usize {
        self.servers.read().await.len()
    }

    async fn snapshot(&self) -> Vec<Arc<dyn McpServer>> {
        self.servers.read().await.values().cloned().collect()
    }

    async fn running_snapshot(&self) -> Vec<Arc<dyn McpServer>> {
        let mut running = Vec::new();
        for server in self.snapshot().await {
            if server.is_running().await {
                running.push(server);
            }
        }
        running
    }

    /// Look up a server that must be running.
    async fn running_server(&self, name: &str) -> Result<Arc<dyn McpServer>, McpError> {
        let server = self
            .get_server(name)
            .await
            .ok_or_else(|| McpError::UnknownServer {
                name: name.to_string(),
            })?;
        if !server.is_running().await {
            return Err(McpError::NotRunning {
                name: name.to_string(),
            });
        }
        Ok(server)
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Start every auto-start server that is not already running.
    ///
    /// Servers that start stay running even when others fail; the failures
    /// come back together as [`McpError::Aggregate`].
    pub async fn start_all(&self) -> Result<(), McpError> {
        let mut targets = Vec::new();
        for server in self.snapshot().await {
            if server.config().auto_start && !server.is_running().await {
                targets.push(server);
            }
        }
        let attempted = targets.len();

        let outcomes = fan_out(targets, |server| async move { server.start().await }).await;
        let failures = collect_failures(outcomes);

        tracing::info!(
            started = attempted - failures.len(),
            failed = failures.len(),
            "started MCP servers"
        );
        aggregate("start", failures)
    }

    /// Stop every running server.
    pub async fn stop_all(&self) -> Result<(), McpError> {
        let targets = self.running_snapshot().await;
        let attempted = targets.len();

        let outcomes = fan_out(targets, |server| async move { server.stop().await }).await;
        let failures = collect_failures(outcomes);

        if attempted > 0 {
            tracing::info!(stopped = attempted, failed = failures.len(), "stopped MCP servers");
        }
        aggregate("stop", failures)
    }

    /// Stop and start one server again after a backoff delay.
    ///
    /// Fails with [`McpError::RestartExhausted`] once the server has been
    /// restarted `max_restarts` times.
    pub async fn restart_server(&self, name: &str, cancel: &CancellationToken) -> Result<(), McpError> {
        let server = self
            .get_server(name)
            .await
            .ok_or_else(|| McpError::UnknownServer {
                name: name.to_string(),
            })?;

        let max = server.config().max_restarts;
        let restarts_done = server.status().await.restart_count.saturating_sub(1);
        if restarts_done >= max {
            return Err(McpError::RestartExhausted {
                name: name.to_string(),
                attempts: max,
            });
        }

        server.stop().await?;
        let delay = lifecycle::restart_delay(restarts_done + 1);
        tracing::info!(server = name, delay_ms = delay.as_millis() as u64, "restarting server");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(McpError::Cancelled {
                    server: name.to_string(),
                    method: "restart".into(),
                });
            }
            _ = tokio::time::sleep(delay) => {}
        }
        server.start().await
    }

    // ─── Aggregation ─────────────────────────────────────────────────────

    /// Tools from every running server. Servers that fail are logged and
    /// skipped; this never fails as a whole.
    pub async fn get_all_tools(&self, cancel: &CancellationToken) -> Vec<McpTool> {
        let targets = self.running_snapshot().await;
        let token = cancel.clone();
        let outcomes = fan_out(targets, move |server| {
            let token = token.clone();
            async move { server.list_tools(&token).await }
        })
        .await;

        let mut tools = merge_partial("list tools", outcomes);
        tools.sort_by(|a, b| (&a.server_name, &a.name).cmp(&(&b.server_name, &b.name)));
        tools
    }

    /// Resources from every running server, with the same partial policy.
    pub async fn list_all_resources(&self, cancel: &CancellationToken) -> Vec<McpResource> {
        let targets = self.running_snapshot().await;
        let token = cancel.clone();
        let outcomes = fan_out(targets, move |server| {
            let token = token.clone();
            async move { server.list_resources(&token).await }
        })
        .await;

        let mut resources = merge_partial("list resources", outcomes);
        resources.sort_by(|a, b| (&a.server_name, &a.uri).cmp(&(&b.server_name, &b.uri)));
        resources
    }

    /// Prompts from every running server, with the same partial policy.
    pub async fn list_all_prompts(&self, cancel: &CancellationToken) -> Vec<McpPrompt> {
        let targets = self.running_snapshot().await;
        let token = cancel.clone();
        let outcomes = fan_out(targets, move |server| {
            let token = token.clone();
            async move { server.list_prompts(&token).await }
        })
        .await;

        let mut prompts = merge_partial("list prompts", outcomes);
        prompts.sort_by(|a, b| (&a.server_name, &a.name).cmp(&(&b.server_name, &b.name)));
        prompts
    }

    // ─── Routing ─────────────────────────────────────────────────────────

    /// Call `tool` on `server_name`. Fails fast if the server is unknown or
    /// not running; a refusal by the server is an error-flagged result.
    pub async fn call_tool(
        &self,
        server_name: &str,
        tool: &str,
        arguments: Value,
        cancel: &CancellationToken,
    ) -> Result<CallToolResult, McpError> {
        let server = self.running_server(server_name).await?;
        let start = Instant::now();
        let result = server.call_tool(tool, arguments, cancel).await;

        match &result {
            Ok(r) => tracing::info!(
                server = server_name,
                tool,
                is_error = r.is_error,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "tool call completed"
            ),
            Err(e) => tracing::warn!(
                server = server_name,
                tool,
                error = %e,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "tool call failed"
            ),
        }
        result
    }

    pub async fn read_resource(
        &self,
        server_name: &str,
        uri: &str,
        cancel: &CancellationToken,
    ) -> Result<McpContent, McpError> {
        self.running_server(server_name)
            .await?
            .read_resource(uri, cancel)
            .await
    }

    pub async fn get_prompt(
        &self,
        server_name: &str,
        prompt: &str,
        arguments: Value,
        cancel: &CancellationToken,
    ) -> Result<PromptMessage, McpError> {
        self.running_server(server_name)
            .await?
            .get_prompt(prompt, arguments, cancel)
            .await
    }

    // ─── Stats ───────────────────────────────────────────────────────────

    pub async fn server_stats(&self) -> ManagerStats {
        let mut servers = Vec::new();
        for server in self.snapshot().await {
            servers.push(server.status().await);
        }
        servers.sort_by(|a, b| a.name.cmp(&b.name));

        ManagerStats {
            total_servers: servers.len(),
            running_servers: servers.iter().filter(|s| s.running).count(),
            servers,
            collected_at: Utc::now(),
        }
    }

    // ─── Discovery ───────────────────────────────────────────────────────

    /// Find a working GitHub MCP server among the known launch commands.
    ///
    /// Returns the config of the candidate that proved live.
    pub async fn auto_discover_github_server(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ServerConfig, McpError> {
        self.auto_discover_with(discovery::github_candidates(), cancel)
            .await
    }

    /// Try each candidate in order: add, start, list tools. A candidate that
    /// fails any step is removed before the next one is tried.
    pub async fn auto_discover_with(
        &self,
        candidates: Vec<ServerConfig>,
        cancel: &CancellationToken,
    ) -> Result<ServerConfig, McpError> {
        let mut tried = Vec::new();

        for candidate in candidates {
            let label = discovery::describe(&candidate);
            tried.push(label.clone());

            let server = match self.add_server(candidate.clone()).await {
                Ok(server) => server,
                Err(e) => {
                    tracing::debug!(candidate = %label, error = %e, "discovery candidate rejected");
                    continue;
                }
            };

            let probe = async {
                server.start().await?;
                server.list_tools(cancel).await
            };
            match probe.await {
                Ok(tools) => {
                    tracing::info!(
                        server = %candidate.name,
                        candidate = %label,
                        tools = tools.len(),
                        "discovered MCP server"
                    );
                    return Ok(candidate);
                }
                Err(e) => {
                    tracing::debug!(candidate = %label, error = %e, "discovery candidate failed");
                    if let Err(e) = self.remove_server(&candidate.name).await {
                        tracing::debug!(candidate = %label, error = %e, "failed to remove candidate");
                    }
                }
            }
        }

        Err(McpError::DiscoveryFailed {
            target: "GitHub MCP server".into(),
            tried,
        })
    }
}

// ─── Fan-out Helpers ─────────────────────────────────────────────────────────

/// Run `op` on every server in its own task and wait for all of them.
async fn fan_out<T, F, Fut>(
    servers: Vec<Arc<dyn McpServer>>,
    op: F,
) -> Vec<(String, Result<T, McpError>)>
where
    T: Send + 'static,
    F: Fn(Arc<dyn McpServer>) -> Fut,
    Fut: Future<Output = Result<T, McpError>> + Send + 'static,
{
    let mut names = Vec::with_capacity(servers.len());
    let mut handles = Vec::with_capacity(servers.len());
    for server in servers {
        names.push(server.name().to_string());
        handles.push(tokio::spawn(op(server)));
    }

    let joined = futures::future::join_all(handles).await;
    names
        .into_iter()
        .zip(joined)
        .map(|(name, joined)| {
            let outcome = joined.unwrap_or_else(|e| {
                Err(McpError::TransportError {
                    server: name.clone(),
                    reason: format!("task failed: {e}"),
                })
            });
            (name, outcome)
        })
        .collect()
}

fn collect_failures<T>(outcomes: Vec<(String, Result<T, McpError>)>) -> Vec<(String, McpError)> {
    outcomes
        .into_iter()
        .filter_map(|(name, outcome)| outcome.err().map(|e| (name, e)))
        .collect()
}

fn aggregate(operation: &str, mut failures: Vec<(String, McpError)>) -> Result<(), McpError> {
    if failures.is_empty() {
        return Ok(());
    }
    failures.sort_by(|a, b| a.0.cmp(&b.0));
    Err(McpError::Aggregate {
        operation: operation.to_string(),
        failures,
    })
}

/// Union the successful lists; log the failures.
fn merge_partial<T>(operation: &str, outcomes: Vec<(String, Result<Vec<T>, McpError>)>) -> Vec<T> {
    let mut merged = Vec::new();
    for (name, outcome) in outcomes {
        match outcome {
            Ok(items) => merged.extend(items),
            Err(e) => tracing::warn!(server = %name, error = %e, "failed to {operation}"),
        }
    }
    merged
}

// ─── Tests ───────────────────────────────────────────────────────────────────
