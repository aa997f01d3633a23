//! MCP client for servers spawned as child processes.
//!
//! `Created → Running → Initialized → Stopped`, with `Stopped` reachable
//! from any state. `start` spawns the process and its two reader tasks,
//! `initialize` runs lazily on first use, `stop` tears everything down and
//! resets state so the same client can be started again.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::config::ServerConfig;
use super::errors::McpError;
use super::lifecycle::{self, SpawnedProcess, SHUTDOWN_GRACE};
use super::protocol;
use super::server::{McpServer, ServerStatus};
use super::transport::{spawn_reader, PendingRequests, StdioTransport};
use super::types::InitializeResult;

#[derive(Debug, Default)]
struct ClientState {
    running: bool,
    initialized: bool,
    restart_count: u32,
    started_at: Option<DateTime<Utc>>,
    server_info: Option<InitializeResult>,
}

/// Everything owned by one running process.
struct Connection {
    child: tokio::process::Child,
    transport: Arc<StdioTransport>,
    shutdown: CancellationToken,
    reader: JoinHandle<()>,
    stderr: JoinHandle<()>,
}

/// Client for one stdio MCP server.
pub struct StdioClient {
    config: ServerConfig,
    state: RwLock<ClientState>,
    /// Held for the whole of `start`/`stop`.
    connection: Mutex<Option<Connection>>,
    /// Cloned out by requests so they never wait on `connection`.
    transport: RwLock<Option<Arc<StdioTransport>>>,
    init_lock: Mutex<()>,
}

impl StdioClient {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            state: RwLock::new(ClientState::default()),
            connection: Mutex::new(None),
            transport: RwLock::new(None),
            init_lock: Mutex::new(()),
        }
    }

    /// Number of times `start` has launched a process.
    pub async fn restart_count(&self) -> u32 {
        self.state.read().await.restart_count
    }

    async fn current_transport(&self) -> Result<Arc<StdioTransport>, McpError> {
        self.transport
            .read()
            .await
            .clone()
            .ok_or_else(|| McpError::NotRunning {
                name: self.config.name.clone(),
            })
    }
}

#[async_trait]
impl McpServer for StdioClient {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn config(&self) -> &ServerConfig {
        &self.config
    }

    async fn start(&self) -> Result<(), McpError> {
        let mut connection = self.connection.lock().await;
        if connection.is_some() {
            tracing::debug!(server = %self.config.name, "start ignored, already running");
            return Ok(());
        }

        let SpawnedProcess {
            child,
            stdin,
            stdout,
            stderr,
        } = lifecycle::spawn_process(&self.config)?;

        let name = &self.config.name;
        let pending = PendingRequests::new();
        let shutdown = CancellationToken::new();
        let reader = spawn_reader(name, stdout, pending.clone(), shutdown.clone());
        let stderr = lifecycle::spawn_stderr_drain(name, stderr, shutdown.clone());
        let transport = Arc::new(StdioTransport::new(name, stdin, pending));

        *self.transport.write().await = Some(transport.clone());
        *connection = Some(Connection {
            child,
            transport,
            shutdown,
            reader,
            stderr,
        });

        let mut state = self.state.write().await;
        state.running = true;
        state.initialized = false;
        state.restart_count += 1;
        state.started_at = Some(Utc::now());

        tracing::info!(
            server = %name,
            command = %self.config.command,
            restart_count = state.restart_count,
            "server started"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<(), McpError> {
        let mut slot = self.connection.lock().await;
        let Some(mut conn) = slot.take() else {
            return Ok(());
        };

        *self.transport.write().await = None;
        conn.shutdown.cancel();
        conn.transport.close().await;
        let _ = conn.reader.await;
        let _ = conn.stderr.await;

        let exit = lifecycle::shutdown_process(&self.config.name, &mut conn.child, SHUTDOWN_GRACE).await;

        {
            let mut state = self.state.write().await;
            state.running = false;
            state.initialized = false;
            state.started_at = None;
            state.server_info = None;
        }

        match &exit {
            Ok(status) => tracing::info!(server = %self.config.name, %status, "server stopped"),
            Err(e) => tracing::warn!(server = %self.config.name, error = %e, "server stopped uncleanly"),
        }
        exit.map(|_| ())
    }

    async fn is_running(&self) -> bool {
        self.state.read().await.running
    }

    async fn status(&self) -> ServerStatus {
        let state = self.state.read().await;
        ServerStatus {
            name: self.config.name.clone(),
            transport: self.config.transport,
            running: state.running,
            initialized: state.initialized,
            restart_count: state.restart_count,
            started_at: state.started_at,
        }
    }

    async fn server_info(&self) -> Option<InitializeResult> {
        self.state.read().await.server_info.clone()
    }

    async fn initialize(&self, cancel: &CancellationToken) -> Result<(), McpError> {
        if self.state.read().await.initialized {
            return Ok(());
        }
        let _guard = self.init_lock.lock().await;
        if self.state.read().await.initialized {
            return Ok(());
        }

        let transport = self.current_transport().await?;
        let result = transport
            .request(
                protocol::METHOD_INITIALIZE,
                Some(protocol::stdio_initialize_params()),
                self.config.timeout,
                cancel,
            )
            .await?;
        let info: InitializeResult =
            protocol::decode(&self.config.name, protocol::METHOD_INITIALIZE, result)?;

        if let Err(e) = transport
            .notify(protocol::METHOD_INITIALIZED, None, self.config.timeout, cancel)
            .await
        {
            tracing::warn!(server = %self.config.name, error = %e, "failed to send initialized notification");
        }

        tracing::info!(
            server = %self.config.name,
            server_name = %info.server_info.name,
            server_version = %info.server_info.version,
            protocol = %info.protocol_version,
            "server initialized"
        );

        let mut state = self.state.write().await;
        state.initialized = true;
        state.server_info = Some(info);
        Ok(())
    }

    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        cancel: &CancellationToken,
    ) -> Result<Value, McpError> {
        let transport = self.current_transport().await?;
        transport
            .request(method, params, self.config.timeout, cancel)
            .await
    }
}
