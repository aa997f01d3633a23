//! MCP client for remote servers over HTTP.
//!
//! Each JSON-RPC call is one POST carrying one envelope. There is no
//! correlation table: the HTTP exchange itself pairs request and response.
//! Session continuity comes from two places:
//! - a cookie store shared by every call on the client
//! - the `Mcp-Session-Id` header captured from the `initialize` response and
//!   replayed on every later call (never on `initialize` itself)
//!
//! `start`/`stop` only flip state; there is no process to manage.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderValue, ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use super::config::ServerConfig;
use super::errors::McpError;
use super::protocol;
use super::server::{McpServer, ServerStatus};
use super::transport::next_request_id;
use super::types::{Envelope, InitializeResult};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Session header issued on `initialize` and echoed afterwards.
pub const SESSION_HEADER: &str = "Mcp-Session-Id";

const ACCEPT_VALUE: &str = "application/json, text/event-stream";

/// Connect timeout, capped by the config's request timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest body excerpt quoted in an HTTP status error.
const MAX_ERROR_BODY: usize = 500;

// ─── HttpClient ──────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct HttpState {
    running: bool,
    initialized: bool,
    session_id: Option<String>,
    restart_count: u32,
    started_at: Option<DateTime<Utc>>,
    server_info: Option<InitializeResult>,
}

/// Client for one HTTP MCP server.
pub struct HttpClient {
    config: ServerConfig,
    http: reqwest::Client,
    state: RwLock<HttpState>,
    init_lock: Mutex<()>,
}

impl HttpClient {
    /// Build the underlying HTTP client. Fails only if TLS or the cookie
    /// store cannot be set up.
    pub fn new(config: ServerConfig) -> Result<Self, McpError> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .connect_timeout(CONNECT_TIMEOUT.min(config.timeout))
            .timeout(config.timeout)
            .build()
            .map_err(|e| McpError::HttpClientBuild {
                name: config.name.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            config,
            http,
            state: RwLock::new(HttpState::default()),
            init_lock: Mutex::new(()),
        })
    }

    /// Session id captured from `initialize`, if the server issued one.
    pub async fn session_id(&self) -> Option<String> {
        self.state.read().await.session_id.clone()
    }

    async fn ensure_running(&self) -> Result<(), McpError> {
        if self.state.read().await.running {
            Ok(())
        } else {
            Err(McpError::NotRunning {
                name: self.config.name.clone(),
            })
        }
    }

    /// POST one envelope. Returns the decoded response (if the server sent a
    /// body) and any session header it carried.
    async fn post(
        &self,
        envelope: &Envelope,
        with_session: bool,
        cancel: &CancellationToken,
    ) -> Result<(Option<Envelope>, Option<String>), McpError> {
        let method = envelope.method.clone().unwrap_or_default();

        let mut request = self
            .http
            .post(&self.config.url)
            .header(ACCEPT, HeaderValue::from_static(ACCEPT_VALUE))
            .json(envelope);
        if let Some(token) = self.config.bearer_token() {
            request = request.bearer_auth(token);
        }
        if with_session {
            if let Some(session) = self.session_id().await {
                request = request.header(SESSION_HEADER, session);
            }
        }

        let exchange = async {
            let response = request.send().await.map_err(|e| self.send_error(&method, e))?;

            let status = response.status();
            let session = response
                .headers()
                .get(SESSION_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let is_stream = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|ct| ct.starts_with("text/event-stream"));
            let body = response.text().await.map_err(|e| self.send_error(&method, e))?;

            if !status.is_success() {
                return Err(McpError::HttpStatus {
                    server: self.config.name.clone(),
                    status: status.as_u16(),
                    body: truncate(body.trim(), MAX_ERROR_BODY),
                });
            }
            if body.trim().is_empty() {
                return Ok((None, session));
            }

            let parsed = parse_body(&body, is_stream).map_err(|reason| McpError::MalformedResponse {
                server: self.config.name.clone(),
                reason: format!("failed to parse '{method}' response: {reason}"),
            })?;
            Ok((Some(parsed), session))
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(McpError::Cancelled {
                server: self.config.name.clone(),
                method: method.clone(),
            }),
            outcome = exchange => outcome,
        }
    }

    /// POST a request envelope and unwrap its `result`.
    async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        with_session: bool,
        cancel: &CancellationToken,
    ) -> Result<(Value, Option<String>), McpError> {
        let envelope = Envelope::request(next_request_id(), method, params);
        let (response, session) = self.post(&envelope, with_session, cancel).await?;
        let response = response.ok_or_else(|| McpError::MalformedResponse {
            server: self.config.name.clone(),
            reason: format!("empty body in '{method}' response"),
        })?;
        let result = protocol::extract_result(&self.config.name, method, response)?;
        Ok((result, session))
    }

    fn send_error(&self, method: &str, err: reqwest::Error) -> McpError {
        if err.is_timeout() {
            McpError::Timeout {
                server: self.config.name.clone(),
                method: method.to_string(),
                timeout_ms: self.config.timeout.as_millis() as u64,
            }
        } else {
            McpError::TransportError {
                server: self.config.name.clone(),
                reason: format!("'{method}' request failed: {err}"),
            }
        }
    }
}

#[async_trait]
impl McpServer for HttpClient {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn config(&self) -> &ServerConfig {
        &self.config
    }

    async fn start(&self) -> Result<(), McpError> {
        let mut state = self.state.write().await;
        if state.running {
            return Ok(());
        }
        state.running = true;
        state.restart_count += 1;
        state.started_at = Some(Utc::now());
        tracing::info!(server = %self.config.name, url = %self.config.url, "server started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), McpError> {
        let mut state = self.state.write().await;
        if !state.running {
            return Ok(());
        }
        state.running = false;
        state.initialized = false;
        state.session_id = None;
        state.started_at = None;
        state.server_info = None;
        tracing::info!(server = %self.config.name, "server stopped");
        Ok(())
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
        self.ensure_running().await?;

        let (result, session) = self
            .call(
                protocol::METHOD_INITIALIZE,
                Some(protocol::http_initialize_params()),
                false,
                cancel,
            )
            .await?;
        let info: InitializeResult =
            protocol::decode(&self.config.name, protocol::METHOD_INITIALIZE, result)?;

        {
            let mut state = self.state.write().await;
            if session.is_some() {
                state.session_id = session;
            }
        }

        let initialized = Envelope::notification(protocol::METHOD_INITIALIZED, None);
        if let Err(e) = self.post(&initialized, true, cancel).await {
            tracing::warn!(server = %self.config.name, error = %e, "failed to send initialized notification");
        }

        let has_session = self.session_id().await.is_some();
        tracing::info!(
            server = %self.config.name,
            server_name = %info.server_info.name,
            protocol = %info.protocol_version,
            session = has_session,
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
        self.ensure_running().await?;
        let (result, _) = self.call(method, params, true, cancel).await?;
        Ok(result)
    }
}

// ─── Body Parsing ────────────────────────────────────────────────────────────

/// Decode a response body: a single JSON envelope, or for event streams the
/// last `data:` payload that is a response.
fn parse_body(body: &str, is_stream: bool) -> Result<Envelope, String> {
    if !is_stream {
        return serde_json::from_str(body.trim()).map_err(|e| e.to_string());
    }

    let mut last = None;
    for event in body.split("\n\n") {
        let data = event
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(str::trim_start)
            .collect::<Vec<_>>()
            .join("\n");
        if data.is_empty() {
            continue;
        }
        if let Ok(envelope) = serde_json::from_str::<Envelope>(&data) {
            if envelope.is_response() {
                last = Some(envelope);
            }
        }
    }
    last.ok_or_else(|| "event stream carried no response envelope".to_string())
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...(truncated)", &text[..end])
}

// ─── Tests ───────────────────────────────────────────────────────────────────
