//! JSON-RPC over stdio transport.
//!
//! Handles the request/response correlation for one MCP server process:
//! - Writing newline-delimited request envelopes to the server's stdin
//! - A background reader that dispatches stdout envelopes by id
//! - A pending table of one-shot slots, one per in-flight request
//!
//! Requests race their response against a timeout and a cancellation token.
//! Whichever loses, the pending entry is removed, so a late response finds no
//! slot and is dropped. Lines on stdout that are not JSON envelopes (banners,
//! log output) are skipped without stopping the reader.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::errors::McpError;
use super::protocol::extract_result;
use super::types::{Envelope, RequestId};

// ─── Request ID Generator ────────────────────────────────────────────────────

/// Process-wide monotonic request id counter, shared by every client.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a unique request id.
pub fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

// ─── Pending Requests ────────────────────────────────────────────────────────

/// In-flight requests keyed by the canonical form of their id.
#[derive(Clone, Default)]
pub struct PendingRequests {
    slots: Arc<RwLock<HashMap<String, oneshot::Sender<Envelope>>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a slot for `key` before the request is written.
    pub async fn register(&self, key: String) -> oneshot::Receiver<Envelope> {
        let (tx, rx) = oneshot::channel();
        self.slots.write().await.insert(key, tx);
        rx
    }

    /// Hand a response to its waiter. Returns `false` when no slot exists,
    /// i.e. the id is unknown or its request was already abandoned.
    pub async fn deliver(&self, response: Envelope) -> bool {
        let Some(id) = response.id.as_ref() else {
            return false;
        };
        let slot = self.slots.write().await.remove(&id.key());
        match slot {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }

    /// Drop the slot for an abandoned request.
    pub async fn forget(&self, key: &str) {
        self.slots.write().await.remove(key);
    }

    /// Drop every slot. Waiters observe a closed channel.
    pub async fn clear(&self) -> usize {
        let mut slots = self.slots.write().await;
        let n = slots.len();
        slots.clear();
        n
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.read().await.is_empty()
    }
}

// ─── Transport ───────────────────────────────────────────────────────────────

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Writing half of a stdio JSON-RPC connection plus its pending table.
///
/// The reading half runs as a separate task started with [`spawn_reader`].
pub struct StdioTransport {
    server_name: String,
    writer: Mutex<Option<BoxedWriter>>,
    pending: PendingRequests,
}

impl StdioTransport {
    /// Wrap a writer (normally a child's stdin).
    pub fn new<W>(server_name: &str, writer: W, pending: PendingRequests) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            server_name: server_name.to_string(),
            writer: Mutex::new(Some(Box::new(writer))),
            pending,
        }
    }

    pub fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    /// Send a request and wait for the matching response's `result`.
    ///
    /// `timeout` covers both writing the request and waiting for the reply.
    /// Cancellation wins over a response or timeout that is ready at the
    /// same moment.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, McpError> {
        let deadline = Instant::now() + timeout;
        let id = RequestId::from(next_request_id());
        let key = id.key();
        let envelope = Envelope::request(id, method, params);

        let rx = self.pending.register(key.clone()).await;
        if let Err(e) = self.write_within(&envelope, method, deadline, timeout, cancel).await {
            self.pending.forget(&key).await;
            return Err(e);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.pending.forget(&key).await;
                Err(self.cancelled(method))
            }
            reply = rx => match reply {
                Ok(response) => extract_result(&self.server_name, method, response),
                Err(_) => Err(McpError::TransportError {
                    server: self.server_name.clone(),
                    reason: format!("connection closed before '{method}' was answered"),
                }),
            },
            _ = tokio::time::sleep_until(deadline) => {
                self.pending.forget(&key).await;
                tracing::warn!(
                    server = %self.server_name,
                    method,
                    request_id = %key,
                    timeout_ms = timeout.as_millis() as u64,
                    "request timed out"
                );
                Err(self.timed_out(method, timeout))
            }
        }
    }

    /// Send a notification (no response expected), bounded like a request.
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), McpError> {
        let envelope = Envelope::notification(method, params);
        self.write_within(&envelope, method, Instant::now() + timeout, timeout, cancel)
            .await
    }

    /// Shut down and drop the writer, closing the server's stdin.
    pub async fn close(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                tracing::debug!(server = %self.server_name, error = %e, "stdin shutdown failed");
            }
        }
    }

    /// Write one envelope unless `deadline` passes or `cancel` fires first.
    ///
    /// A write abandoned midway leaves a partial line on stdin, after which
    /// the stream can no longer be framed; the writer is dropped so later
    /// calls fail instead of sending garbage.
    async fn write_within(
        &self,
        envelope: &Envelope,
        method: &str,
        deadline: Instant,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), McpError> {
        let mut line = serde_json::to_string(envelope).map_err(|e| McpError::TransportError {
            server: self.server_name.clone(),
            reason: format!("failed to serialize request: {e}"),
        })?;
        line.push('\n');

        let mut started = false;
        let abandoned = tokio::select! {
            biased;
            _ = cancel.cancelled() => self.cancelled(method),
            written = self.write_line(&line, &mut started) => return written,
            _ = tokio::time::sleep_until(deadline) => self.timed_out(method, timeout),
        };

        if started {
            tracing::warn!(
                server = %self.server_name,
                method,
                "write to stdin abandoned midway, closing stdin"
            );
            self.writer.lock().await.take();
        }
        Err(abandoned)
    }

    async fn write_line(&self, line: &str, started: &mut bool) -> Result<(), McpError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or_else(|| McpError::TransportError {
            server: self.server_name.clone(),
            reason: "stdin is closed".into(),
        })?;
        *started = true;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| McpError::TransportError {
                server: self.server_name.clone(),
                reason: format!("failed to write to stdin: {e}"),
            })?;
        writer.flush().await.map_err(|e| McpError::TransportError {
            server: self.server_name.clone(),
            reason: format!("failed to flush stdin: {e}"),
        })
    }

    fn cancelled(&self, method: &str) -> McpError {
        McpError::Cancelled {
            server: self.server_name.clone(),
            method: method.to_string(),
        }
    }

    fn timed_out(&self, method: &str, timeout: Duration) -> McpError {
        McpError::Timeout {
            server: self.server_name.clone(),
            method: method.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }
}

// ─── Reader ──────────────────────────────────────────────────────────────────

/// Start the stdout dispatcher for one server.
///
/// Runs until EOF, a read error, or `shutdown` fires. On exit every
/// remaining waiter is released with a closed channel.
pub fn spawn_reader<R>(
    server_name: &str,
    reader: R,
    pending: PendingRequests,
    shutdown: CancellationToken,
) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let server = server_name.to_string();
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                next = lines.next_line() => match next {
                    Ok(Some(line)) => dispatch_line(&server, &line, &pending).await,
                    Ok(None) => {
                        tracing::debug!(server = %server, "server stdout closed");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(server = %server, error = %e, "failed to read server stdout");
                        break;
                    }
                },
            }
        }

        let abandoned = pending.clear().await;
        if abandoned > 0 {
            tracing::debug!(server = %server, abandoned, "released waiters after reader exit");
        }
    })
}

/// Route one stdout line. Anything that is not a response envelope is
/// skipped.
pub async fn dispatch_line(server: &str, line: &str, pending: &PendingRequests) {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return;
    }
    if !trimmed.starts_with('{') {
        tracing::trace!(server, line = trimmed, "skipping non-JSON stdout line");
        return;
    }

    let envelope: Envelope = match serde_json::from_str(trimmed) {
        Ok(env) => env,
        Err(e) => {
            tracing::debug!(server, error = %e, "skipping unparseable stdout line");
            return;
        }
    };

    if envelope.is_response() {
        let id = envelope.id.as_ref().map(|id| id.key()).unwrap_or_default();
        if !pending.deliver(envelope).await {
            tracing::debug!(server, request_id = %id, "response for unknown or abandoned id");
        }
    } else if let Some(method) = envelope.method.as_deref() {
        tracing::debug!(server, method, "ignoring server-initiated message");
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
