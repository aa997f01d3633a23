//! MCP error types.
//!
//! One enum covers every failure the core can surface:
//! - launch failures (process spawn, HTTP client construction)
//! - protocol errors returned by a server in the JSON-RPC `error` field
//! - transport failures (broken pipe, bad HTTP status, unparseable body)
//! - timeouts and cancellation, kept distinct from protocol errors
//! - lifecycle and configuration misuse
//!
//! Non-JSON lines on a stdio server's stdout are not errors and never
//! produce a variant here.

use thiserror::Error;

/// Errors that can occur during MCP client and manager operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// A server process failed to start or its stdio could not be attached.
    #[error("failed to spawn server '{name}': {reason}")]
    SpawnFailed { name: String, reason: String },

    /// The HTTP client for a remote server could not be built.
    #[error("failed to build HTTP client for server '{name}': {reason}")]
    HttpClientBuild { name: String, reason: String },

    /// I/O level failure talking to a server (closed pipe, connection refused).
    #[error("transport error for server '{server}': {reason}")]
    TransportError { server: String, reason: String },

    /// The server answered with a JSON-RPC error object.
    #[error("server '{server}' returned error for '{method}' [{code}]: {message}")]
    ProtocolError {
        server: String,
        method: String,
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// An HTTP server answered with a non-2xx status.
    #[error("server '{server}' returned HTTP {status}: {body}")]
    HttpStatus {
        server: String,
        status: u16,
        body: String,
    },

    /// A response arrived but could not be decoded into the expected shape.
    #[error("malformed response from server '{server}': {reason}")]
    MalformedResponse { server: String, reason: String },

    /// No response arrived within the configured window.
    #[error("request '{method}' to server '{server}' timed out after {timeout_ms}ms")]
    Timeout {
        server: String,
        method: String,
        timeout_ms: u64,
    },

    /// The caller cancelled the request before a response arrived.
    #[error("request '{method}' to server '{server}' was cancelled")]
    Cancelled { server: String, method: String },

    /// The operation needs a running client.
    #[error("server '{name}' is not running")]
    NotRunning { name: String },

    /// No server registered under this name.
    #[error("unknown server: '{name}'")]
    UnknownServer { name: String },

    /// A server with this name is already registered.
    #[error("server '{name}' is already registered")]
    DuplicateServer { name: String },

    /// All restart attempts exhausted for a server.
    #[error("server '{name}' failed after {attempts} restart attempts")]
    RestartExhausted { name: String, attempts: u32 },

    /// Invalid server configuration or settings file.
    #[error("config error: {reason}")]
    ConfigError { reason: String },

    /// No template registered under this id.
    #[error("unknown template: '{id}'")]
    UnknownTemplate { id: String },

    /// A template failed validation on insertion.
    #[error("invalid template: {reason}")]
    InvalidTemplate { reason: String },

    /// A fan-out operation failed on one or more servers.
    #[error("{operation} failed for {} server(s): {}", failures.len(), render_failures(failures))]
    Aggregate {
        operation: String,
        failures: Vec<(String, McpError)>,
    },

    /// Every discovery candidate failed its liveness probe.
    #[error("{target} discovery failed, tried: {}", tried.join(", "))]
    DiscoveryFailed { target: String, tried: Vec<String> },
}

impl McpError {
    /// True for the timeout variant.
    pub fn is_timeout(&self) -> bool {
        matches!(self, McpError::Timeout { .. })
    }

    /// Per-server failures carried by an aggregate error.
    pub fn failures(&self) -> &[(String, McpError)] {
        match self {
            McpError::Aggregate { failures, .. } => failures,
            _ => &[],
        }
    }
}

fn render_failures(failures: &[(String, McpError)]) -> String {
    failures
        .iter()
        .map(|(name, err)| format!("{name}: {err}"))
        .collect::<Vec<_>>()
        .join("; ")
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_lists_every_failure() {
        let err = McpError::Aggregate {
            operation: "start".into(),
            failures: vec![
                (
                    "a".into(),
                    McpError::NotRunning { name: "a".into() },
                ),
                (
                    "b".into(),
                    McpError::SpawnFailed {
                        name: "b".into(),
                        reason: "no such file".into(),
                    },
                ),
            ],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("start failed for 2 server(s)"));
        assert!(msg.contains("a: server 'a' is not running"));
        assert!(msg.contains("no such file"));
        assert_eq!(err.failures().len(), 2);
    }

    #[test]
    fn test_timeout_is_distinct_from_protocol_error() {
        let timeout = McpError::Timeout {
            server: "s".into(),
            method: "tools/list".into(),
            timeout_ms: 100,
        };
        let protocol = McpError::ProtocolError {
            server: "s".into(),
            method: "tools/list".into(),
            code: -32601,
            message: "nope".into(),
            data: None,
        };
        assert!(timeout.is_timeout());
        assert!(!protocol.is_timeout());
        assert!(protocol.failures().is_empty());
    }
}
