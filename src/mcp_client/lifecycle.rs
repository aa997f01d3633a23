//! Server process lifecycle management.
//!
//! Spawning MCP server child processes with piped stdio, draining their
//! stderr into the log, and shutting them down: close stdin, wait out a
//! grace period, then force-kill and reap.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::config::ServerConfig;
use super::errors::McpError;

// ─── Constants ───────────────────────────────────────────────────────────────

/// How long a server gets to exit on its own after stdin closes.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Base delay between restart attempts (doubles each time).
const RESTART_BASE_DELAY: Duration = Duration::from_secs(1);

/// Upper bound on a single restart delay.
const RESTART_MAX_DELAY: Duration = Duration::from_secs(30);

// ─── Spawning ────────────────────────────────────────────────────────────────

/// A freshly spawned server with its three pipes detached from the child.
pub struct SpawnedProcess {
    pub child: Child,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// Spawn the server process described by a stdio config.
///
/// The child inherits the parent environment plus `config.env`, and is
/// killed if its handle is dropped without a shutdown.
pub fn spawn_process(config: &ServerConfig) -> Result<SpawnedProcess, McpError> {
    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args);
    cmd.envs(&config.env);
    if let Some(dir) = &config.working_dir {
        cmd.current_dir(dir);
    }

    // Windows: prevent console window from appearing for child processes
    #[cfg(target_os = "windows")]
    {
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
        name: config.name.clone(),
        reason: format!("{}: {e}", config.command),
    })?;

    let missing = |stream: &str| McpError::SpawnFailed {
        name: config.name.clone(),
        reason: format!("failed to capture {stream}"),
    };
    let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
    let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
    let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

    tracing::debug!(
        server = %config.name,
        command = %config.command,
        args = ?config.args,
        pid = child.id(),
        "spawned server process"
    );

    Ok(SpawnedProcess {
        child,
        stdin,
        stdout,
        stderr,
    })
}

/// Forward a server's stderr to the log, line by line.
///
/// Never parsed as protocol data.
pub fn spawn_stderr_drain(
    server_name: &str,
    stderr: ChildStderr,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let server = server_name.to_string();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                next = lines.next_line() => match next {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => tracing::debug!(server = %server, stderr = %line, "server stderr"),
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!(server = %server, error = %e, "stderr read failed");
                        break;
                    }
                },
            }
        }
    })
}

// ─── Shutdown ────────────────────────────────────────────────────────────────

/// Wait up to `grace` for the child to exit, then kill it and wait again.
///
/// The post-kill wait has no bound: a process that survives SIGKILL keeps
/// this call pending rather than being left unreaped.
pub async fn shutdown_process(
    name: &str,
    child: &mut Child,
    grace: Duration,
) -> Result<ExitStatus, McpError> {
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            tracing::debug!(server = name, %status, "server exited");
            Ok(status)
        }
        Ok(Err(e)) => Err(McpError::TransportError {
            server: name.to_string(),
            reason: format!("failed waiting for process exit: {e}"),
        }),
        Err(_) => {
            tracing::warn!(
                server = name,
                grace_ms = grace.as_millis() as u64,
                "server did not exit in time, killing"
            );
            child.start_kill().map_err(|e| McpError::TransportError {
                server: name.to_string(),
                reason: format!("failed to kill process: {e}"),
            })?;
            child.wait().await.map_err(|e| McpError::TransportError {
                server: name.to_string(),
                reason: format!("failed waiting for killed process: {e}"),
            })
        }
    }
}

/// Backoff before restart attempt `attempt` (1-based): 1s, 2s, 4s, ...
pub fn restart_delay(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    RESTART_BASE_DELAY
        .saturating_mul(2u32.pow(exp))
        .min(RESTART_MAX_DELAY)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
