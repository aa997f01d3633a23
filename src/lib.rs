//! mcp-hub: client-side Model Context Protocol plumbing.
//!
//! Connects to MCP servers over stdio (child processes) or HTTP, keeps them
//! under one [`mcp_client::McpManager`], and exposes their tools, resources
//! and prompts through a single transport-independent interface.

pub mod mcp_client;

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;

pub use mcp_client::{McpError, McpManager, McpServer, McpSettings, ServerConfig};

/// Log file name inside the log directory.
pub const LOG_FILE: &str = "mcp-hub.log";

/// Rotated log files kept next to the current one.
const LOG_KEEP: u32 = 3;

/// Platform data directory for mcp-hub.
///
/// - macOS: `~/Library/Application Support/mcp-hub/`
/// - Windows: `{FOLDERID_RoamingAppData}\mcp-hub\`
/// - Linux: `$XDG_DATA_HOME/mcp-hub/` (fallback `~/.local/share/mcp-hub/`)
///
/// Falls back to `~/.mcp-hub/` when none of the above resolve.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("mcp-hub");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mcp-hub")
}

/// Install the global tracing subscriber.
///
/// With `log_dir`, logs go to `<log_dir>/mcp-hub.log` after rotating older
/// files (`.1` → `.2` → `.3`); otherwise to stderr. `RUST_LOG` overrides the
/// default `mcp_hub=info,warn` filter. Once a global subscriber is set, later
/// calls return `Ok` without touching the log files.
pub fn init_tracing(log_dir: Option<&Path>) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mcp_hub=info,warn"));

    let Some(log_dir) = log_dir else {
        fmt::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;
        return Ok(());
    };

    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log dir {}", log_dir.display()))?;
    let log_path = log_dir.join(LOG_FILE);
    rotate_log_file(&log_path, LOG_KEEP);

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("failed to open {}", log_path.display()))?;

    fmt::fmt()
        .with_env_filter(filter)
        .with_writer(FlushingWriter::new(log_file))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_file = %log_path.display(),
        pid = std::process::id(),
        "mcp-hub logging started"
    );
    Ok(())
}

/// Shift `base` → `base.1` → … → `base.{keep}`, dropping the oldest.
/// Gaps in the chain are skipped.
fn rotate_log_file(base: &Path, keep: u32) {
    let numbered = |i: u32| PathBuf::from(format!("{}.{i}", base.display()));

    let _ = std::fs::remove_file(numbered(keep));
    for i in (1..keep).rev() {
        let _ = std::fs::rename(numbered(i), numbered(i + 1));
    }
    if base.exists() {
        let _ = std::fs::rename(base, numbered(1));
    }
}

/// File writer that flushes after every write so log lines survive a crash.
#[derive(Clone)]
struct FlushingWriter {
    file: std::sync::Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: std::sync::Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

impl Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("log file lock poisoned: {e}")))?;
        let n = f.write(buf)?;
        f.flush()?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("log file lock poisoned: {e}")))?;
        f.flush()
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
