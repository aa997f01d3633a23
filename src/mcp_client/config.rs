//! Server and settings configuration.
//!
//! - [`ServerConfig`]: identity and launch parameters for one MCP server
//! - [`McpSettings`]: the top-level settings file (enabled flag, server list,
//!   discovery and start policy), loaded read-only from JSON or YAML
//!
//! Settings files may reference environment variables as `${VAR}` or
//! `${VAR:-default}`. After parsing, `MCP_HUB_*` environment variables
//! override the boolean switches.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::McpError;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Request timeout used when a config does not set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Restart budget used when a config does not set one.
pub const DEFAULT_MAX_RESTARTS: u32 = 3;

/// Env keys checked, in order, for an HTTP bearer credential.
pub const BEARER_TOKEN_ENV_KEYS: [&str; 2] = ["MCP_BEARER_TOKEN", "GITHUB_PERSONAL_ACCESS_TOKEN"];

const ENV_ENABLED: &str = "MCP_HUB_ENABLED";
const ENV_AUTO_START: &str = "MCP_HUB_AUTO_START";
const ENV_AUTO_DISCOVER: &str = "MCP_HUB_AUTO_DISCOVER";

/// Directory name under the platform config dir.
const CONFIG_DIR_NAME: &str = "mcp-hub";

// ─── ServerConfig ────────────────────────────────────────────────────────────

/// How a client talks to its server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Spawned subprocess, newline-delimited JSON on stdin/stdout.
    #[default]
    Stdio,
    /// Remote endpoint, one POST per JSON-RPC call.
    Http,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Stdio => f.write_str("stdio"),
            TransportKind::Http => f.write_str("http"),
        }
    }
}

/// Launch parameters for one MCP server.
///
/// Immutable once a client has been built from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    #[serde(rename = "type", default)]
    pub transport: TransportKind,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub auto_start: bool,
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    #[serde(default = "default_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

fn default_max_restarts() -> u32 {
    DEFAULT_MAX_RESTARTS
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

impl ServerConfig {
    /// A stdio server launched as `command args...`.
    pub fn stdio(name: &str, command: &str, args: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            transport: TransportKind::Stdio,
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: HashMap::new(),
            working_dir: None,
            url: String::new(),
            auto_start: false,
            max_restarts: DEFAULT_MAX_RESTARTS,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// An HTTP server reached at `url`.
    pub fn http(name: &str, url: &str) -> Self {
        Self {
            transport: TransportKind::Http,
            command: String::new(),
            url: url.to_string(),
            ..Self::stdio(name, "", &[])
        }
    }

    /// Check the per-transport invariants.
    pub fn validate(&self) -> Result<(), McpError> {
        if self.name.trim().is_empty() {
            return Err(McpError::ConfigError {
                reason: "server name is required".into(),
            });
        }
        match self.transport {
            TransportKind::Stdio if self.command.trim().is_empty() => Err(McpError::ConfigError {
                reason: format!("stdio server '{}' requires a command", self.name),
            }),
            TransportKind::Http if self.url.trim().is_empty() => Err(McpError::ConfigError {
                reason: format!("http server '{}' requires a url", self.name),
            }),
            _ => Ok(()),
        }
    }

    /// First non-empty bearer credential in `env`.
    pub fn bearer_token(&self) -> Option<&str> {
        BEARER_TOKEN_ENV_KEYS
            .iter()
            .filter_map(|key| self.env.get(*key))
            .map(|v| v.trim())
            .find(|v| !v.is_empty())
    }
}

// ─── Durations ───────────────────────────────────────────────────────────────

/// Parse `"500ms"`, `"30s"`, `"2m"`, `"1h"`, compounds like `"1m30s"`, or a
/// bare number of seconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("empty duration".into());
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("missing unit in duration '{input}'"))?;
        if num_end == 0 {
            return Err(format!("invalid duration '{input}'"));
        }
        let value: f64 = rest[..num_end]
            .parse()
            .map_err(|_| format!("invalid number in duration '{input}'"))?;

        let tail = &rest[num_end..];
        let unit_end = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let secs_per_unit = match &tail[..unit_end] {
            "ms" => 0.001,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            other => return Err(format!("unknown unit '{other}' in duration '{input}'")),
        };
        total = Duration::try_from_secs_f64(value * secs_per_unit)
            .ok()
            .and_then(|part| total.checked_add(part))
            .ok_or_else(|| format!("duration '{input}' is out of range"))?;
        rest = &tail[unit_end..];
    }
    Ok(total)
}

/// Render a duration the way [`parse_duration`] reads it back.
pub fn format_duration(d: Duration) -> String {
    if d.subsec_millis() != 0 || d.as_secs() == 0 {
        format!("{}ms", d.as_millis())
    } else {
        format!("{}s", d.as_secs())
    }
}

/// Serde adapter: numbers are seconds, strings go through [`parse_duration`],
/// an empty string means the default timeout.
pub mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Fractional(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        match Raw::deserialize(d)? {
            Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
            Raw::Fractional(secs) => Duration::try_from_secs_f64(secs)
                .map_err(|_| serde::de::Error::custom(format!("invalid timeout: {secs}"))),
            Raw::Text(text) if text.trim().is_empty() => Ok(super::DEFAULT_TIMEOUT),
            Raw::Text(text) => super::parse_duration(&text).map_err(serde::de::Error::custom),
        }
    }
}

// ─── Settings ────────────────────────────────────────────────────────────────

/// Top-level MCP settings file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
    #[serde(default = "default_true")]
    pub auto_start: bool,
    #[serde(default)]
    pub auto_discover: bool,
    #[serde(default = "default_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

fn default_true() -> bool {
    true
}

impl Default for McpSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            servers: Vec::new(),
            auto_start: true,
            auto_discover: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Counts reported by [`McpSettings::summary`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SettingsSummary {
    pub enabled: bool,
    pub total_servers: usize,
    pub stdio_servers: usize,
    pub http_servers: usize,
    pub auto_start_servers: usize,
    pub auto_discover: bool,
}

impl McpSettings {
    /// `<config dir>/mcp-hub/mcp_config.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(CONFIG_DIR_NAME).join("mcp_config.json"))
    }

    /// `<config dir>/mcp-hub`, shared with the template catalog override.
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(CONFIG_DIR_NAME))
    }

    /// Load settings from `path`, then apply environment overrides.
    ///
    /// A missing file yields the defaults. `.yaml`/`.yml` files are parsed as
    /// YAML, everything else as JSON.
    pub fn load(path: &Path) -> Result<Self, McpError> {
        let mut settings = match std::fs::read_to_string(path) {
            Ok(raw) => Self::parse(&raw, is_yaml(path)).map_err(|reason| McpError::ConfigError {
                reason: format!("{}: {reason}", path.display()),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no MCP settings file, using defaults");
                Self::default()
            }
            Err(e) => {
                return Err(McpError::ConfigError {
                    reason: format!("failed to read {}: {e}", path.display()),
                })
            }
        };

        settings.apply_env_overrides(|key| std::env::var(key).ok());
        tracing::info!(
            path = %path.display(),
            enabled = settings.enabled,
            servers = settings.servers.len(),
            "loaded MCP settings"
        );
        Ok(settings)
    }

    fn parse(raw: &str, yaml: bool) -> Result<Self, String> {
        let expanded = expand_env_refs(raw, |key| std::env::var(key).ok());
        if yaml {
            serde_yaml::from_str(&expanded).map_err(|e| e.to_string())
        } else {
            serde_json::from_str(&expanded).map_err(|e| e.to_string())
        }
    }

    /// Override the boolean switches from `MCP_HUB_*` variables.
    ///
    /// Unrecognised values are ignored with a warning.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let targets: [(&str, &mut bool); 3] = [
            (ENV_ENABLED, &mut self.enabled),
            (ENV_AUTO_START, &mut self.auto_start),
            (ENV_AUTO_DISCOVER, &mut self.auto_discover),
        ];
        for (key, slot) in targets {
            let Some(raw) = lookup(key) else { continue };
            match parse_flag(&raw) {
                Some(value) => *slot = value,
                None => tracing::warn!(key, value = %raw, "ignoring unrecognised boolean override"),
            }
        }
    }

    /// Check every server config and reject duplicate names.
    pub fn validate(&self) -> Result<(), McpError> {
        let mut seen = std::collections::HashSet::new();
        for server in &self.servers {
            server.validate()?;
            if !seen.insert(server.name.as_str()) {
                return Err(McpError::ConfigError {
                    reason: format!("duplicate server name '{}'", server.name),
                });
            }
        }
        Ok(())
    }

    /// Servers to register; empty when MCP is disabled.
    pub fn enabled_servers(&self) -> Vec<ServerConfig> {
        if !self.enabled {
            return Vec::new();
        }
        self.servers.clone()
    }

    /// Look up a server by name.
    pub fn server(&self, name: &str) -> Option<&ServerConfig> {
        self.servers.iter().find(|s| s.name == name)
    }

    /// Add a server in memory. Nothing is persisted.
    pub fn add_server(&mut self, config: ServerConfig) -> Result<(), McpError> {
        config.validate()?;
        if self.server(&config.name).is_some() {
            return Err(McpError::DuplicateServer { name: config.name });
        }
        self.servers.push(config);
        Ok(())
    }

    /// Remove a server in memory.
    pub fn remove_server(&mut self, name: &str) -> Result<ServerConfig, McpError> {
        let idx = self
            .servers
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| McpError::UnknownServer {
                name: name.to_string(),
            })?;
        Ok(self.servers.remove(idx))
    }

    pub fn summary(&self) -> SettingsSummary {
        let count = |kind: TransportKind| self.servers.iter().filter(|s| s.transport == kind).count();
        SettingsSummary {
            enabled: self.enabled,
            total_servers: self.servers.len(),
            stdio_servers: count(TransportKind::Stdio),
            http_servers: count(TransportKind::Http),
            auto_start_servers: self.servers.iter().filter(|s| s.auto_start).count(),
            auto_discover: self.auto_discover,
        }
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ─── Env References ──────────────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` using `lookup`.
///
/// Unset variables without a default become empty. A default starting with
/// `~` is expanded to the home directory. An unterminated `${` is kept as-is.
pub fn expand_env_refs(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };

        let expr = &after[..end];
        let (key, fallback) = match expr.split_once(":-") {
            Some((key, fallback)) => (key, Some(fallback)),
            None => (expr, None),
        };
        let value = lookup(key)
            .filter(|v| !v.is_empty() || fallback.is_none())
            .or_else(|| fallback.map(expand_home))
            .unwrap_or_default();
        out.push_str(&value);
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

fn expand_home(path: &str) -> String {
    match (path.strip_prefix('~'), dirs::home_dir()) {
        (Some(rest), Some(home)) => format!("{}{rest}", home.display()),
        _ => path.to_string(),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
