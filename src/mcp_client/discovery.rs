//! Candidate launch configurations for well-known servers.
//!
//! Discovery itself (add, start, probe, fall through) lives on the manager;
//! this module only knows which commands are worth trying and in what order.

use std::collections::HashMap;

use super::config::{ServerConfig, DEFAULT_TIMEOUT};

/// Name under which a discovered GitHub server is registered.
pub const GITHUB_SERVER_NAME: &str = "github";

/// Env var carrying the GitHub token, forwarded to candidates when set.
pub const GITHUB_TOKEN_ENV: &str = "GITHUB_PERSONAL_ACCESS_TOKEN";

// ─── Platform Helpers ────────────────────────────────────────────────────────

/// Platform-correct npx command.
///
/// Windows requires `npx.cmd` because `npx` is a batch script;
/// `Command::new("npx")` fails without the extension on Windows.
fn npx_command() -> &'static str {
    if cfg!(target_os = "windows") {
        "npx.cmd"
    } else {
        "npx"
    }
}

// ─── Candidates ──────────────────────────────────────────────────────────────

/// GitHub server candidates in preference order: the npm package first,
/// then the Python one via `uvx`.
pub fn github_candidates() -> Vec<ServerConfig> {
    github_candidates_with(|key| std::env::var(key).ok())
}

/// Same as [`github_candidates`] with an explicit env lookup.
pub fn github_candidates_with(lookup: impl Fn(&str) -> Option<String>) -> Vec<ServerConfig> {
    let env: HashMap<String, String> = lookup(GITHUB_TOKEN_ENV)
        .filter(|token| !token.trim().is_empty())
        .map(|token| HashMap::from([(GITHUB_TOKEN_ENV.to_string(), token)]))
        .unwrap_or_default();

    let launches: [(&str, &[&str]); 2] = [
        (npx_command(), &["-y", "@modelcontextprotocol/server-github"]),
        ("uvx", &["mcp-server-github"]),
    ];

    launches
        .into_iter()
        .map(|(command, args)| ServerConfig {
            auto_start: true,
            timeout: DEFAULT_TIMEOUT,
            env: env.clone(),
            ..ServerConfig::stdio(GITHUB_SERVER_NAME, command, args)
        })
        .collect()
}

/// Short human-readable form of a candidate, for logs and errors.
pub fn describe(config: &ServerConfig) -> String {
    if config.args.is_empty() {
        config.command.clone()
    } else {
        format!("{} {}", config.command, config.args.join(" "))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
