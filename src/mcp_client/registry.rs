//! Server template catalog.
//!
//! A [`TemplateRegistry`] is an explicitly constructed catalog of named
//! [`ServerTemplate`]s. It is seeded with built-in definitions, or replaced
//! wholesale by a user catalog file (`mcp_templates.json`) when one exists
//! and parses. A template plus caller-supplied values yields a
//! [`ServerConfig`] through [`ServerTemplate::create_server_config`], which
//! never mutates the template.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::config::{duration_serde, McpSettings, ServerConfig, TransportKind, DEFAULT_MAX_RESTARTS, DEFAULT_TIMEOUT};
use super::errors::McpError;

/// File name of the user catalog, inside the settings directory.
pub const TEMPLATES_FILE: &str = "mcp_templates.json";

// ─── Templates ───────────────────────────────────────────────────────────────

/// An environment variable a template expects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvVarTemplate {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    /// Value should be masked when displayed.
    #[serde(default)]
    pub secret: bool,
    #[serde(default)]
    pub default: String,
}

/// Blueprint for a server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerTemplate {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Missing means stdio.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportKind>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env_vars: Vec<EnvVarTemplate>,
    #[serde(default = "default_timeout", with = "duration_serde")]
    pub timeout: Duration,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub auth_type: String,
    #[serde(default)]
    pub docs: String,
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

/// Caller overrides applied on top of a template. Empty values are ignored.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub url: Option<String>,
    pub command: Option<String>,
    pub args: Option<Vec<String>>,
}

impl ServerTemplate {
    pub fn transport(&self) -> TransportKind {
        self.transport.unwrap_or_default()
    }

    /// Produce a server config named `name`.
    ///
    /// Only the env vars the template declares are filled in: a non-empty
    /// value from `env_values` first, then the declared default. A declared
    /// var with neither is left out rather than set to an empty string.
    pub fn create_server_config(
        &self,
        name: &str,
        env_values: &HashMap<String, String>,
        overrides: &ConfigOverrides,
    ) -> ServerConfig {
        let non_empty = |v: &Option<String>| v.as_ref().filter(|s| !s.is_empty()).cloned();

        let env = self
            .env_vars
            .iter()
            .filter_map(|var| {
                let value = env_values
                    .get(&var.name)
                    .filter(|v| !v.is_empty())
                    .cloned()
                    .or_else(|| (!var.default.is_empty()).then(|| var.default.clone()))?;
                Some((var.name.clone(), value))
            })
            .collect();

        ServerConfig {
            name: name.to_string(),
            transport: self.transport(),
            command: non_empty(&overrides.command).unwrap_or_else(|| self.command.clone()),
            args: overrides
                .args
                .clone()
                .filter(|a| !a.is_empty())
                .unwrap_or_else(|| self.args.clone()),
            env,
            working_dir: None,
            url: non_empty(&overrides.url).unwrap_or_else(|| self.url.clone()),
            auto_start: true,
            max_restarts: DEFAULT_MAX_RESTARTS,
            timeout: self.timeout,
        }
    }

    /// Required env vars that `env_values` leaves unset and that have no
    /// default.
    pub fn missing_required_env<'a>(&'a self, env_values: &HashMap<String, String>) -> Vec<&'a str> {
        self.env_vars
            .iter()
            .filter(|var| var.required && var.default.is_empty())
            .filter(|var| env_values.get(&var.name).map_or(true, |v| v.is_empty()))
            .map(|var| var.name.as_str())
            .collect()
    }
}

// ─── Registry ────────────────────────────────────────────────────────────────

/// User catalog file shape.
#[derive(Debug, Deserialize)]
struct TemplatesFile {
    #[serde(default)]
    templates: HashMap<String, ServerTemplate>,
}

/// Catalog of server templates keyed by id.
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    templates: HashMap<String, ServerTemplate>,
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl TemplateRegistry {
    /// The built-in catalog.
    pub fn builtin() -> Self {
        let templates = builtin_templates()
            .into_iter()
            .map(|t| (t.id.clone(), t))
            .collect();
        Self { templates }
    }

    /// An empty catalog.
    pub fn empty() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }

    /// Load the catalog from `path`, falling back to the built-ins when the
    /// file is missing, unreadable, unparseable or empty.
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "failed to read template catalog");
                }
                return Self::builtin();
            }
        };

        let file: TemplatesFile = match serde_json::from_str(&raw) {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "invalid template catalog, using built-ins");
                return Self::builtin();
            }
        };
        if file.templates.is_empty() {
            tracing::warn!(path = %path.display(), "template catalog is empty, using built-ins");
            return Self::builtin();
        }

        let templates: HashMap<String, ServerTemplate> = file
            .templates
            .into_iter()
            .map(|(id, mut template)| {
                template.id = id.clone();
                template.transport.get_or_insert(TransportKind::Stdio);
                (id, template)
            })
            .collect();
        tracing::info!(path = %path.display(), count = templates.len(), "loaded template catalog");
        Self { templates }
    }

    /// Load `<config dir>/mcp-hub/mcp_templates.json`, or the built-ins.
    pub fn from_user_config() -> Self {
        match McpSettings::config_dir() {
            Some(dir) => Self::load(&dir.join(TEMPLATES_FILE)),
            None => Self::builtin(),
        }
    }

    pub fn get_template(&self, id: &str) -> Option<&ServerTemplate> {
        self.templates.get(id)
    }

    /// All templates, sorted by id.
    pub fn list_templates(&self) -> Vec<&ServerTemplate> {
        let mut all: Vec<&ServerTemplate> = self.templates.values().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn templates_by_type(&self, kind: TransportKind) -> Vec<&ServerTemplate> {
        self.list_templates()
            .into_iter()
            .filter(|t| t.transport() == kind)
            .collect()
    }

    /// Case-insensitive substring match on name or description.
    pub fn search_templates(&self, query: &str) -> Vec<&ServerTemplate> {
        let needle = query.to_lowercase();
        self.list_templates()
            .into_iter()
            .filter(|t| {
                t.name.to_lowercase().contains(&needle)
                    || t.description.to_lowercase().contains(&needle)
            })
            .collect()
    }

    /// Insert or replace a template. Id and name must be non-empty; a
    /// missing transport becomes stdio.
    pub fn add_template(&mut self, mut template: ServerTemplate) -> Result<(), McpError> {
        if template.id.trim().is_empty() {
            return Err(McpError::InvalidTemplate {
                reason: "template id cannot be empty".into(),
            });
        }
        if template.name.trim().is_empty() {
            return Err(McpError::InvalidTemplate {
                reason: format!("template '{}' has an empty name", template.id),
            });
        }
        template.transport.get_or_insert(TransportKind::Stdio);
        self.templates.insert(template.id.clone(), template);
        Ok(())
    }

    /// Look up `id` and build a config from it.
    pub fn create_server_config(
        &self,
        id: &str,
        name: &str,
        env_values: &HashMap<String, String>,
        overrides: &ConfigOverrides,
    ) -> Result<ServerConfig, McpError> {
        let template = self
            .get_template(id)
            .ok_or_else(|| McpError::UnknownTemplate { id: id.to_string() })?;
        Ok(template.create_server_config(name, env_values, overrides))
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

// ─── Built-ins ───────────────────────────────────────────────────────────────

fn github_token_var(description: &str) -> EnvVarTemplate {
    EnvVarTemplate {
        name: "GITHUB_PERSONAL_ACCESS_TOKEN".into(),
        description: description.into(),
        required: true,
        secret: true,
        default: String::new(),
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn builtin_templates() -> Vec<ServerTemplate> {
    let base = ServerTemplate {
        id: String::new(),
        name: String::new(),
        description: String::new(),
        transport: Some(TransportKind::Stdio),
        url: String::new(),
        command: String::new(),
        args: Vec::new(),
        env_vars: Vec::new(),
        timeout: DEFAULT_TIMEOUT,
        features: Vec::new(),
        auth_type: "none".into(),
        docs: "https://modelcontextprotocol.io/".into(),
    };

    vec![
        ServerTemplate {
            id: "github-remote".into(),
            name: "GitHub MCP Server (Remote)".into(),
            description: "Official GitHub MCP server for repository management, issues, PRs, and code analysis".into(),
            transport: Some(TransportKind::Http),
            url: "https://api.githubcopilot.com/mcp/".into(),
            env_vars: vec![github_token_var(
                "GitHub Personal Access Token with repo, read:user, read:org, issues permissions",
            )],
            features: strings(&["Repository management", "Issues & PRs", "GitHub Actions", "Code analysis", "Security findings"]),
            auth_type: "bearer".into(),
            docs: "https://github.com/github/github-mcp-server".into(),
            ..base.clone()
        },
        ServerTemplate {
            id: "github-docker".into(),
            name: "GitHub MCP Server (Docker)".into(),
            description: "Local Docker instance of the GitHub MCP server".into(),
            command: "docker".into(),
            args: strings(&["run", "-i", "--rm", "-e", "GITHUB_PERSONAL_ACCESS_TOKEN", "ghcr.io/github/github-mcp-server"]),
            env_vars: vec![github_token_var("GitHub Personal Access Token")],
            features: strings(&["Repository management", "Issues & PRs", "GitHub Actions", "Code analysis"]),
            docs: "https://github.com/github/github-mcp-server".into(),
            ..base.clone()
        },
        ServerTemplate {
            id: "git-uvx".into(),
            name: "Git MCP Server".into(),
            description: "Local Git operations (status, commit, diff, log, branch management)".into(),
            command: "uvx".into(),
            args: strings(&["mcp-server-git"]),
            features: strings(&["Git status", "Git commit", "Git diff", "Git log", "Branch management"]),
            docs: "https://github.com/modelcontextprotocol/servers/tree/main/src/git".into(),
            ..base.clone()
        },
        ServerTemplate {
            id: "chrome-devtools".into(),
            name: "Chrome DevTools MCP Server".into(),
            description: "Control and inspect Chrome for automation, debugging, and performance analysis".into(),
            command: "npx".into(),
            args: strings(&["-y", "chrome-devtools-mcp@latest", "--isolated"]),
            // Browser operations are slow.
            timeout: Duration::from_secs(60),
            features: strings(&["Browser automation", "Performance analysis", "Network inspection", "Console access", "Screenshots"]),
            docs: "https://github.com/ChromeDevTools/chrome-devtools-mcp".into(),
            ..base.clone()
        },
        ServerTemplate {
            id: "http-generic".into(),
            name: "Generic HTTP MCP Server".into(),
            description: "Custom HTTP-based MCP server".into(),
            transport: Some(TransportKind::Http),
            features: strings(&["Custom HTTP MCP functionality"]),
            auth_type: "bearer".into(),
            ..base.clone()
        },
        ServerTemplate {
            id: "stdio-generic".into(),
            name: "Generic Command-line MCP Server".into(),
            description: "Custom command-line MCP server".into(),
            features: strings(&["Custom command-line MCP functionality"]),
            ..base
        },
    ]
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_builtin_catalog() {
        let registry = TemplateRegistry::builtin();
        assert_eq!(registry.len(), 6);
        let remote = registry.get_template("github-remote").unwrap();
        assert_eq!(remote.transport(), TransportKind::Http);
        assert_eq!(remote.url, "https://api.githubcopilot.com/mcp/");
        assert_eq!(
            registry.get_template("chrome-devtools").unwrap().timeout,
            Duration::from_secs(60)
        );
        assert_eq!(registry.templates_by_type(TransportKind::Http).len(), 2);
        assert_eq!(registry.templates_by_type(TransportKind::Stdio).len(), 4);
    }

    #[test]
    fn test_search_is_case_insensitive() {
        let registry = TemplateRegistry::builtin();
        let hits: Vec<&str> = registry
            .search_templates("GITHUB")
            .iter()
            .map(|t| t.id.as_str())
            .collect();
        assert_eq!(hits, vec!["github-docker", "github-remote"]);
        assert_eq!(registry.search_templates("branch management").len(), 1);
        assert!(registry.search_templates("no such thing").is_empty());
    }

    #[test]
    fn test_required_env_supplied_or_omitted() {
        let registry = TemplateRegistry::builtin();
        let template = registry.get_template("github-docker").unwrap();

        let with = template.create_server_config(
            "gh",
            &env(&[("GITHUB_PERSONAL_ACCESS_TOKEN", "ghp_x"), ("UNRELATED", "1")]),
            &ConfigOverrides::default(),
        );
        assert_eq!(with.env, env(&[("GITHUB_PERSONAL_ACCESS_TOKEN", "ghp_x")]));

        let without = template.create_server_config("gh", &HashMap::new(), &ConfigOverrides::default());
        assert!(without.env.is_empty());

        let blank = template.create_server_config(
            "gh",
            &env(&[("GITHUB_PERSONAL_ACCESS_TOKEN", "")]),
            &ConfigOverrides::default(),
        );
        assert!(!blank.env.contains_key("GITHUB_PERSONAL_ACCESS_TOKEN"));
        assert_eq!(template.missing_required_env(&HashMap::new()), vec!["GITHUB_PERSONAL_ACCESS_TOKEN"]);
    }

    #[test]
    fn test_env_default_used_when_not_supplied() {
        let mut template = TemplateRegistry::builtin()
            .get_template("stdio-generic")
            .unwrap()
            .clone();
        template.env_vars.push(EnvVarTemplate {
            name: "LOG_LEVEL".into(),
            default: "info".into(),
            ..EnvVarTemplate::default()
        });

        let cfg = template.create_server_config("s", &HashMap::new(), &ConfigOverrides::default());
        assert_eq!(cfg.env.get("LOG_LEVEL").map(String::as_str), Some("info"));

        let cfg = template.create_server_config(
            "s",
            &env(&[("LOG_LEVEL", "debug")]),
            &ConfigOverrides::default(),
        );
        assert_eq!(cfg.env.get("LOG_LEVEL").map(String::as_str), Some("debug"));
        assert!(template.missing_required_env(&HashMap::new()).is_empty());
    }

    #[test]
    fn test_overrides_and_defaults() {
        let registry = TemplateRegistry::builtin();
        let template = registry.get_template("git-uvx").unwrap();

        let cfg = template.create_server_config(
            "git",
            &HashMap::new(),
            &ConfigOverrides {
                url: None,
                command: Some(String::new()),
                args: Some(vec!["mcp-server-git".into(), "--repository".into(), "/src".into()]),
            },
        );
        assert_eq!(cfg.name, "git");
        assert_eq!(cfg.command, "uvx");
        assert_eq!(cfg.args.len(), 3);
        assert!(cfg.auto_start);
        assert_eq!(cfg.max_restarts, 3);
        assert!(cfg.validate().is_ok());

        // The template's own args are untouched.
        assert_eq!(template.args, vec!["mcp-server-git"]);

        let http = registry
            .create_server_config(
                "http-generic",
                "internal",
                &HashMap::new(),
                &ConfigOverrides {
                    url: Some("https://mcp.internal/".into()),
                    ..ConfigOverrides::default()
                },
            )
            .unwrap();
        assert_eq!(http.transport, TransportKind::Http);
        assert_eq!(http.url, "https://mcp.internal/");

        assert!(matches!(
            registry.create_server_config("nope", "x", &HashMap::new(), &ConfigOverrides::default()),
            Err(McpError::UnknownTemplate { .. })
        ));
    }

    #[test]
    fn test_add_template_validation() {
        let mut registry = TemplateRegistry::empty();
        let template = ServerTemplate {
            transport: None,
            ..TemplateRegistry::builtin()
                .get_template("git-uvx")
                .unwrap()
                .clone()
        };

        assert!(registry
            .add_template(ServerTemplate {
                id: String::new(),
                ..template.clone()
            })
            .is_err());
        assert!(registry
            .add_template(ServerTemplate {
                name: " ".into(),
                ..template.clone()
            })
            .is_err());

        registry
            .add_template(ServerTemplate {
                id: "custom".into(),
                ..template
            })
            .unwrap();
        assert_eq!(
            registry.get_template("custom").unwrap().transport,
            Some(TransportKind::Stdio)
        );
    }

    #[test]
    fn test_load_user_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(TEMPLATES_FILE);
        std::fs::write(
            &path,
            r#"{"templates": {"team-tools": {"name": "Team Tools", "command": "team-mcp", "timeout": "45s",
                "env_vars": [{"name": "TEAM_TOKEN", "required": true, "secret": true}]}}}"#,
        )
        .unwrap();

        let registry = TemplateRegistry::load(&path);
        assert_eq!(registry.len(), 1);
        let template = registry.get_template("team-tools").unwrap();
        assert_eq!(template.id, "team-tools");
        assert_eq!(template.transport(), TransportKind::Stdio);
        assert_eq!(template.timeout, Duration::from_secs(45));
    }

    #[test]
    fn test_load_falls_back_to_builtins() {
        let dir = tempfile::tempdir().unwrap();
        let missing = TemplateRegistry::load(&dir.path().join("absent.json"));
        assert_eq!(missing.len(), 6);

        let broken_path = dir.path().join("broken.json");
        std::fs::write(&broken_path, "{ templates: nope").unwrap();
        assert!(TemplateRegistry::load(&broken_path).get_template("git-uvx").is_some());

        let empty_path = dir.path().join("empty.json");
        std::fs::write(&empty_path, r#"{"templates": {}}"#).unwrap();
        assert_eq!(TemplateRegistry::load(&empty_path).len(), 6);
    }
}
