//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::time::Duration;

use mcp_hub::ServerConfig;

/// Path of the fake server binary built alongside the tests.
pub const MOCK_SERVER: &str = env!("CARGO_BIN_EXE_mock-mcp-server");

/// A stdio config launching the fake server with `env` set.
pub fn mock_config(name: &str, env: &[(&str, &str)]) -> ServerConfig {
    let mut config = ServerConfig {
        auto_start: true,
        timeout: Duration::from_secs(5),
        ..ServerConfig::stdio(name, MOCK_SERVER, &[])
    };
    config.env.insert("MOCK_MCP_NAME".into(), name.into());
    for (key, value) in env {
        config.env.insert(key.to_string(), value.to_string());
    }
    config
}
