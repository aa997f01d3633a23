//! Stdio client against the fake server process.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use mcp_hub::mcp_client::{McpServer, ServerConfig, StdioClient};
use mcp_hub::McpError;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use common::mock_config;

async fn started(name: &str, env: &[(&str, &str)]) -> Arc<StdioClient> {
    let client = Arc::new(StdioClient::new(mock_config(name, env)));
    client.start().await.unwrap();
    client
}

#[tokio::test]
async fn test_initialize_runs_once() {
    let cancel = CancellationToken::new();
    let client = started("once", &[]).await;

    let (a, b) = tokio::join!(client.initialize(&cancel), client.initialize(&cancel));
    a.unwrap();
    b.unwrap();
    client.initialize(&cancel).await.unwrap();

    let stats = client.call_tool("stats", json!({}), &cancel).await.unwrap();
    let counters: serde_json::Value = serde_json::from_str(&stats.text()).unwrap();
    assert_eq!(counters["initialize_calls"], 1);

    let info = client.server_info().await.unwrap();
    assert_eq!(info.server_info.name, "once");
    assert_eq!(info.protocol_version, "2024-11-05");
    assert!(client.status().await.initialized);

    client.stop().await.unwrap();
}

#[tokio::test]
async fn test_banner_lines_are_skipped() {
    let cancel = CancellationToken::new();
    let client = started(
        "noisy",
        &[("MOCK_MCP_BANNER", "Starting noisy server...|listening on stdio|")],
    )
    .await;

    let tools = client.list_tools(&cancel).await.unwrap();
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["echo", "sleep", "fail", "stats"]);
    assert!(tools.iter().all(|t| t.server_name == "noisy"));

    client.stop().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_calls_complete_out_of_order() {
    let cancel = CancellationToken::new();
    let client = started("concurrent", &[]).await;
    client.initialize(&cancel).await.unwrap();

    let slow = {
        let client = client.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let result = client.call_tool("sleep", json!({"ms": 400}), &cancel).await;
            (result, Instant::now())
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut fast = Vec::new();
    for i in 0..5 {
        let client = client.clone();
        let cancel = cancel.clone();
        fast.push(tokio::spawn(async move {
            client
                .call_tool("echo", json!({"text": format!("msg-{i}")}), &cancel)
                .await
        }));
    }
    for (i, handle) in fast.into_iter().enumerate() {
        assert_eq!(handle.await.unwrap().unwrap().text(), format!("msg-{i}"));
    }
    let echoes_done = Instant::now();

    let (slow_result, slow_done) = slow.await.unwrap();
    assert_eq!(slow_result.unwrap().text(), "slept 400ms");
    assert!(slow_done >= echoes_done);

    client.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_then_start_again() {
    let cancel = CancellationToken::new();
    let client = started("cycle", &[]).await;
    assert_eq!(client.list_tools(&cancel).await.unwrap().len(), 4);

    client.stop().await.unwrap();
    assert!(!client.is_running().await);
    assert!(client.server_info().await.is_none());
    assert!(matches!(
        client.list_tools(&cancel).await,
        Err(McpError::NotRunning { .. })
    ));
    // Stopping twice is a no-op.
    client.stop().await.unwrap();

    client.start().await.unwrap();
    client.start().await.unwrap();
    assert_eq!(client.restart_count().await, 2);
    assert_eq!(client.list_tools(&cancel).await.unwrap().len(), 4);

    client.stop().await.unwrap();
}

#[tokio::test]
async fn test_unanswered_request_times_out() {
    let cancel = CancellationToken::new();
    let mut config = mock_config("silent", &[("MOCK_MCP_IGNORE", "resources/list")]);
    config.timeout = Duration::from_millis(300);
    let client = StdioClient::new(config);
    client.start().await.unwrap();

    let err = client.list_resources(&cancel).await.unwrap_err();
    assert!(err.is_timeout(), "unexpected error: {err}");

    // The connection stays usable.
    let echoed = client.call_tool("echo", json!({"text": "still here"}), &cancel).await.unwrap();
    assert_eq!(echoed.text(), "still here");

    client.stop().await.unwrap();
}

#[tokio::test]
async fn test_cancelled_request() {
    let client = started("cancel", &[]).await;
    client.initialize(&CancellationToken::new()).await.unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let start = Instant::now();
    let err = client
        .call_tool("sleep", json!({"ms": 2000}), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::Cancelled { .. }));
    assert!(start.elapsed() < Duration::from_secs(1));

    client.stop().await.unwrap();
}

#[tokio::test]
async fn test_failed_handshake_surfaces_protocol_error() {
    let cancel = CancellationToken::new();
    let client = started("refuse", &[("MOCK_MCP_FAIL_INIT", "1")]).await;

    let err = client.list_tools(&cancel).await.unwrap_err();
    assert!(matches!(err, McpError::ProtocolError { code: -32603, .. }));
    assert!(client.is_running().await);
    assert!(!client.status().await.initialized);

    client.stop().await.unwrap();
}

#[tokio::test]
async fn test_tool_error_becomes_result() {
    let cancel = CancellationToken::new();
    let client = started("errors", &[]).await;

    let result = client.call_tool("fail", json!({}), &cancel).await.unwrap();
    assert!(result.is_error);
    assert!(result.text().contains("tool failed on purpose"));

    let unknown = client.call_tool("missing", json!({}), &cancel).await.unwrap();
    assert!(unknown.is_error);

    client.stop().await.unwrap();
}

#[tokio::test]
async fn test_resources_and_prompts() {
    let cancel = CancellationToken::new();
    let client = started("content", &[]).await;

    let resources = client.list_resources(&cancel).await.unwrap();
    assert_eq!(resources.len(), 1);
    assert_eq!(resources[0].server_name, "content");

    let contents = client.read_resource(&resources[0].uri, &cancel).await.unwrap();
    assert_eq!(contents.text.as_deref(), Some("contents of mock://readme"));

    let prompts = client.list_prompts(&cancel).await.unwrap();
    assert_eq!(prompts[0].name, "greet");
    assert!(prompts[0].arguments[0].required);

    let message = client
        .get_prompt("greet", json!({"who": "Ada"}), &cancel)
        .await
        .unwrap();
    assert_eq!(message.role, "user");
    assert_eq!(message.content.text.as_deref(), Some("Hello, Ada!"));

    client.stop().await.unwrap();
}

#[tokio::test]
async fn test_spawn_failure() {
    let mut config = mock_config("ghost", &[]);
    config.command = "/definitely/not/a/real/mcp-server".into();
    let client = StdioClient::new(config);

    let err = client.start().await.unwrap_err();
    assert!(matches!(err, McpError::SpawnFailed { .. }));
    assert!(!client.is_running().await);
}

#[tokio::test]
async fn test_large_request_to_non_reading_child_is_bounded() {
    // `sleep` never reads stdin, so a large write fills the pipe and stalls.
    let mut config = ServerConfig::stdio("deaf", "sleep", &["30"]);
    config.timeout = Duration::from_millis(300);
    let client = StdioClient::new(config);
    client.start().await.unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        trigger.cancel();
    });

    let payload = json!({"name": "echo", "arguments": {"text": "x".repeat(4 * 1024 * 1024)}});
    let start = Instant::now();
    let err = client
        .request("tools/call", Some(payload), &cancel)
        .await
        .unwrap_err();
    assert!(start.elapsed() < Duration::from_secs(1), "took {:?}", start.elapsed());
    assert!(
        err.is_timeout() || matches!(err, McpError::Cancelled { .. }),
        "unexpected error: {err}"
    );

    // Stop is not stuck behind the abandoned write.
    tokio::time::timeout(Duration::from_secs(15), client.stop())
        .await
        .expect("stop hung")
        .unwrap();
    assert!(!client.is_running().await);
}

#[tokio::test]
async fn test_stop_kills_child_that_ignores_eof() {
    let client = started("stubborn", &[("MOCK_MCP_IGNORE_EOF", "1")]).await;
    client.initialize(&CancellationToken::new()).await.unwrap();

    let start = Instant::now();
    tokio::time::timeout(Duration::from_secs(15), client.stop())
        .await
        .expect("stop hung")
        .unwrap();
    // Closing stdin was not enough; the grace period ran out first.
    assert!(start.elapsed() >= Duration::from_secs(4), "took {:?}", start.elapsed());
    assert!(!client.is_running().await);
    assert!(client.server_info().await.is_none());
}
