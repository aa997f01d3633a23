//! HTTP client against an in-process axum server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use mcp_hub::mcp_client::{HttpClient, McpServer, ServerConfig};
use mcp_hub::McpError;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

/// What the server saw for one POST.
#[derive(Debug, Clone)]
struct Seen {
    method: String,
    params: Value,
    session: Option<String>,
    cookie: Option<String>,
    authorization: Option<String>,
}

type Log = Arc<Mutex<Vec<Seen>>>;

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn handle(State(log): State<Log>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    let method = body["method"].as_str().unwrap_or_default().to_string();
    log.lock().unwrap().push(Seen {
        method: method.clone(),
        params: body["params"].clone(),
        session: header_value(&headers, "mcp-session-id"),
        cookie: header_value(&headers, "cookie"),
        authorization: header_value(&headers, "authorization"),
    });
    let id = body["id"].clone();
    let ok = |result: Value| Json(json!({"jsonrpc": "2.0", "id": id, "result": result}));

    match method.as_str() {
        "initialize" => (
            [
                ("mcp-session-id", "sess-1"),
                ("set-cookie", "affinity=node-7; Path=/"),
            ],
            ok(json!({
                "protocolVersion": "2025-06-18",
                "capabilities": {},
                "serverInfo": {"name": "axum-mcp", "version": "1.0.0"},
            })),
        )
            .into_response(),
        "notifications/initialized" => StatusCode::ACCEPTED.into_response(),
        "tools/list" => {
            let result = json!({"jsonrpc": "2.0", "id": id, "result": {"tools": [{"name": "echo"}]}});
            let body = format!(
                "event: message\ndata: {}\n\nevent: message\ndata: {result}\n\n",
                json!({"jsonrpc": "2.0", "method": "notifications/progress", "params": {}}),
            );
            ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
        }
        "tools/call" if body["params"]["name"] == "deny" => Json(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": -32000, "message": "permission denied"},
        }))
        .into_response(),
        "tools/call" => ok(json!({
            "content": [{"type": "text", "text": body["params"]["arguments"]["text"]}],
        }))
        .into_response(),
        "resources/list" => (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response(),
        "resources/read" => {
            tokio::time::sleep(Duration::from_secs(2)).await;
            ok(json!({"contents": []})).into_response()
        }
        "prompts/list" => (
            [(header::CONTENT_TYPE, "text/html")],
            "<html>not json</html>",
        )
            .into_response(),
        _ => ok(Value::Null).into_response(),
    }
}

async fn serve() -> (String, Log) {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/mcp", post(handle))
        .with_state(log.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/mcp"), log)
}

async fn started_client(url: &str) -> HttpClient {
    let mut config = ServerConfig::http("remote", url);
    config
        .env
        .insert("GITHUB_PERSONAL_ACCESS_TOKEN".into(), "ghp_test".into());
    let client = HttpClient::new(config).unwrap();
    client.start().await.unwrap();
    client
}

fn seen(log: &Log, method: &str) -> Vec<Seen> {
    log.lock()
        .unwrap()
        .iter()
        .filter(|s| s.method == method)
        .cloned()
        .collect()
}

#[tokio::test]
async fn test_session_header_and_cookies_follow_initialize() {
    let cancel = CancellationToken::new();
    let (url, log) = serve().await;
    let client = started_client(&url).await;

    let result = client
        .call_tool("echo", json!({"text": "hi"}), &cancel)
        .await
        .unwrap();
    assert_eq!(result.text(), "hi");
    assert_eq!(client.session_id().await.as_deref(), Some("sess-1"));

    let init = &seen(&log, "initialize")[0];
    assert!(init.session.is_none());
    assert_eq!(init.params["protocolVersion"], "2025-06-18");
    assert_eq!(init.authorization.as_deref(), Some("Bearer ghp_test"));

    let notified = &seen(&log, "notifications/initialized")[0];
    assert_eq!(notified.session.as_deref(), Some("sess-1"));

    let call = &seen(&log, "tools/call")[0];
    assert_eq!(call.session.as_deref(), Some("sess-1"));
    assert!(call.cookie.as_deref().unwrap_or_default().contains("affinity=node-7"));
    assert_eq!(call.authorization.as_deref(), Some("Bearer ghp_test"));

    let info = client.server_info().await.unwrap();
    assert_eq!(info.server_info.name, "axum-mcp");

    client.stop().await.unwrap();
    assert!(client.session_id().await.is_none());
}

#[tokio::test]
async fn test_event_stream_response() {
    let (url, _log) = serve().await;
    let client = started_client(&url).await;

    let tools = client.list_tools(&CancellationToken::new()).await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "echo");
    assert_eq!(tools[0].server_name, "remote");
}

#[tokio::test]
async fn test_protocol_error_on_tool_call_is_result() {
    let (url, _log) = serve().await;
    let client = started_client(&url).await;

    let result = client
        .call_tool("deny", json!({}), &CancellationToken::new())
        .await
        .unwrap();
    assert!(result.is_error);
    assert_eq!(result.text(), "permission denied");
}

#[tokio::test]
async fn test_non_success_status() {
    let (url, _log) = serve().await;
    let client = started_client(&url).await;

    let err = client
        .list_resources(&CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        McpError::HttpStatus { status, body, .. } => {
            assert_eq!(status, 500);
            assert!(body.contains("boom"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_unparseable_body() {
    let (url, _log) = serve().await;
    let client = started_client(&url).await;

    let err = client
        .list_prompts(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::MalformedResponse { .. }), "unexpected error: {err}");
}

#[tokio::test]
async fn test_request_timeout() {
    let (url, _log) = serve().await;
    let mut config = ServerConfig::http("slow", &url);
    config.timeout = Duration::from_millis(300);
    let client = HttpClient::new(config).unwrap();
    client.start().await.unwrap();

    let err = client
        .read_resource("mock://slow", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "unexpected error: {err}");
}

#[tokio::test]
async fn test_initialize_runs_on_spawned_task() {
    let (url, log) = serve().await;
    let client = Arc::new(started_client(&url).await);

    // `tokio::spawn` requires the initialize future to be `Send`.
    let handle = {
        let client = client.clone();
        tokio::spawn(async move { client.initialize(&CancellationToken::new()).await })
    };
    handle.await.unwrap().unwrap();

    assert!(client.status().await.initialized);
    assert_eq!(client.session_id().await.as_deref(), Some("sess-1"));
    assert_eq!(seen(&log, "initialize").len(), 1);
}
