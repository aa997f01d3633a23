//! Line-oriented fake MCP server used by the integration tests.
//!
//! Reads one JSON-RPC message per stdin line and answers on stdout.
//! Behaviour is driven by environment variables:
//!
//! - `MOCK_MCP_NAME`: server name reported by `initialize` (default `mock`)
//! - `MOCK_MCP_BANNER`: text printed to stdout before serving; `|` splits lines
//! - `MOCK_MCP_FAIL_INIT`: when set, `initialize` answers with an error
//! - `MOCK_MCP_IGNORE`: a method name that never gets a reply
//! - `MOCK_MCP_IGNORE_EOF`: when set, keep running after stdin closes
//!
//! Tools: `echo` (returns `arguments.text`), `sleep` (replies after
//! `arguments.ms` on its own thread, so replies can overtake it), `fail`
//! (JSON-RPC error), `stats` (reports how many `initialize` calls arrived).

use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};

type Output = Arc<Mutex<std::io::Stdout>>;

fn send(out: &Output, message: &Value) {
    if let Ok(mut stdout) = out.lock() {
        let _ = writeln!(stdout, "{message}");
        let _ = stdout.flush();
    }
}

fn reply(out: &Output, id: &Value, result: Value) {
    send(out, &json!({"jsonrpc": "2.0", "id": id, "result": result}));
}

fn reply_error(out: &Output, id: &Value, code: i64, message: &str) {
    send(
        out,
        &json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}}),
    );
}

fn text(content: impl Into<String>) -> Value {
    json!({"content": [{"type": "text", "text": content.into()}]})
}

struct Mock {
    name: String,
    fail_init: bool,
    ignore: Option<String>,
    initialize_calls: AtomicU64,
}

impl Mock {
    fn from_env() -> Self {
        Self {
            name: std::env::var("MOCK_MCP_NAME").unwrap_or_else(|_| "mock".into()),
            fail_init: std::env::var_os("MOCK_MCP_FAIL_INIT").is_some(),
            ignore: std::env::var("MOCK_MCP_IGNORE").ok().filter(|m| !m.is_empty()),
            initialize_calls: AtomicU64::new(0),
        }
    }

    fn handle(&self, out: &Output, message: Value) {
        let Some(method) = message.get("method").and_then(Value::as_str) else {
            return;
        };
        // Notifications carry no id and get no reply.
        let Some(id) = message.get("id").cloned() else {
            return;
        };
        if self.ignore.as_deref() == Some(method) {
            eprintln!("mock: ignoring {method}");
            return;
        }
        let params = message.get("params").cloned().unwrap_or(Value::Null);

        match method {
            "initialize" => {
                self.initialize_calls.fetch_add(1, Ordering::SeqCst);
                if self.fail_init {
                    return reply_error(out, &id, -32603, "initialize refused");
                }
                let version = params["protocolVersion"].as_str().unwrap_or("2024-11-05");
                reply(
                    out,
                    &id,
                    json!({
                        "protocolVersion": version,
                        "capabilities": {"tools": {}, "resources": {}, "prompts": {}},
                        "serverInfo": {"name": self.name, "version": "0.0.1"},
                    }),
                );
            }
            "tools/list" => reply(
                out,
                &id,
                json!({"tools": [
                    {"name": "echo", "description": "Echo the text argument",
                     "inputSchema": {"type": "object", "properties": {"text": {"type": "string"}}}},
                    {"name": "sleep", "description": "Reply after a delay",
                     "inputSchema": {"type": "object", "properties": {"ms": {"type": "integer"}}}},
                    {"name": "fail", "description": "Always fails"},
                    {"name": "stats", "description": "Report call counters"},
                ]}),
            ),
            "tools/call" => self.call_tool(out, id, &params),
            "resources/list" => reply(
                out,
                &id,
                json!({"resources": [
                    {"uri": "mock://readme", "name": "readme", "mimeType": "text/plain"},
                ]}),
            ),
            "resources/read" => {
                let uri = params["uri"].as_str().unwrap_or_default();
                reply(
                    out,
                    &id,
                    json!({"contents": [
                        {"uri": uri, "mimeType": "text/plain", "text": format!("contents of {uri}")},
                    ]}),
                );
            }
            "prompts/list" => reply(
                out,
                &id,
                json!({"prompts": [
                    {"name": "greet", "description": "Say hello",
                     "arguments": [{"name": "who", "required": true}]},
                ]}),
            ),
            "prompts/get" => {
                let who = params["arguments"]["who"].as_str().unwrap_or("world");
                reply(
                    out,
                    &id,
                    json!({"messages": [
                        {"role": "user", "content": {"type": "text", "text": format!("Hello, {who}!")}},
                    ]}),
                );
            }
            other => reply_error(out, &id, -32601, &format!("Method not found: {other}")),
        }
    }

    fn call_tool(&self, out: &Output, id: Value, params: &Value) {
        let args = &params["arguments"];
        match params["name"].as_str().unwrap_or_default() {
            "echo" => reply(out, &id, text(args["text"].as_str().unwrap_or_default())),
            "sleep" => {
                let ms = args["ms"].as_u64().unwrap_or(0);
                let out = out.clone();
                std::thread::spawn(move || {
                    std::thread::sleep(Duration::from_millis(ms));
                    reply(&out, &id, text(format!("slept {ms}ms")));
                });
            }
            "fail" => reply_error(out, &id, -32000, "tool failed on purpose"),
            "stats" => reply(
                out,
                &id,
                text(
                    json!({"initialize_calls": self.initialize_calls.load(Ordering::SeqCst)})
                        .to_string(),
                ),
            ),
            other => reply(
                out,
                &id,
                json!({
                    "content": [{"type": "text", "text": format!("unknown tool: {other}")}],
                    "isError": true,
                }),
            ),
        }
    }
}

fn main() -> anyhow::Result<()> {
    let out: Output = Arc::new(Mutex::new(std::io::stdout()));
    let mock = Mock::from_env();

    if let Ok(banner) = std::env::var("MOCK_MCP_BANNER") {
        if let Ok(mut stdout) = out.lock() {
            for line in banner.split('|') {
                writeln!(stdout, "{line}")?;
            }
            stdout.flush()?;
        }
    }
    eprintln!("mock: {} ready", mock.name);

    for line in std::io::stdin().lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(&line) {
            Ok(message) => mock.handle(&out, message),
            Err(e) => eprintln!("mock: unparseable line: {e}"),
        }
    }

    eprintln!("mock: stdin closed");
    if std::env::var_os("MOCK_MCP_IGNORE_EOF").is_some() {
        loop {
            std::thread::sleep(Duration::from_secs(60));
        }
    }
    Ok(())
}
