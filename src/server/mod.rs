//! JSON-RPC tool server over a line-oriented stdio stream.
//!
//! Methods: `initialize`, `tools/list`, `tools/call`. Requests are
//! authenticated before dispatch, run concurrently with per-tool
//! deadlines, and are tracked so a graceful shutdown waits (bounded) for
//! in-flight work. Responses carry `content[]` typed parts plus an
//! `isError` flag; protocol failures use the fixed error codes.

pub mod auth;
pub mod tools;

pub use auth::AuthHandler;
pub use tools::{ToolContext, DEFAULT_PREVIEW_LINES, MAX_PREVIEW_LINES};

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::domain::error::{Error, Result};

/// Unknown method or tool.
pub const CODE_METHOD_NOT_FOUND: i64 = -32601;
/// Malformed or missing arguments.
pub const CODE_INVALID_ARGS: i64 = -32602;
/// Internal error with a human-readable message.
pub const CODE_INTERNAL: i64 = -32603;
/// Index unavailable: corruption, missing database, missing model.
pub const CODE_INDEX_UNAVAILABLE: i64 = -32002;
/// Authentication failure; distinct from every dispatch error.
pub const CODE_AUTH_FAILED: i64 = -32001;
/// Request line was not valid JSON.
pub const CODE_PARSE_ERROR: i64 = -32700;

/// Server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Shared auth token; `None` disables authentication
    pub auth_token: Option<String>,
    /// Search budget (the hybrid pipeline enforces it; the outer guard
    /// is a backstop at twice the budget)
    pub search_deadline: Duration,
    /// Deadline for every other tool
    pub tool_deadline: Duration,
    /// Grace period for in-flight requests at shutdown
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            auth_token: None,
            search_deadline: Duration::from_millis(300),
            tool_deadline: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// Serve requests from stdin until EOF, then drain in-flight requests
/// within the grace period.
pub async fn run_server(ctx: Arc<ToolContext>, config: ServerConfig) -> Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    serve(ctx, config, stdin, stdout).await
}

/// Transport-generic server loop (tests drive it with in-memory pipes).
pub async fn serve<R, W>(
    ctx: Arc<ToolContext>,
    config: ServerConfig,
    reader: BufReader<R>,
    mut writer: W,
) -> Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let auth = Arc::new(AuthHandler::new(config.auth_token.clone()));
    let (out_tx, mut out_rx) = mpsc::channel::<String>(64);

    let writer_task = tokio::spawn(async move {
        while let Some(line) = out_rx.recv().await {
            if writer.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if writer.write_all(b"\n").await.is_err() {
                break;
            }
            let _ = writer.flush().await;
        }
    });

    let mut inflight: JoinSet<()> = JoinSet::new();
    let mut lines = reader.lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }

        let request: Value = match serde_json::from_str(&line) {
            Ok(value) => value,
            Err(e) => {
                let _ = out_tx
                    .send(error_response(Value::Null, CODE_PARSE_ERROR, &format!("parse error: {e}")).to_string())
                    .await;
                continue;
            }
        };

        let id = request.get("id").cloned().unwrap_or(Value::Null);
        let method = request
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        // Notifications carry no id and get no response
        if id.is_null() && method.starts_with("notifications/") {
            continue;
        }

        match method.as_str() {
            "initialize" => {
                let response = json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {
                        "protocolVersion": "2024-11-05",
                        "serverInfo": { "name": "code-index", "version": env!("CARGO_PKG_VERSION") },
                        "capabilities": { "tools": {} }
                    }
                });
                let _ = out_tx.send(response.to_string()).await;
            }
            "tools/list" => {
                let response = json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": { "tools": tools::tool_list() }
                });
                let _ = out_tx.send(response.to_string()).await;
            }
            "tools/call" => {
                let params = request.get("params").cloned().unwrap_or_else(|| json!({}));
                let ctx = ctx.clone();
                let auth = auth.clone();
                let out_tx = out_tx.clone();
                let config = config.clone();
                inflight.spawn(async move {
                    let response = handle_tool_call(&ctx, &auth, &config, id, &params).await;
                    let _ = out_tx.send(response.to_string()).await;
                });
            }
            "" => {
                let _ = out_tx
                    .send(error_response(id, CODE_INVALID_ARGS, "missing method").to_string())
                    .await;
            }
            other => {
                let _ = out_tx
                    .send(
                        error_response(id, CODE_METHOD_NOT_FOUND, &format!("method not found: {other}"))
                            .to_string(),
                    )
                    .await;
            }
        }

        // Opportunistically reap finished requests
        while inflight.try_join_next().is_some() {}
    }

    // Graceful shutdown: bounded wait for in-flight requests
    let drain = async {
        while inflight.join_next().await.is_some() {}
    };
    if tokio::time::timeout(config.shutdown_grace, drain).await.is_err() {
        tracing::warn!(
            grace = ?config.shutdown_grace,
            "shutdown grace elapsed, aborting in-flight requests"
        );
        inflight.abort_all();
    }

    drop(out_tx);
    let _ = writer_task.await;
    Ok(())
}

async fn handle_tool_call(
    ctx: &ToolContext,
    auth: &AuthHandler,
    config: &ServerConfig,
    id: Value,
    params: &Value,
) -> Value {
    if !auth.verify(params) {
        return error_response(id, CODE_AUTH_FAILED, "authentication failed");
    }

    let Some(name) = params.get("name").and_then(Value::as_str) else {
        return error_response(id, CODE_INVALID_ARGS, "missing tool name");
    };
    if !tools::is_known_tool(name) {
        return error_response(id, CODE_METHOD_NOT_FOUND, &format!("unknown tool: {name}"));
    }
    let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

    let deadline = if name == "search" {
        // The hybrid pipeline enforces the budget itself and returns a
        // partial (lexical-only) response where legal; this outer guard
        // only catches a wedged pipeline.
        config.search_deadline * 2
    } else {
        config.tool_deadline
    };

    let outcome = tokio::time::timeout(deadline, tools::dispatch(ctx, name, &arguments)).await;
    match outcome {
        Ok(Ok(payload)) => {
            let text = serde_json::to_string_pretty(&payload).unwrap_or_else(|_| payload.to_string());
            json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "content": [{ "type": "text", "text": text }],
                    "isError": false
                }
            })
        }
        Ok(Err(err)) => {
            let code = error_code(&err);
            error_response(id, code, &err.to_string())
        }
        Err(_) => error_response(
            id,
            CODE_INTERNAL,
            &format!("tool `{name}` exceeded its {deadline:?} deadline"),
        ),
    }
}

/// Map the error taxonomy onto protocol codes.
fn error_code(err: &Error) -> i64 {
    match err {
        Error::InvalidInput { .. } => CODE_INVALID_ARGS,
        Error::NotInitialized { .. } | Error::StoreCorrupt { .. } => CODE_INDEX_UNAVAILABLE,
        _ => CODE_INTERNAL,
    }
}

fn error_response(id: Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::embedding::hash_provider_factory;
    use crate::adapters::store::IndexStore;
    use crate::application::embedding::{EmbeddingEngine, EngineConfig};
    use crate::application::indexing::{Indexer, IndexerConfig};
    use crate::application::search::{HybridSearch, SearchConfig};
    use crate::domain::types::EmbeddingProfile;
    use crate::infrastructure::astdocs::AstDocStore;
    use crate::infrastructure::embedding_cache::EmbeddingCache;
    use crate::infrastructure::patterns::PatternStore;
    use dashmap::DashMap;

    async fn context_with_project() -> (tempfile::TempDir, Arc<ToolContext>) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::write(
            root.join("src/math.ts"),
            "export function calculateSum(a: number, b: number): number { return a + b; }\nexport function useSum() { return calculateSum(1, 2); }\n",
        )
        .unwrap();

        let store = Arc::new(IndexStore::open_in_memory().unwrap());
        let astdocs = Arc::new(AstDocStore::new(root.join(".codeindex/ast")));
        let patterns = Arc::new(PatternStore::new());
        let engine = Arc::new(EmbeddingEngine::initialize(
            root.join(".codeindex/models"),
            Arc::new(EmbeddingCache::open_in_memory().unwrap()),
            None,
            hash_provider_factory(),
            EngineConfig::default(),
            Some(EmbeddingProfile::light()),
        ));
        let indexer = Arc::new(Indexer::new(
            root.clone(),
            store.clone(),
            astdocs.clone(),
            patterns,
            Some(engine.clone()),
            IndexerConfig::default(),
        ));
        indexer.full_index().await.unwrap();

        let search = Arc::new(
            HybridSearch::new(store.clone(), engine, None, SearchConfig::default()).unwrap(),
        );

        let ctx = Arc::new(ToolContext {
            root,
            store,
            search,
            indexer,
            astdocs,
            search_memo: DashMap::new(),
        });
        (dir, ctx)
    }

    async fn roundtrip(ctx: Arc<ToolContext>, config: ServerConfig, input: &str) -> Vec<Value> {
        let (client_write, server_read) = tokio::io::duplex(64 * 1024);
        let (server_write, client_read) = tokio::io::duplex(64 * 1024);

        let server = tokio::spawn(serve(
            ctx,
            config,
            BufReader::new(server_read),
            server_write,
        ));

        let mut client_write = client_write;
        client_write.write_all(input.as_bytes()).await.unwrap();
        client_write.shutdown().await.unwrap();
        drop(client_write);

        server.await.unwrap().unwrap();

        let mut out = String::new();
        let mut reader = BufReader::new(client_read);
        use tokio::io::AsyncReadExt;
        reader.read_to_string(&mut out).await.unwrap();
        out.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    fn by_id<'v>(responses: &'v [Value], id: i64) -> &'v Value {
        responses
            .iter()
            .find(|r| r.get("id").and_then(Value::as_i64) == Some(id))
            .expect("response for id")
    }

    #[tokio::test]
    async fn lists_the_fixed_vocabulary() {
        let (_dir, ctx) = context_with_project().await;
        let responses = roundtrip(
            ctx,
            ServerConfig::default(),
            "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"tools/list\"}\n",
        )
        .await;

        let tools = by_id(&responses, 1)["result"]["tools"].as_array().unwrap().clone();
        let names: Vec<&str> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
        assert_eq!(
            names,
            vec!["search", "find_def", "find_refs", "callers", "callees", "open_at", "refresh", "symbols"]
        );
        for tool in &tools {
            assert!(tool.get("inputSchema").is_some());
        }
    }

    #[tokio::test]
    async fn search_and_navigation_round_trip() {
        let (_dir, ctx) = context_with_project().await;
        let input = concat!(
            "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"tools/call\",\"params\":{\"name\":\"search\",\"arguments\":{\"query\":\"calculateSum\",\"limit\":5}}}\n",
            "{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"tools/call\",\"params\":{\"name\":\"find_def\",\"arguments\":{\"name\":\"calculateSum\"}}}\n",
            "{\"jsonrpc\":\"2.0\",\"id\":3,\"method\":\"tools/call\",\"params\":{\"name\":\"callers\",\"arguments\":{\"name\":\"calculateSum\"}}}\n",
        );
        let responses = roundtrip(ctx, ServerConfig::default(), input).await;

        let search = by_id(&responses, 1);
        assert_eq!(search["result"]["isError"], false);
        let text = search["result"]["content"][0]["text"].as_str().unwrap();
        let payload: Value = serde_json::from_str(text).unwrap();
        assert!(payload["returned"].as_u64().unwrap() >= 1);

        let def = by_id(&responses, 2);
        let text = def["result"]["content"][0]["text"].as_str().unwrap();
        let payload: Value = serde_json::from_str(text).unwrap();
        assert_eq!(payload["definitions"][0]["file"], "src/math.ts");

        let callers = by_id(&responses, 3);
        let text = callers["result"]["content"][0]["text"].as_str().unwrap();
        let payload: Value = serde_json::from_str(text).unwrap();
        assert_eq!(payload["callers"][0]["caller"], "useSum");
    }

    #[tokio::test]
    async fn protocol_error_codes() {
        let (_dir, ctx) = context_with_project().await;
        let input = concat!(
            "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"no/such\"}\n",
            "{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"tools/call\",\"params\":{\"name\":\"nope\",\"arguments\":{}}}\n",
            "{\"jsonrpc\":\"2.0\",\"id\":3,\"method\":\"tools/call\",\"params\":{\"name\":\"search\",\"arguments\":{\"query\":\"\"}}}\n",
            "not json at all\n",
        );
        let responses = roundtrip(ctx, ServerConfig::default(), input).await;

        assert_eq!(by_id(&responses, 1)["error"]["code"], CODE_METHOD_NOT_FOUND);
        assert_eq!(by_id(&responses, 2)["error"]["code"], CODE_METHOD_NOT_FOUND);
        assert_eq!(by_id(&responses, 3)["error"]["code"], CODE_INVALID_ARGS);
        assert!(responses
            .iter()
            .any(|r| r["error"]["code"].as_i64() == Some(CODE_PARSE_ERROR)));
    }

    #[tokio::test]
    async fn auth_failure_uses_its_own_code() {
        let (_dir, ctx) = context_with_project().await;
        let config = ServerConfig {
            auth_token: Some("sekrit".to_string()),
            ..ServerConfig::default()
        };
        let input = concat!(
            "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"tools/call\",\"params\":{\"name\":\"symbols\",\"arguments\":{}}}\n",
            "{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"tools/call\",\"params\":{\"name\":\"symbols\",\"arguments\":{},\"auth_token\":\"sekrit\"}}\n",
        );
        let responses = roundtrip(ctx, config, input).await;

        assert_eq!(by_id(&responses, 1)["error"]["code"], CODE_AUTH_FAILED);
        assert_eq!(by_id(&responses, 2)["result"]["isError"], false);
    }

    #[tokio::test]
    async fn open_at_missing_file_is_not_an_error() {
        let (_dir, ctx) = context_with_project().await;
        let input = "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"tools/call\",\"params\":{\"name\":\"open_at\",\"arguments\":{\"path\":\"src/nope.ts\"}}}\n";
        let responses = roundtrip(ctx, ServerConfig::default(), input).await;

        let result = by_id(&responses, 1);
        assert_eq!(result["result"]["isError"], false);
        let text = result["result"]["content"][0]["text"].as_str().unwrap();
        let payload: Value = serde_json::from_str(text).unwrap();
        assert_eq!(payload["exists"], false);
    }

    #[tokio::test]
    async fn refresh_clears_search_memo() {
        let (_dir, ctx) = context_with_project().await;

        let args = json!({ "query": "calculateSum" });
        tools::dispatch(&ctx, "search", &args).await.unwrap();
        assert!(!ctx.search_memo.is_empty());

        tools::dispatch(&ctx, "refresh", &json!({})).await.unwrap();
        assert!(ctx.search_memo.is_empty());

        // A repeated query is served from the rebuilt memo
        tools::dispatch(&ctx, "search", &args).await.unwrap();
        tools::dispatch(&ctx, "search", &args).await.unwrap();
        assert_eq!(ctx.search_memo.len(), 1);
    }
}
