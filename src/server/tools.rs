//! Tool vocabulary and dispatch.
//!
//! Eight tools map onto the core: `search` (hybrid retrieval), `find_def`
//! / `find_refs` / `callers` / `callees` / `symbols` (symbol and call
//! navigation with preview extraction), `open_at` (file preview), and
//! `refresh` (incremental re-index). Inputs are parsed with explicit
//! coercion; anything malformed is `InvalidInput`.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{json, Value};

use crate::adapters::store::IndexStore;
use crate::application::indexing::Indexer;
use crate::application::search::{HybridSearch, SearchRequest};
use crate::domain::error::{Error, Result};
use crate::domain::types::Language;
use crate::infrastructure::astdocs::AstDocStore;

/// Default preview context lines around a span.
pub const DEFAULT_PREVIEW_LINES: u32 = 10;
/// Hard cap on preview context lines.
pub const MAX_PREVIEW_LINES: u32 = 50;

/// Shared state behind every tool call.
pub struct ToolContext {
    /// Project root
    pub root: std::path::PathBuf,
    /// Durable store
    pub store: Arc<IndexStore>,
    /// Hybrid search service
    pub search: Arc<HybridSearch>,
    /// Indexer for `refresh`
    pub indexer: Arc<Indexer>,
    /// AST documents
    pub astdocs: Arc<AstDocStore>,
    /// Memoized search responses, cleared by `refresh`
    pub search_memo: DashMap<String, Value>,
}

/// The fixed tool vocabulary with input schemas.
pub fn tool_list() -> Value {
    json!([
        {
            "name": "search",
            "description": "Hybrid lexical + semantic search over indexed code chunks.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Free-text query." },
                    "directory": { "type": "string", "description": "Restrict to paths under this directory." },
                    "language": { "type": "string", "enum": ["typescript", "tsx", "javascript", "python"] },
                    "limit": { "type": "integer", "minimum": 1, "maximum": 100, "description": "Maximum results (default 10)." }
                },
                "required": ["query"]
            }
        },
        {
            "name": "find_def",
            "description": "Find definitions of a symbol by exact name, with preview.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "name": { "type": "string" },
                    "context_lines": { "type": "integer", "minimum": 0, "maximum": 50 }
                },
                "required": ["name"]
            }
        },
        {
            "name": "find_refs",
            "description": "Find call-site references to a symbol by name, with preview.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "name": { "type": "string" },
                    "context_lines": { "type": "integer", "minimum": 0, "maximum": 50 }
                },
                "required": ["name"]
            }
        },
        {
            "name": "callers",
            "description": "Functions that call the named symbol (incoming edges).",
            "inputSchema": {
                "type": "object",
                "properties": { "name": { "type": "string" } },
                "required": ["name"]
            }
        },
        {
            "name": "callees",
            "description": "Calls made inside the named symbol's definition (outgoing edges).",
            "inputSchema": {
                "type": "object",
                "properties": { "name": { "type": "string" } },
                "required": ["name"]
            }
        },
        {
            "name": "open_at",
            "description": "Preview a file around a line. Returns exists=false for missing files.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Root-relative file path." },
                    "line": { "type": "integer", "minimum": 1 },
                    "context_lines": { "type": "integer", "minimum": 0, "maximum": 50 }
                },
                "required": ["path"]
            }
        },
        {
            "name": "refresh",
            "description": "Incrementally re-index changed files (optionally a specific set).",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "paths": { "type": "array", "items": { "type": "string" } }
                }
            }
        },
        {
            "name": "symbols",
            "description": "List symbols matching a substring, optionally scoped to one file.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "file": { "type": "string" },
                    "limit": { "type": "integer", "minimum": 1, "maximum": 200 }
                }
            }
        }
    ])
}

/// Dispatch one tool call; returns the JSON payload rendered into the
/// response's text content.
pub async fn dispatch(ctx: &ToolContext, name: &str, args: &Value) -> Result<Value> {
    match name {
        "search" => search(ctx, args).await,
        "find_def" => find_def(ctx, args).await,
        "find_refs" => find_refs(ctx, args).await,
        "callers" => callers(ctx, args).await,
        "callees" => callees(ctx, args).await,
        "open_at" => open_at(ctx, args).await,
        "refresh" => refresh(ctx, args).await,
        "symbols" => symbols(ctx, args).await,
        other => Err(Error::invalid_input(format!("unknown tool: {other}"))),
    }
}

/// Whether a tool name is part of the vocabulary (distinguishes the
/// unknown-tool error code from invalid arguments).
pub fn is_known_tool(name: &str) -> bool {
    matches!(
        name,
        "search" | "find_def" | "find_refs" | "callers" | "callees" | "open_at" | "refresh" | "symbols"
    )
}

// ── Argument coercion ───────────────────────────────────────────────────

fn required_str(args: &Value, key: &str) -> Result<String> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| Error::invalid_input(format!("missing or empty `{key}`")))
}

fn optional_str(args: &Value, key: &str) -> Option<String> {
    args.get(key).and_then(Value::as_str).map(str::to_string)
}

fn optional_u64(args: &Value, key: &str) -> Result<Option<u64>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .map(Some)
            .ok_or_else(|| Error::invalid_input(format!("`{key}` must be a non-negative integer"))),
    }
}

fn context_lines(args: &Value) -> Result<u32> {
    let lines = optional_u64(args, "context_lines")?
        .map(|v| v as u32)
        .unwrap_or(DEFAULT_PREVIEW_LINES);
    Ok(lines.min(MAX_PREVIEW_LINES))
}

// ── Preview extraction ──────────────────────────────────────────────────

async fn preview(
    ctx: &ToolContext,
    relative: &str,
    start_line: u32,
    end_line: u32,
    context: u32,
) -> Option<String> {
    let path = ctx.root.join(relative);
    let content = tokio::fs::read_to_string(&path).await.ok()?;
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() {
        return Some(String::new());
    }
    let last = ((end_line.saturating_sub(1) + context) as usize).min(lines.len() - 1);
    let first = (start_line.saturating_sub(1).saturating_sub(context) as usize).min(last);
    Some(lines[first..=last].join("\n"))
}

// ── Tool implementations ────────────────────────────────────────────────

async fn search(ctx: &ToolContext, args: &Value) -> Result<Value> {
    let query = required_str(args, "query")?;
    let limit = optional_u64(args, "limit")?.unwrap_or(10) as usize;
    let language = match optional_str(args, "language") {
        Some(name) => {
            let parsed: Language = name.parse().unwrap_or(Language::Unknown);
            if !parsed.is_supported() {
                return Err(Error::invalid_input(format!("unknown language: {name}")));
            }
            Some(parsed)
        }
        None => None,
    };

    let memo_key = args.to_string();
    if let Some(cached) = ctx.search_memo.get(&memo_key) {
        return Ok(cached.clone());
    }

    let request = SearchRequest {
        query,
        directory: optional_str(args, "directory"),
        language,
        limit,
    };
    let response = ctx.search.search(&request).await?;

    let returned = response.results.len();
    let payload = json!({
        "results": response.results,
        "returned": returned,
        "fallback_mode": response.fallback_mode,
        "total_time_ms": response.total_time_ms,
    });
    ctx.search_memo.insert(memo_key, payload.clone());
    Ok(payload)
}

async fn find_def(ctx: &ToolContext, args: &Value) -> Result<Value> {
    let name = required_str(args, "name")?;
    let context = context_lines(args)?;
    let symbols = ctx.store.symbols_by_name(&name, 50).await?;

    let mut definitions = Vec::new();
    for symbol in &symbols {
        let preview = preview(ctx, &symbol.file_path, symbol.start_line, symbol.end_line, context).await;
        definitions.push(json!({
            "name": symbol.name,
            "kind": symbol.kind,
            "file": symbol.file_path,
            "start_line": symbol.start_line,
            "end_line": symbol.end_line,
            "signature": symbol.signature,
            "parents": symbol.parents,
            "exported": symbol.metadata.is_exported,
            "preview": preview,
        }));
    }
    Ok(json!({ "name": name, "definitions": definitions, "returned": definitions.len() }))
}

async fn find_refs(ctx: &ToolContext, args: &Value) -> Result<Value> {
    let name = required_str(args, "name")?;
    let context = context_lines(args)?;
    let calls = ctx.store.calls_to(&name, 200).await?;

    let mut references = Vec::new();
    for call in &calls {
        let preview = preview(ctx, &call.file_path, call.start_line, call.end_line, context).await;
        references.push(json!({
            "file": call.file_path,
            "line": call.start_line,
            "kind": call.kind,
            "receiver": call.receiver,
            "argument_count": call.argument_count,
            "preview": preview,
        }));
    }
    Ok(json!({ "name": name, "references": references, "returned": references.len() }))
}

async fn callers(ctx: &ToolContext, args: &Value) -> Result<Value> {
    let name = required_str(args, "name")?;
    let calls = ctx.store.calls_to(&name, 200).await?;

    let mut callers = Vec::new();
    for call in &calls {
        let enclosing = ctx
            .store
            .enclosing_symbol(&call.file_path, call.start_line)
            .await?;
        callers.push(json!({
            "file": call.file_path,
            "line": call.start_line,
            "caller": enclosing.as_ref().map(|s| s.qualified_name()),
            "caller_kind": enclosing.as_ref().map(|s| s.kind),
        }));
    }
    Ok(json!({ "name": name, "callers": callers, "returned": callers.len() }))
}

async fn callees(ctx: &ToolContext, args: &Value) -> Result<Value> {
    let name = required_str(args, "name")?;
    let definitions = ctx.store.symbols_by_name(&name, 10).await?;

    let mut callees = Vec::new();
    for def in &definitions {
        let calls = ctx
            .store
            .calls_within(&def.file_path, def.start_line, def.end_line)
            .await?;
        for call in calls {
            // The definition's own header can match as a call in some
            // grammars; keep real outgoing edges only.
            if call.callee == name {
                continue;
            }
            callees.push(json!({
                "from": def.qualified_name(),
                "file": call.file_path,
                "line": call.start_line,
                "callee": call.callee,
                "kind": call.kind,
                "argument_count": call.argument_count,
            }));
        }
    }
    Ok(json!({ "name": name, "callees": callees, "returned": callees.len() }))
}

async fn open_at(ctx: &ToolContext, args: &Value) -> Result<Value> {
    let relative = required_str(args, "path")?;
    let line = optional_u64(args, "line")?.unwrap_or(1) as u32;
    let context = context_lines(args)?;

    let path = ctx.root.join(&relative);
    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(json!({ "path": relative, "exists": false }));
        }
        Err(e) => {
            return Err(Error::transient_io(format!("read {relative}: {e}")));
        }
    };

    let lines: Vec<&str> = content.lines().collect();
    let total = lines.len() as u32;
    let line = line.min(total.max(1));
    let last = ((line.saturating_sub(1) + context) as usize).min(lines.len().saturating_sub(1));
    let first = (line.saturating_sub(1).saturating_sub(context) as usize).min(last);
    let preview = if lines.is_empty() {
        String::new()
    } else {
        lines[first..=last].join("\n")
    };

    Ok(json!({
        "path": relative,
        "exists": true,
        "line": line,
        "total_lines": total,
        "preview": preview,
    }))
}

async fn refresh(ctx: &ToolContext, args: &Value) -> Result<Value> {
    let stats = match args.get("paths").and_then(Value::as_array) {
        Some(paths) => {
            let paths: Vec<String> = paths
                .iter()
                .map(|p| {
                    p.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| Error::invalid_input("`paths` must be strings"))
                })
                .collect::<Result<_>>()?;
            ctx.indexer.refresh_files(&paths).await?
        }
        None => ctx.indexer.refresh_index().await?,
    };

    ctx.search_memo.clear();

    Ok(json!({
        "total_files": stats.total_files,
        "indexed_files": stats.indexed_files,
        "skipped_files": stats.skipped_files,
        "deleted_files": stats.deleted_files,
        "total_chunks": stats.total_chunks,
        "duration_ms": stats.duration_ms,
    }))
}

async fn symbols(ctx: &ToolContext, args: &Value) -> Result<Value> {
    let query = optional_str(args, "query").unwrap_or_default();
    let file = optional_str(args, "file");
    let limit = optional_u64(args, "limit")?.unwrap_or(50).min(200) as usize;

    let symbols = match (&file, query.is_empty()) {
        // Whole-file listing keeps definition order
        (Some(file), true) => {
            let mut listed = ctx.store.symbols_for_file(file).await?;
            listed.truncate(limit);
            listed
        }
        _ => {
            ctx.store
                .symbols_matching(&query, file.as_deref(), limit)
                .await?
        }
    };

    let listed: Vec<Value> = symbols
        .iter()
        .map(|s| {
            json!({
                "name": s.name,
                "qualified_name": s.qualified_name(),
                "kind": s.kind,
                "file": s.file_path,
                "start_line": s.start_line,
                "end_line": s.end_line,
                "signature": s.signature,
                "exported": s.metadata.is_exported,
            })
        })
        .collect();
    Ok(json!({ "symbols": listed, "returned": listed.len() }))
}
