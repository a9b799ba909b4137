//! code-index CLI.
//!
//! Commands: `init`, `index`, `embed`, `refresh`, `serve`, `config`,
//! `doctor`, `metrics`. Exit codes: 0 healthy, 1 detected issues,
//! 2 pre-condition failure (project not initialized).

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use code_index::adapters::embedding::default_provider_factory;
use code_index::adapters::store::IndexStore;
use code_index::application::embedding::{EmbedOpts, EmbeddingEngine, EngineConfig};
use code_index::application::indexing::{run_watch_loop, EmbedPassOptions, Indexer, IndexerConfig};
use code_index::application::search::{HybridSearch, SearchConfig};
use code_index::domain::error::Error;
use code_index::infrastructure::astdocs::AstDocStore;
use code_index::infrastructure::config::{ConfigDocument, ProjectPaths};
use code_index::infrastructure::embedding_cache::EmbeddingCache;
use code_index::infrastructure::hardware;
use code_index::infrastructure::patterns::PatternStore;
use code_index::infrastructure::telemetry::{self, Telemetry};
use code_index::infrastructure::watch::{FileWatcher, WatcherConfig};
use code_index::server::{run_server, ServerConfig, ToolContext};

#[derive(Parser, Debug)]
#[command(name = "code-index")]
#[command(about = "Project-scoped code intelligence index")]
#[command(version)]
struct Cli {
    /// Project root (defaults to the current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Set up project state under .codeindex/ and fetch the model
    Init,
    /// Build the initial index (full pass plus embeddings)
    Index,
    /// Generate embeddings for chunks missing a vector
    Embed {
        /// Re-embed every chunk
        #[arg(long)]
        rebuild: bool,
        /// Restrict to these files (re-indexed first)
        #[arg(long, num_args = 1..)]
        files: Vec<String>,
        /// Use a named profile
        #[arg(long)]
        profile: Option<String>,
    },
    /// Incrementally re-index changed files
    Refresh {
        /// Specific files to refresh (everything when omitted)
        paths: Vec<String>,
    },
    /// Run the JSON-RPC tool server on stdio, with the file watcher
    Serve,
    /// Read or write the persisted configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Check project health
    Doctor,
    /// Aggregate telemetry into a report
    Metrics {
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
        /// Read logs from this directory instead of .codeindex/logs
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Set a configuration key (currently `profile`)
    Set { key: String, value: String },
    /// Print one configuration key
    Get { key: String },
    /// Print the whole configuration document
    List,
    /// Manage custom profiles
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },
}

#[derive(Subcommand, Debug)]
enum ProfileAction {
    /// List presets and custom profiles
    List,
    /// Delete a custom profile
    Delete { name: String },
}

/// Everything a command needs, wired once.
struct Project {
    paths: ProjectPaths,
    config: ConfigDocument,
    store: Arc<IndexStore>,
    engine: Arc<EmbeddingEngine>,
    indexer: Arc<Indexer>,
    search: Arc<HybridSearch>,
    astdocs: Arc<AstDocStore>,
}

fn open_project(root: PathBuf) -> anyhow::Result<Project> {
    let paths = ProjectPaths::new(root);
    paths.require_initialized()?;
    let config = ConfigDocument::load(&paths.config_file())?;

    let store = Arc::new(IndexStore::open(&paths.index_db())?);
    let cache = Arc::new(EmbeddingCache::open(&paths.embedding_cache_db())?);
    let telemetry = Arc::new(Telemetry::new(paths.embedding_log(), paths.search_log()));
    let astdocs = Arc::new(AstDocStore::new(paths.ast_dir()));

    let patterns = Arc::new(PatternStore::new());
    if let Err(e) = patterns.load_gitignore(paths.root()) {
        tracing::warn!(error = %e, "gitignore load failed");
    }

    let engine = Arc::new(EmbeddingEngine::initialize(
        paths.models_dir(),
        cache,
        Some(telemetry.clone()),
        default_provider_factory(),
        EngineConfig::default(),
        Some(config.profile.clone()),
    ));

    let indexer = Arc::new(
        Indexer::new(
            paths.root().to_path_buf(),
            store.clone(),
            astdocs.clone(),
            patterns,
            Some(engine.clone()),
            IndexerConfig::default(),
        )
        .with_progress(Arc::new(|p| {
            if let Some(current) = &p.current {
                tracing::debug!(processed = p.processed, total = p.total, current = %current, "indexing");
            }
        })),
    );

    let search = Arc::new(HybridSearch::new(
        store.clone(),
        engine.clone(),
        Some(telemetry),
        SearchConfig::default(),
    )?);

    Ok(Project {
        paths,
        config,
        store,
        engine,
        indexer,
        search,
        astdocs,
    })
}

/// Append this run's fallback events into config.json.
fn persist_fallback_history(project: &mut Project) {
    let history = project.engine.fallback_history();
    if history.is_empty() {
        return;
    }
    project.config.fallback_history.extend(history);
    if let Err(e) = project.config.save(&project.paths.config_file()) {
        tracing::warn!(error = %e, "could not persist fallback history");
    }
}

async fn cmd_init(root: PathBuf) -> anyhow::Result<ExitCode> {
    let paths = ProjectPaths::new(root);
    paths.ensure_layout()?;

    // Open once so index.db exists with its schema
    let _store = IndexStore::open(&paths.index_db())?;

    let hw = hardware::detect();
    let profile = code_index::application::embedding::select_preset(&hw);
    println!(
        "Detected {} cores, {:.1} GiB RAM{} -> profile `{}`",
        hw.cpu_cores,
        hw.total_ram as f64 / (1u64 << 30) as f64,
        hw.gpu.as_ref().map(|g| format!(", {}", g.name)).unwrap_or_default(),
        profile.name
    );

    let mut config = ConfigDocument::new(profile.clone());
    config.hardware_capabilities = Some(hw);
    config.save(&paths.config_file())?;

    // Fetch model artifacts now so later runs work offline; an offline
    // init still succeeds and defers the download.
    let factory = default_provider_factory();
    match factory(&profile, &paths.models_dir()) {
        Ok(_) => println!("Model `{}` ready under {}", profile.model, paths.models_dir().display()),
        Err(e) => {
            tracing::warn!(error = %e, "model fetch deferred");
            println!("Model fetch deferred ({e}); run `code-index index` once online.");
        }
    }

    println!("Initialized {}", paths.state_dir().display());
    Ok(ExitCode::SUCCESS)
}

async fn cmd_index(root: PathBuf) -> anyhow::Result<ExitCode> {
    let mut project = open_project(root)?;
    let stats = project.indexer.full_index().await?;
    println!(
        "Indexed {}/{} files, {} chunks in {} ms",
        stats.indexed_files, stats.total_files, stats.total_chunks, stats.duration_ms
    );

    let report = project.indexer.embed(&EmbedPassOptions::default()).await?;
    println!(
        "Embedded {} chunks ({} pending, {} failed)",
        report.embedded, report.pending, report.failed
    );
    persist_fallback_history(&mut project);
    Ok(if report.failed > 0 { ExitCode::from(1) } else { ExitCode::SUCCESS })
}

async fn cmd_embed(
    root: PathBuf,
    rebuild: bool,
    files: Vec<String>,
    profile: Option<String>,
) -> anyhow::Result<ExitCode> {
    let mut project = open_project(root)?;

    if let Some(name) = &profile {
        let resolved = project
            .config
            .resolve_profile(name)
            .ok_or_else(|| Error::invalid_input(format!("unknown profile: {name}")))?;
        project.engine.switch_profile(resolved).await?;
        project.config.profile = project.engine.active_profile().await;
        project.config.save(&project.paths.config_file())?;
    }

    if !files.is_empty() {
        project.indexer.refresh_files(&files).await?;
    }

    if rebuild {
        let cleared = project.engine.clear_cache()?;
        tracing::info!(cleared, "embedding cache cleared for rebuild");
    }

    let options = EmbedPassOptions {
        force: rebuild,
        dry_run: false,
        opts: EmbedOpts {
            use_cache: !rebuild,
            ..EmbedOpts::default()
        },
    };
    let report = project.indexer.embed(&options).await?;
    println!(
        "Embedded {} of {} pending chunks ({} failed, {} orphans swept)",
        report.embedded, report.pending, report.failed, report.swept
    );
    persist_fallback_history(&mut project);
    Ok(if report.failed > 0 { ExitCode::from(1) } else { ExitCode::SUCCESS })
}

async fn cmd_refresh(root: PathBuf, paths: Vec<String>) -> anyhow::Result<ExitCode> {
    let project = open_project(root)?;
    let stats = if paths.is_empty() {
        project.indexer.refresh_index().await?
    } else {
        project.indexer.refresh_files(&paths).await?
    };
    println!(
        "Refreshed: {} indexed, {} unchanged, {} deleted in {} ms",
        stats.indexed_files, stats.skipped_files, stats.deleted_files, stats.duration_ms
    );
    Ok(ExitCode::SUCCESS)
}

async fn cmd_serve(root: PathBuf) -> anyhow::Result<ExitCode> {
    let project = open_project(root)?;

    // Keep the index coherent with the working tree while serving
    let patterns = Arc::new(PatternStore::new());
    let _ = patterns.load_gitignore(project.paths.root());
    let mut watcher = FileWatcher::start(project.paths.root(), patterns, WatcherConfig::default())?;
    let batches = watcher.take_batches().expect("fresh watcher");
    let cancel = CancellationToken::new();
    let watch_task = tokio::spawn(run_watch_loop(
        project.indexer.clone(),
        batches,
        cancel.clone(),
    ));

    let ctx = Arc::new(ToolContext {
        root: project.paths.root().to_path_buf(),
        store: project.store.clone(),
        search: project.search.clone(),
        indexer: project.indexer.clone(),
        astdocs: project.astdocs.clone(),
        search_memo: DashMap::new(),
    });
    let config = ServerConfig {
        auth_token: std::env::var("CODEINDEX_AUTH_TOKEN").ok(),
        ..ServerConfig::default()
    };

    run_server(ctx, config).await?;

    let stats = watcher.stats();
    tracing::info!(
        received = stats.events_received,
        processed = stats.events_processed,
        batches = stats.batches_emitted,
        compression = stats.compression_ratio,
        "watcher shutting down"
    );
    cancel.cancel();
    watcher.shutdown();
    let _ = watch_task.await;
    project.engine.close().await;
    Ok(ExitCode::SUCCESS)
}

async fn cmd_config(root: PathBuf, action: ConfigAction) -> anyhow::Result<ExitCode> {
    let paths = ProjectPaths::new(root);
    paths.require_initialized()?;
    let mut config = ConfigDocument::load(&paths.config_file())?;

    match action {
        ConfigAction::List => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigAction::Get { key } => {
            let doc = serde_json::to_value(&config)?;
            match doc.get(&key) {
                Some(value) => println!("{}", serde_json::to_string_pretty(value)?),
                None => {
                    eprintln!("unknown key: {key}");
                    return Ok(ExitCode::from(1));
                }
            }
        }
        ConfigAction::Set { key, value } => match key.as_str() {
            "profile" => {
                let profile = config
                    .resolve_profile(&value)
                    .ok_or_else(|| Error::invalid_input(format!("unknown profile: {value}")))?;
                config.profile = profile;
                config.save(&paths.config_file())?;
                println!("profile = {value}");
            }
            other => {
                eprintln!("unsupported key: {other} (supported: profile)");
                return Ok(ExitCode::from(1));
            }
        },
        ConfigAction::Profile { action } => match action {
            ProfileAction::List => {
                for name in ["light", "balanced", "performance"] {
                    let marker = if config.profile.name == name { "*" } else { " " };
                    println!("{marker} {name} (preset)");
                }
                for profile in &config.custom_profiles {
                    let marker = if config.profile.name == profile.name { "*" } else { " " };
                    println!("{marker} {} ({} dims, {})", profile.name, profile.dimensions, profile.model);
                }
            }
            ProfileAction::Delete { name } => {
                if config.delete_profile(&name) {
                    config.save(&paths.config_file())?;
                    println!("deleted profile {name}");
                } else {
                    eprintln!("no custom profile named {name}");
                    return Ok(ExitCode::from(1));
                }
            }
        },
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_doctor(root: PathBuf) -> anyhow::Result<ExitCode> {
    let paths = ProjectPaths::new(root);
    if !paths.is_initialized() {
        eprintln!("not initialized: run `code-index init` in the project root");
        return Ok(ExitCode::from(2));
    }

    let mut issues = 0u32;

    match ConfigDocument::load(&paths.config_file()) {
        Ok(config) => println!("config: ok (profile `{}`)", config.profile.name),
        Err(e) => {
            issues += 1;
            println!("config: FAIL ({e})");
        }
    }

    match IndexStore::open(&paths.index_db()) {
        Ok(store) => match store.health_check().await {
            Ok(health) if health.ok => println!(
                "store: ok ({} files, {} chunks, {} embeddings, wal {} bytes)",
                health.files, health.chunks, health.embeddings, health.wal_bytes
            ),
            Ok(health) => {
                issues += 1;
                println!("store: FAIL (integrity: {})", health.integrity);
            }
            Err(e) => {
                issues += 1;
                println!("store: FAIL ({e})");
            }
        },
        Err(e) => {
            issues += 1;
            println!("store: FAIL ({e})");
        }
    }

    match EmbeddingCache::open(&paths.embedding_cache_db()) {
        Ok(cache) => match cache.stats() {
            Ok(stats) => println!("embedding cache: ok ({} entries)", stats.entries),
            Err(e) => {
                issues += 1;
                println!("embedding cache: FAIL ({e})");
            }
        },
        Err(e) => {
            issues += 1;
            println!("embedding cache: FAIL ({e})");
        }
    }

    let astdocs = AstDocStore::new(paths.ast_dir());
    match astdocs.load_all().await {
        Ok(docs) => println!("ast documents: ok ({} files)", docs.len()),
        Err(e) => {
            issues += 1;
            println!("ast documents: FAIL ({e})");
        }
    }

    if paths.logs_dir().is_dir() {
        println!("logs: ok ({})", paths.logs_dir().display());
    } else {
        issues += 1;
        println!("logs: FAIL (missing {})", paths.logs_dir().display());
    }

    if issues == 0 {
        println!("healthy");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("{issues} issue(s) found");
        Ok(ExitCode::from(1))
    }
}

async fn cmd_metrics(root: PathBuf, json: bool, log_dir: Option<PathBuf>) -> anyhow::Result<ExitCode> {
    let paths = ProjectPaths::new(root);
    let (embedding_log, search_log) = match log_dir {
        Some(dir) => (dir.join("embedding.jsonl"), dir.join("search-performance.jsonl")),
        None => (paths.embedding_log(), paths.search_log()),
    };

    let report = telemetry::aggregate(&embedding_log, &search_log)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("search queries: {}", report.search.total_queries);
        println!(
            "latency p50/p95/p99: {} / {} / {} ms",
            report.search.p50_ms, report.search.p95_ms, report.search.p99_ms
        );
        println!(
            "sla violations: {:.1}%  hybrid: {:.1}%  lexical-only: {:.1}%  vector-only: {:.1}%",
            report.search.sla_violation_rate * 100.0,
            report.search.hybrid_rate * 100.0,
            report.search.lexical_only_rate * 100.0,
            report.search.vector_only_rate * 100.0
        );
        println!("fallback events: {}", report.fallbacks.total_events);
        for (action, count) in &report.fallbacks.by_action {
            println!("  {action}: {count}");
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn exit_code_for(err: &anyhow::Error) -> ExitCode {
    if let Some(Error::NotInitialized { .. }) = err.downcast_ref::<Error>() {
        ExitCode::from(2)
    } else {
        ExitCode::from(1)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("code_index=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let root = cli
        .root
        .clone()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let result = match cli.command {
        Command::Init => cmd_init(root).await,
        Command::Index => cmd_index(root).await,
        Command::Embed {
            rebuild,
            files,
            profile,
        } => cmd_embed(root, rebuild, files, profile).await,
        Command::Refresh { paths } => cmd_refresh(root, paths).await,
        Command::Serve => cmd_serve(root).await,
        Command::Config { action } => cmd_config(root, action).await,
        Command::Doctor => cmd_doctor(root).await,
        Command::Metrics { json, log_dir } => cmd_metrics(root, json, log_dir).await,
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            exit_code_for(&err)
        }
    }
}
