//! End-to-end scenarios across the full pipeline: index on disk, embed,
//! search, navigate.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use code_index::adapters::embedding::{hash_provider_factory, ProviderFactory};
use code_index::adapters::store::IndexStore;
use code_index::application::embedding::{EmbeddingEngine, EngineConfig};
use code_index::application::indexing::{EmbedPassOptions, Indexer, IndexerConfig};
use code_index::application::search::{HybridSearch, SearchConfig, SearchRequest};
use code_index::domain::error::Error;
use code_index::domain::types::{EmbeddingProfile, SearchFallbackMode};
use code_index::infrastructure::astdocs::AstDocStore;
use code_index::infrastructure::embedding_cache::EmbeddingCache;
use code_index::infrastructure::patterns::PatternStore;

struct Project {
    _dir: tempfile::TempDir,
    root: PathBuf,
    store: Arc<IndexStore>,
    engine: Arc<EmbeddingEngine>,
    indexer: Arc<Indexer>,
}

fn project_with(factory: ProviderFactory) -> Project {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let store = Arc::new(IndexStore::open_in_memory().unwrap());
    let astdocs = Arc::new(AstDocStore::new(root.join(".codeindex/ast")));
    let patterns = Arc::new(PatternStore::new());
    let engine = Arc::new(EmbeddingEngine::initialize(
        root.join(".codeindex/models"),
        Arc::new(EmbeddingCache::open_in_memory().unwrap()),
        None,
        factory,
        EngineConfig {
            max_fallback_attempts: 0,
            ..EngineConfig::default()
        },
        Some(EmbeddingProfile::light()),
    ));
    let indexer = Arc::new(Indexer::new(
        root.clone(),
        store.clone(),
        astdocs,
        patterns,
        Some(engine.clone()),
        IndexerConfig::default(),
    ));
    Project {
        _dir: dir,
        root,
        store,
        engine,
        indexer,
    }
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

#[tokio::test]
async fn identical_content_across_files_yields_one_chunk_hash() {
    let project = project_with(hash_provider_factory());
    write(&project.root, "a.js", "function add(a,b){ return a+b; }");
    write(&project.root, "b.js", "function add(a,b){ return a+b; }");
    project.indexer.full_index().await.unwrap();

    let a = project.store.chunks_for_file("a.js").await.unwrap();
    let b = project.store.chunks_for_file("b.js").await.unwrap();
    let mut hashes: Vec<String> = a
        .iter()
        .chain(b.iter())
        .filter(|c| c.name == "add")
        .map(|c| c.chunk_hash.clone())
        .collect();
    hashes.dedup();
    assert_eq!(hashes.len(), 1, "one unique chunk hash for `add`");
}

#[tokio::test]
async fn hybrid_fallback_returns_lexical_hits_with_vector_mode() {
    // Vector leg forced to fail: the provider factory always errors.
    let failing: ProviderFactory = Arc::new(|_p, _d| Err(Error::embedding("model unavailable")));
    let project = project_with(failing);

    write(
        &project.root,
        "src/one.js",
        "function calculateTax(amount) { return amount * 0.2; }",
    );
    write(
        &project.root,
        "src/two.js",
        "function calculateTip(amount) { return amount * 0.1; }",
    );
    write(
        &project.root,
        "src/three.js",
        "function calculateShipping(weight) { return weight * 2; }",
    );
    project.indexer.full_index().await.unwrap();

    let search = HybridSearch::new(
        project.store.clone(),
        project.engine.clone(),
        None,
        SearchConfig::default(),
    )
    .unwrap();

    let response = search
        .search(&SearchRequest::new("calculate", 10))
        .await
        .unwrap();

    assert_eq!(response.fallback_mode, Some(SearchFallbackMode::Vector));
    assert_eq!(response.results.len(), 3);
    // Lexical-only response: ordered by (normalized) lexical score
    for pair in response.results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
        assert!(pair[0].lexical_score.unwrap() >= pair[1].lexical_score.unwrap());
        assert!(pair[0].dense_score.is_none());
    }
}

#[tokio::test]
async fn full_hybrid_search_after_embed_pass() {
    let project = project_with(hash_provider_factory());
    write(
        &project.root,
        "src/auth.ts",
        "export function authenticateUser(token: string): boolean { return token.length > 0; }",
    );
    project.indexer.full_index().await.unwrap();
    let report = project
        .indexer
        .embed(&EmbedPassOptions::default())
        .await
        .unwrap();
    assert_eq!(report.failed, 0);
    assert!(report.embedded >= 1);

    let search = HybridSearch::new(
        project.store.clone(),
        project.engine.clone(),
        None,
        SearchConfig::default(),
    )
    .unwrap();
    let response = search
        .search(&SearchRequest::new("authenticateUser", 5))
        .await
        .unwrap();

    assert!(response.fallback_mode.is_none(), "both legs answered");
    assert_eq!(response.results[0].name, "authenticateUser");
    assert!(response.results[0].lexical_score.is_some());
    assert!(response.results[0].dense_score.is_some());
}

#[tokio::test]
async fn refresh_touches_only_the_changed_file() {
    let project = project_with(hash_provider_factory());
    for i in 0..20 {
        write(
            &project.root,
            &format!("src/mod{i}.ts"),
            &format!("export function handler{i}() {{ return {i}; }}"),
        );
    }
    project.indexer.full_index().await.unwrap();
    project
        .indexer
        .embed(&EmbedPassOptions::default())
        .await
        .unwrap();

    let before = project.store.list_files().await.unwrap();

    write(
        &project.root,
        "src/mod7.ts",
        "export function handler7() { return 777; }",
    );
    let stats = project.indexer.refresh_index().await.unwrap();
    assert_eq!(stats.indexed_files, 1, "exactly one file re-indexed");
    assert_eq!(stats.skipped_files, 19);

    let after = project.store.list_files().await.unwrap();
    for f_before in &before {
        let f_after = after.iter().find(|f| f.path == f_before.path).unwrap();
        if f_before.path == "src/mod7.ts" {
            assert_ne!(f_before.content_hash, f_after.content_hash);
        } else {
            assert_eq!(f_before.content_hash, f_after.content_hash);
            assert_eq!(f_before.last_indexed_at, f_after.last_indexed_at);
        }
    }
}

#[tokio::test]
async fn ast_documents_rehydrate_symbol_facts() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let astdocs = Arc::new(AstDocStore::new(root.join(".codeindex/ast")));
    let store = Arc::new(IndexStore::open_in_memory().unwrap());
    let patterns = Arc::new(PatternStore::new());
    let indexer = Indexer::new(
        root.clone(),
        store,
        astdocs.clone(),
        patterns,
        None,
        IndexerConfig::default(),
    );

    write(&root, "src/svc.py", "class Service:\n    def run(self):\n        return dispatch()\n");
    indexer.full_index().await.unwrap();

    let docs = astdocs.load_all().await.unwrap();
    assert_eq!(docs.len(), 1);
    let doc = &docs[0];
    assert_eq!(doc.path, "src/svc.py");
    let class = doc.classes.get("Service").unwrap();
    assert!(class.methods.contains_key("run"));
    assert!(doc.calls.iter().any(|c| c.callee == "dispatch"));
}
