//! Code Intelligence Domain Model
//!
//! Defines the entities shared across the indexing and retrieval pipeline:
//! content-addressed code chunks, extracted symbols and call sites, file
//! change events, ignore patterns, embedding profiles and the hardware
//! capability snapshot that drives profile selection.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Supported source languages, detected by file extension.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Language {
    /// TypeScript (`.ts`)
    TypeScript,
    /// TypeScript with JSX (`.tsx`)
    Tsx,
    /// JavaScript (`.js`, `.jsx`, `.mjs`, `.cjs`)
    JavaScript,
    /// Python (`.py`)
    Python,
    /// Unrecognized extension; skipped by the indexer
    Unknown,
}

impl Language {
    /// Detect the language from a file extension (without the dot).
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "ts" => Language::TypeScript,
            "tsx" => Language::Tsx,
            "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
            "py" => Language::Python,
            _ => Language::Unknown,
        }
    }

    /// Detect the language from a file path.
    pub fn from_path(path: &std::path::Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or(Language::Unknown)
    }

    /// Stable lowercase name used in the store and in tool responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::TypeScript => "typescript",
            Language::Tsx => "tsx",
            Language::JavaScript => "javascript",
            Language::Python => "python",
            Language::Unknown => "unknown",
        }
    }

    /// Whether the indexer should process files of this language.
    pub fn is_supported(&self) -> bool {
        !matches!(self, Language::Unknown)
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Language {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "typescript" => Language::TypeScript,
            "tsx" => Language::Tsx,
            "javascript" => Language::JavaScript,
            "python" => Language::Python,
            _ => Language::Unknown,
        })
    }
}

/// Kind of semantic unit a chunk represents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    /// Plain function declaration
    Function,
    /// `async` function
    AsyncFunction,
    /// Generator function (`function*` / `def` with `yield` is still Function)
    Generator,
    /// Method inside a class
    Method,
    /// Class constructor
    Constructor,
    /// Class property with an initializer
    Property,
    /// Class declaration itself (emitted when the class has no methods)
    Class,
    /// Module-level remainder for files with no definitions
    Module,
}

impl ChunkKind {
    /// Stable snake_case name used in hashing and in the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Function => "function",
            ChunkKind::AsyncFunction => "async_function",
            ChunkKind::Generator => "generator",
            ChunkKind::Method => "method",
            ChunkKind::Constructor => "constructor",
            ChunkKind::Property => "property",
            ChunkKind::Class => "class",
            ChunkKind::Module => "module",
        }
    }
}

impl std::fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Contextual metadata preserved with each chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ChunkContext {
    /// Enclosing class name for methods/constructors/properties
    pub class_name: Option<String>,
    /// Direct parents of the enclosing class
    pub class_inheritance: Vec<String>,
    /// Module path (relative file path without extension)
    pub module_path: String,
    /// Enclosing namespace, when the language has one
    pub namespace: Option<String>,
    /// Whether the definition sits at the top level of the file
    pub is_top_level: bool,
    /// Hash of the enclosing chunk, for members of a class
    pub parent_chunk_hash: Option<String>,
}

/// A content-addressed semantic unit of code.
///
/// The `chunk_hash` is a SHA-256 over the normalized form of the chunk
/// (kind, name, signature, documentation, whitespace-collapsed body), so
/// identical semantic chunks in different files or runs share a hash,
/// whitespace-only edits do not change it, and documentation or code edits
/// do.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CodeChunk {
    /// Content-addressed identity (64 lowercase hex chars)
    pub chunk_hash: String,
    /// Kind of semantic unit
    pub kind: ChunkKind,
    /// Declared name (file stem for module-level chunks)
    pub name: String,
    /// Reconstructed signature, when the unit has one
    pub signature: Option<String>,
    /// Immediately preceding documentation, when contiguous
    pub documentation: Option<String>,
    /// 1-based first line of the chunk span
    pub start_line: u32,
    /// 1-based last line of the chunk span (inclusive)
    pub end_line: u32,
    /// Byte offset of the span start
    pub start_byte: u32,
    /// Byte offset one past the span end
    pub end_byte: u32,
    /// Source language
    pub language: Language,
    /// Contextual metadata (enclosing class, module path, nesting)
    pub context: ChunkContext,
    /// Verbatim chunk content, including decorators and trivia
    pub content: String,
}

/// Symbol kinds recorded by the extractor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    /// Free function
    Function,
    /// Class method
    Method,
    /// Class constructor
    Constructor,
    /// Class property
    Property,
    /// Class declaration
    Class,
    /// Interface declaration (TS)
    Interface,
    /// Type alias (TS)
    Type,
    /// Enum declaration (TS)
    Enum,
    /// Mutable binding (`let`, `var`)
    Variable,
    /// Immutable binding (`const`)
    Constant,
    /// Namespace/module declaration (TS)
    Namespace,
}

impl SymbolKind {
    /// Stable snake_case name used in the store and tool responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Method => "method",
            SymbolKind::Constructor => "constructor",
            SymbolKind::Property => "property",
            SymbolKind::Class => "class",
            SymbolKind::Interface => "interface",
            SymbolKind::Type => "type",
            SymbolKind::Enum => "enum",
            SymbolKind::Variable => "variable",
            SymbolKind::Constant => "constant",
            SymbolKind::Namespace => "namespace",
        }
    }
}

impl std::fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Attribute flags recorded per symbol; async/generator are metadata, not
/// separate kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SymbolMetadata {
    /// Declared `async`
    #[serde(default)]
    pub is_async: bool,
    /// Declared `static`
    #[serde(default)]
    pub is_static: bool,
    /// Syntactically exported (`export` modifier or module re-export)
    #[serde(default)]
    pub is_exported: bool,
    /// Generator definition (`function*`)
    #[serde(default)]
    pub is_generator: bool,
}

/// An extracted symbol with its span and enclosing scope chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Symbol {
    /// Declared name
    pub name: String,
    /// Grammar-derived kind
    pub kind: SymbolKind,
    /// 1-based first line of the definition
    pub start_line: u32,
    /// 1-based last line of the definition (inclusive)
    pub end_line: u32,
    /// Reconstructed signature, when the symbol has one
    pub signature: Option<String>,
    /// Enclosing named scopes, outermost first; empty for top-level symbols
    pub parents: Vec<String>,
    /// Attribute flags
    pub metadata: SymbolMetadata,
}

impl Symbol {
    /// Dotted qualified name: parents joined with `.` plus the own name.
    pub fn qualified_name(&self) -> String {
        if self.parents.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.parents.join("."), self.name)
        }
    }
}

/// Call classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    /// Bare function call
    Function,
    /// Method call through a receiver
    Method,
    /// `new`-style constructor call
    Constructor,
    /// Computed callee (`obj[k]()`)
    Dynamic,
}

impl CallKind {
    /// Stable snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            CallKind::Function => "function",
            CallKind::Method => "method",
            CallKind::Constructor => "constructor",
            CallKind::Dynamic => "dynamic",
        }
    }
}

/// Position of a call inside a method chain like `a.f().g().h()`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallChain {
    /// 0-based position within the chain
    pub position: u32,
    /// Callee name of the previous link, when any
    pub previous: Option<String>,
    /// Callee name of the next link, when any
    pub next: Option<String>,
}

/// Callee name recorded for computed callees.
pub const DYNAMIC_CALLEE: &str = "<dynamic>";

/// An extracted call site.
///
/// Calls reference their surrounding chunk/symbol by enclosing span;
/// resolution to a definition by name happens at query time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallSite {
    /// Callee name, or [`DYNAMIC_CALLEE`] when computed
    pub callee: String,
    /// Receiver expression text for method calls
    pub receiver: Option<String>,
    /// Call classification
    pub kind: CallKind,
    /// Number of top-level argument nodes
    pub argument_count: u32,
    /// 1-based line of the call expression
    pub start_line: u32,
    /// 1-based last line of the call expression
    pub end_line: u32,
    /// Chain position when part of a call chain
    pub chain: Option<CallChain>,
}

/// One imported binding: `import { imported as local }`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportSpecifier {
    /// Local binding name
    pub local: String,
    /// Name as exported by the source module
    pub imported: String,
}

/// An import statement with its module identifier and bindings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportRecord {
    /// Module identifier as written in source
    pub module: String,
    /// Imported bindings
    pub specifiers: Vec<ImportSpecifier>,
}

/// One exported binding: `export { local as exported }`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportSpecifier {
    /// Local name
    pub local: String,
    /// Name visible to importers
    pub exported: String,
}

/// An export statement; `module` is set for re-exports.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportRecord {
    /// Source module for `export ... from "m"` re-exports
    pub module: Option<String>,
    /// Exported bindings
    pub specifiers: Vec<ExportSpecifier>,
}

/// A class with its members, as extracted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ClassFacts {
    /// The class declaration symbol
    pub symbol: Option<Symbol>,
    /// Direct parent classes (single `extends` for TS/JS, all positional
    /// bases for Python, including qualified names)
    pub inheritance: Vec<String>,
    /// Methods keyed by name
    pub methods: BTreeMap<String, Symbol>,
    /// Properties keyed by name
    pub properties: BTreeMap<String, Symbol>,
}

/// Per-file structured facts produced by the extractor.
///
/// Keyed collections use the symbol's qualified name so nested definitions
/// do not collide with top-level ones.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AstDocument {
    /// Relative file path this document describes
    pub path: String,
    /// Detected language
    pub language: Option<Language>,
    /// Free and nested functions keyed by qualified name
    pub functions: BTreeMap<String, Symbol>,
    /// Classes keyed by qualified name
    pub classes: BTreeMap<String, ClassFacts>,
    /// Interfaces keyed by name
    pub interfaces: BTreeMap<String, Symbol>,
    /// Type aliases keyed by name
    pub types: BTreeMap<String, Symbol>,
    /// Enums keyed by name
    pub enums: BTreeMap<String, Symbol>,
    /// Module-level bindings keyed by name
    pub variables: BTreeMap<String, Symbol>,
    /// Import statements in source order
    pub imports: Vec<ImportRecord>,
    /// Export statements in source order
    pub exports: Vec<ExportRecord>,
    /// Call sites in source order
    pub calls: Vec<CallSite>,
}

impl AstDocument {
    /// Iterate every symbol in the document, members included.
    pub fn all_symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.functions
            .values()
            .chain(self.classes.values().flat_map(|c| {
                c.symbol
                    .iter()
                    .chain(c.methods.values())
                    .chain(c.properties.values())
            }))
            .chain(self.interfaces.values())
            .chain(self.types.values())
            .chain(self.enums.values())
            .chain(self.variables.values())
    }
}

/// Filesystem change classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum FileChangeType {
    /// File appeared
    Create,
    /// File content changed
    Modify,
    /// File disappeared
    Delete,
    /// File was renamed
    Rename,
}

impl FileChangeType {
    /// Processing precedence within a flushed batch; lower runs first.
    pub fn processing_rank(&self) -> u8 {
        match self {
            FileChangeType::Delete => 0,
            FileChangeType::Rename => 1,
            FileChangeType::Create => 2,
            FileChangeType::Modify => 3,
        }
    }
}

/// A normalized filesystem event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileChangeEvent {
    /// Canonicalized absolute path
    pub canonical_path: PathBuf,
    /// Path relative to the watched project root
    pub relative_path: PathBuf,
    /// Change classification
    pub change: FileChangeType,
    /// File size, when known
    pub size: Option<u64>,
    /// Whether the path is a directory
    pub is_directory: bool,
    /// Whether the path is a symlink
    pub is_symlink: bool,
    /// When the event was observed
    pub timestamp: DateTime<Utc>,
}

/// Pattern syntax for ignore rules.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PatternType {
    /// Minimatch-style glob (dot-sensitive, match-base)
    Glob,
    /// Full regex
    Regex,
    /// Exact relative-path match
    Exact,
}

/// Where an ignore pattern came from; drives priority defaults.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PatternSource {
    /// Built-in defaults (priority 1000)
    Default,
    /// `.gitignore` entries (priority 800)
    Gitignore,
    /// User configuration (priority <= 500)
    Config,
}

impl PatternSource {
    /// Default priority assigned to patterns from this source.
    pub fn default_priority(&self) -> u16 {
        match self {
            PatternSource::Default => 1000,
            PatternSource::Gitignore => 800,
            PatternSource::Config => 500,
        }
    }
}

/// An ignore rule; higher priority wins on conflict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IgnorePattern {
    /// The pattern text
    pub pattern: String,
    /// Pattern syntax
    pub pattern_type: PatternType,
    /// Origin of the pattern
    pub source: PatternSource,
    /// Precedence in `[0, 1000]`
    pub priority: u16,
    /// Disabled patterns are kept but never match
    pub enabled: bool,
}

impl IgnorePattern {
    /// Construct an enabled pattern with the source's default priority.
    pub fn new<S: Into<String>>(pattern: S, pattern_type: PatternType, source: PatternSource) -> Self {
        Self {
            pattern: pattern.into(),
            pattern_type,
            source,
            priority: source.default_priority(),
            enabled: true,
        }
    }
}

/// Which search leg was absent from a degraded hybrid response.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SearchFallbackMode {
    /// Vector leg failed or timed out; results are lexical-only
    Vector,
    /// Lexical leg failed; results are vector-only
    Lexical,
}

/// A ranked hybrid search result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    /// Matched chunk identity
    pub chunk_hash: String,
    /// Source file path (relative to the project root)
    pub file_path: String,
    /// First line of the chunk
    pub start_line: u32,
    /// Last line of the chunk
    pub end_line: u32,
    /// Chunk kind
    pub kind: ChunkKind,
    /// Chunk name
    pub name: String,
    /// Matched content
    pub content: String,
    /// Fused score in `[0, 1]`
    pub score: f32,
    /// Normalized lexical score, when that leg contributed
    pub lexical_score: Option<f32>,
    /// Normalized dense score, when that leg contributed
    pub dense_score: Option<f32>,
}

/// Per-query performance record appended to the search telemetry sink.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchPerformanceRecord {
    /// When the query completed
    pub timestamp: DateTime<Utc>,
    /// Lexical leg latency
    pub lexical_time_ms: u64,
    /// Vector leg latency
    pub vector_time_ms: u64,
    /// Fusion/ordering latency
    pub ranking_time_ms: u64,
    /// End-to-end latency
    pub total_time_ms: u64,
    /// Candidates returned by the lexical leg
    pub lexical_candidates: usize,
    /// Candidates returned by the vector leg
    pub vector_candidates: usize,
    /// Size of the unioned candidate set
    pub unique_candidates: usize,
    /// Whether the latency budget was exceeded
    pub sla_violation: bool,
    /// Absent leg, when the response was degraded
    pub fallback_mode: Option<SearchFallbackMode>,
}

/// Inference backend for an embedding profile.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// ONNX Runtime
    Onnx,
    /// PyTorch (reserved; not loaded by this implementation)
    Pytorch,
}

/// Compute device for inference.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// CPU execution
    Cpu,
    /// Apple Metal Performance Shaders
    Mps,
    /// NVIDIA CUDA
    Cuda,
    /// Resolve per detected hardware at selection time
    Auto,
}

/// Weight quantization for inference.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Quantization {
    /// 8-bit integer
    Int8,
    /// 4-bit integer
    Int4,
    /// Half precision
    Fp16,
    /// Full precision
    Fp32,
    /// Resolve per detected hardware at selection time
    Auto,
}

/// A named bundle of embedding settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingProfile {
    /// Profile name (`light`, `balanced`, `performance`, or custom)
    pub name: String,
    /// Model identifier
    pub model: String,
    /// Model version tag, part of the embedding cache key
    pub model_version: String,
    /// Inference backend
    pub backend: Backend,
    /// Compute device
    pub device: Device,
    /// Weight quantization
    pub quantization: Quantization,
    /// Batch size in `[1, 256]`
    pub batch_size: u16,
    /// Output vector dimensionality
    pub dimensions: usize,
    /// Model artifact cache directory override
    pub cache_dir: Option<PathBuf>,
}

impl EmbeddingProfile {
    /// CPU-friendly preset: int8, small batches.
    pub fn light() -> Self {
        Self {
            name: "light".to_string(),
            model: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            model_version: "1".to_string(),
            backend: Backend::Onnx,
            device: Device::Cpu,
            quantization: Quantization::Int8,
            batch_size: 16,
            dimensions: 384,
            cache_dir: None,
        }
    }

    /// Default preset: fp16, moderate batches.
    pub fn balanced() -> Self {
        Self {
            name: "balanced".to_string(),
            model: "BAAI/bge-small-en-v1.5".to_string(),
            model_version: "1".to_string(),
            backend: Backend::Onnx,
            device: Device::Auto,
            quantization: Quantization::Fp16,
            batch_size: 32,
            dimensions: 384,
            cache_dir: None,
        }
    }

    /// GPU preset: fp16, large batches.
    pub fn performance() -> Self {
        Self {
            name: "performance".to_string(),
            model: "BAAI/bge-base-en-v1.5".to_string(),
            model_version: "1".to_string(),
            backend: Backend::Onnx,
            device: Device::Auto,
            quantization: Quantization::Fp16,
            batch_size: 64,
            dimensions: 768,
            cache_dir: None,
        }
    }

    /// Look up a preset by name.
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "light" => Some(Self::light()),
            "balanced" => Some(Self::balanced()),
            "performance" => Some(Self::performance()),
            _ => None,
        }
    }

    /// Identifier used as `model_id` in embedding keys.
    pub fn model_id(&self) -> &str {
        &self.model
    }
}

/// Discrete GPU facts, when one is visible.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GpuInfo {
    /// Vendor string (`nvidia`, `apple`, ...)
    pub vendor: String,
    /// Device name
    pub name: String,
    /// Device memory in bytes, when known
    pub memory: Option<u64>,
    /// CUDA compute capability (`major.minor`), when known
    pub compute_capability: Option<String>,
}

/// Snapshot of the host hardware, immutable for the process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HardwareCapabilities {
    /// Operating system (`linux`, `macos`, `windows`)
    pub platform: String,
    /// CPU architecture (`x86_64`, `aarch64`)
    pub arch: String,
    /// Logical CPU core count
    pub cpu_cores: usize,
    /// CPU brand string
    pub cpu_model: String,
    /// Total RAM in bytes
    pub total_ram: u64,
    /// Available RAM in bytes at detection time
    pub free_ram: u64,
    /// Discrete GPU, when visible
    pub gpu: Option<GpuInfo>,
    /// Available ONNX execution providers
    pub onnx_providers: Vec<String>,
}

/// Remediation applied by the embedding fallback chain.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FallbackAction {
    /// Halve the batch size (minimum 1)
    ReduceBatch,
    /// Step quantization down (fp16 -> int8, fp32 -> fp16)
    SwitchQuantization,
    /// Move inference to CPU
    SwitchDevice,
    /// Step down the preset chain (performance -> balanced -> light)
    SwitchModel,
}

/// One appended, never-mutated record of a fallback attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FallbackEvent {
    /// When the attempt happened
    pub timestamp: DateTime<Utc>,
    /// Remediation applied
    pub action: FallbackAction,
    /// Setting before the change
    pub from: String,
    /// Setting after the change
    pub to: String,
    /// Failure that triggered the attempt
    pub reason: String,
    /// Whether the retry after this change succeeded
    pub success: bool,
}

/// Summary of an indexing pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct IndexingStats {
    /// Files discovered
    pub total_files: u32,
    /// Files (re-)indexed in this pass
    pub indexed_files: u32,
    /// Files skipped because their content hash matched
    pub skipped_files: u32,
    /// Files removed from the index
    pub deleted_files: u32,
    /// Chunks written in this pass
    pub total_chunks: u32,
    /// Wall-clock duration
    pub duration_ms: u64,
}

/// Watcher counters surfaced for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct WatcherStats {
    /// Milliseconds since the watcher started
    pub uptime_ms: u64,
    /// Raw events received from the OS
    pub events_received: u64,
    /// Events that survived ignore filtering and coalescing
    pub events_processed: u64,
    /// Batches flushed to the indexer
    pub batches_emitted: u64,
    /// Mean events per flushed batch
    pub average_batch_size: f64,
    /// `1 - processed/received`; share of events removed by coalescing
    pub compression_ratio: f64,
    /// Events currently buffered
    pub pending: usize,
}

/// Entry counts and integrity facts from the durable store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StoreHealth {
    /// Whether `PRAGMA integrity_check` passed
    pub ok: bool,
    /// Raw integrity check result
    pub integrity: String,
    /// Row counts per logical table
    pub files: u64,
    /// Chunk rows
    pub chunks: u64,
    /// Symbol rows
    pub symbols: u64,
    /// Call rows
    pub calls: u64,
    /// Embedding rows
    pub embeddings: u64,
    /// Write-ahead log size in bytes
    pub wal_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_detection_covers_spec_extensions() {
        assert_eq!(Language::from_extension("ts"), Language::TypeScript);
        assert_eq!(Language::from_extension("tsx"), Language::Tsx);
        assert_eq!(Language::from_extension("js"), Language::JavaScript);
        assert_eq!(Language::from_extension("jsx"), Language::JavaScript);
        assert_eq!(Language::from_extension("py"), Language::Python);
        assert_eq!(Language::from_extension("rs"), Language::Unknown);
    }

    #[test]
    fn change_type_processing_order() {
        let mut types = vec![
            FileChangeType::Modify,
            FileChangeType::Create,
            FileChangeType::Rename,
            FileChangeType::Delete,
        ];
        types.sort_by_key(|t| t.processing_rank());
        assert_eq!(
            types,
            vec![
                FileChangeType::Delete,
                FileChangeType::Rename,
                FileChangeType::Create,
                FileChangeType::Modify,
            ]
        );
    }

    #[test]
    fn pattern_source_priorities() {
        assert_eq!(PatternSource::Default.default_priority(), 1000);
        assert_eq!(PatternSource::Gitignore.default_priority(), 800);
        assert!(PatternSource::Config.default_priority() <= 500);
    }

    #[test]
    fn qualified_names_chain_parents() {
        let sym = Symbol {
            name: "inner".to_string(),
            kind: SymbolKind::Function,
            start_line: 2,
            end_line: 4,
            signature: None,
            parents: vec!["outer".to_string()],
            metadata: SymbolMetadata::default(),
        };
        assert_eq!(sym.qualified_name(), "outer.inner");
    }
}
