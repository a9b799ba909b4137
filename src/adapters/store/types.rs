//! Row types read back from the durable store.

use serde::{Deserialize, Serialize};

use crate::domain::types::{CallChain, CallKind, ChunkContext, ChunkKind, Language, SymbolKind, SymbolMetadata};

/// A file row.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFile {
    /// Stable per-project id
    pub id: i64,
    /// Relative path
    pub path: String,
    /// Content hash at last index time
    pub content_hash: String,
    /// Detected language
    pub language: Language,
    /// Size in bytes at last index time
    pub size: u64,
    /// Unix timestamp of the last index pass that touched this file
    pub last_indexed_at: i64,
}

/// A chunk row joined with its owning file path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredChunk {
    /// Row id
    pub id: i64,
    /// Content-addressed identity
    pub chunk_hash: String,
    /// Owning file id
    pub file_id: i64,
    /// Owning file path (joined)
    pub file_path: String,
    /// Chunk kind
    pub kind: ChunkKind,
    /// Chunk name
    pub name: String,
    /// Signature, when present
    pub signature: Option<String>,
    /// Documentation, when present
    pub documentation: Option<String>,
    /// First line
    pub start_line: u32,
    /// Last line
    pub end_line: u32,
    /// Span start byte
    pub start_byte: u32,
    /// Span end byte
    pub end_byte: u32,
    /// Language
    pub language: Language,
    /// Contextual metadata
    pub context: ChunkContext,
    /// Verbatim content
    pub content: String,
}

/// A symbol row joined with its owning file path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSymbol {
    /// Owning file id
    pub file_id: i64,
    /// Owning file path (joined)
    pub file_path: String,
    /// Symbol name
    pub name: String,
    /// Symbol kind
    pub kind: SymbolKind,
    /// First line of the definition
    pub start_line: u32,
    /// Last line of the definition
    pub end_line: u32,
    /// Signature, when present
    pub signature: Option<String>,
    /// Enclosing scope chain, outermost first
    pub parents: Vec<String>,
    /// Attribute flags
    pub metadata: SymbolMetadata,
}

impl StoredSymbol {
    /// Dotted qualified name: parents joined with `.` plus the own name.
    pub fn qualified_name(&self) -> String {
        if self.parents.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.parents.join("."), self.name)
        }
    }
}

/// A call row joined with its owning file path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCall {
    /// Owning file id
    pub file_id: i64,
    /// Owning file path (joined)
    pub file_path: String,
    /// Callee name
    pub callee: String,
    /// Call classification
    pub kind: CallKind,
    /// Receiver expression for method calls
    pub receiver: Option<String>,
    /// Top-level argument count
    pub argument_count: u32,
    /// First line of the call expression
    pub start_line: u32,
    /// Last line of the call expression
    pub end_line: u32,
    /// Chain metadata, when part of a chain
    pub chain: Option<CallChain>,
}

/// A lexical search candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct LexicalCandidate {
    /// Matched chunk identity
    pub chunk_hash: String,
    /// Raw lexical relevance (higher is better)
    pub score: f32,
}

/// Aggregate row counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    /// File rows
    pub files: u64,
    /// Chunk rows
    pub chunks: u64,
    /// Symbol rows
    pub symbols: u64,
    /// Call rows
    pub calls: u64,
    /// Embedding rows
    pub embeddings: u64,
}
