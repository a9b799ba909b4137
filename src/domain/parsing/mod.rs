//! Parser and grammar loader.
//!
//! Maps file extensions to tree-sitter grammars and produces error-tolerant
//! concrete syntax trees. Parser failures on malformed input never abort
//! indexing: tree-sitter yields a best-effort tree with ERROR nodes that
//! downstream walkers skip.

use std::path::Path;

use crate::domain::error::{Error, Result};
use crate::domain::types::Language;

/// A parsed source file: the syntax tree plus the text it was built from.
pub struct ParsedTree {
    /// The concrete syntax tree
    pub tree: tree_sitter::Tree,
    /// Source text the tree spans
    pub source: String,
    /// Detected language
    pub language: Language,
}

impl ParsedTree {
    /// Root node of the tree.
    pub fn root(&self) -> tree_sitter::Node<'_> {
        self.tree.root_node()
    }

    /// Verbatim source text of a node.
    pub fn text(&self, node: tree_sitter::Node<'_>) -> &str {
        node.utf8_text(self.source.as_bytes()).unwrap_or_default()
    }
}

/// Resolve the tree-sitter grammar for a language.
pub fn grammar_for(language: Language) -> Option<tree_sitter::Language> {
    match language {
        Language::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
        Language::Tsx => Some(tree_sitter_typescript::LANGUAGE_TSX.into()),
        Language::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
        Language::Python => Some(tree_sitter_python::LANGUAGE.into()),
        Language::Unknown => None,
    }
}

/// Parse a file's source, detecting the language from its extension.
pub fn parse(path: &Path, source: &str) -> Result<ParsedTree> {
    parse_source(source, Language::from_path(path))
}

/// Parse source text for a known language.
///
/// Returns `InvalidInput` for unsupported languages. Malformed source still
/// parses into a tree containing ERROR nodes.
pub fn parse_source(source: &str, language: Language) -> Result<ParsedTree> {
    let grammar = grammar_for(language)
        .ok_or_else(|| Error::invalid_input(format!("unsupported language: {language}")))?;

    let mut parser = tree_sitter::Parser::new();
    parser
        .set_language(&grammar)
        .map_err(|e| Error::internal(format!("grammar load failed for {language}: {e}")))?;

    let tree = parser
        .parse(source, None)
        .ok_or_else(|| Error::internal(format!("parser produced no tree for {language}")))?;

    Ok(ParsedTree {
        tree,
        source: source.to_string(),
        language,
    })
}
