//! Structural code chunking.
//!
//! Carves parsed trees into documented, content-hashed chunks: one chunk
//! per top-level function, one per concrete class member, one for a class
//! with no members, and a single module-level chunk for files with no
//! definitions at all. Nested functions stay embedded in their parent's
//! content and never become independent chunks.

pub mod normalize;

pub use normalize::{chunk_hash, normalize};

use tree_sitter::Node;

use crate::domain::extract::{all_children, has_token, leading_comments, named_children};
use crate::domain::parsing::ParsedTree;
use crate::domain::types::{ChunkContext, ChunkKind, CodeChunk, Language};

/// Chunker settings.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Chunks above this many lines log a warning (still produced)
    pub max_chunk_lines: u32,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chunk_lines: 5_000,
        }
    }
}

/// Produce the ordered chunk list for a parsed file.
pub fn chunk_file(parsed: &ParsedTree, relative_path: &str, config: &ChunkerConfig) -> Vec<CodeChunk> {
    let module_path = module_path_of(relative_path);
    let mut chunker = Chunker {
        parsed,
        config,
        module_path,
        relative_path,
        chunks: Vec::new(),
    };

    for node in named_children(parsed.root()) {
        chunker.top_level(node);
    }

    if chunker.chunks.is_empty() {
        // Policy for definition-free files: one module-level chunk
        chunker.emit_module_chunk();
    }

    chunker.chunks
}

fn module_path_of(relative_path: &str) -> String {
    let trimmed = relative_path
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(relative_path);
    trimmed.replace('\\', "/")
}

fn file_stem(relative_path: &str) -> String {
    std::path::Path::new(relative_path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(relative_path)
        .to_string()
}

struct Chunker<'c> {
    parsed: &'c ParsedTree,
    config: &'c ChunkerConfig,
    module_path: String,
    relative_path: &'c str,
    chunks: Vec<CodeChunk>,
}

impl Chunker<'_> {
    fn top_level(&mut self, node: Node<'_>) {
        match (self.parsed.language, node.kind()) {
            (_, "export_statement") => {
                if let Some(declaration) = node.child_by_field_name("declaration") {
                    // Content spans the whole statement so the export
                    // modifier stays in the chunk.
                    self.definition(declaration, Some(node));
                }
            }
            (Language::Python, "decorated_definition") => {
                if let Some(inner) = node.child_by_field_name("definition") {
                    // Decorators are part of the chunk body
                    self.definition(inner, Some(node));
                }
            }
            (_, "function_declaration")
            | (_, "generator_function_declaration")
            | (Language::Python, "function_definition")
            | (_, "class_declaration")
            | (Language::Python, "class_definition") => self.definition(node, None),
            (_, "lexical_declaration") | (_, "variable_declaration") => {
                self.function_valued_binding(node, None);
            }
            _ => {}
        }
    }

    /// Dispatch a definition node; `span` overrides the content span when
    /// the definition is wrapped (export statement, decorators).
    fn definition(&mut self, node: Node<'_>, span: Option<Node<'_>>) {
        match node.kind() {
            "function_declaration" | "generator_function_declaration" | "function_definition" => {
                self.function_chunk(node, span, None);
            }
            "class_declaration" | "class_definition" => self.class_chunks(node, span),
            "lexical_declaration" | "variable_declaration" => {
                self.function_valued_binding(node, span);
            }
            _ => {}
        }
    }

    /// `const f = () => {}` and friends become function chunks.
    fn function_valued_binding(&mut self, node: Node<'_>, span: Option<Node<'_>>) {
        for declarator in named_children(node) {
            if declarator.kind() != "variable_declarator" {
                continue;
            }
            let Some(value) = declarator.child_by_field_name("value") else {
                continue;
            };
            if !matches!(value.kind(), "arrow_function" | "function_expression" | "function") {
                continue;
            }
            let Some(name_node) = declarator.child_by_field_name("name") else {
                continue;
            };
            let name = self.parsed.text(name_node).to_string();
            let is_async = has_token(value, "async");
            let kind = if is_async {
                ChunkKind::AsyncFunction
            } else {
                ChunkKind::Function
            };
            let signature = self.signature_of(value, &name, is_async, false);
            let content_node = span.unwrap_or(node);
            self.emit(content_node, kind, name, Some(signature), self.docs_for(span.unwrap_or(node)), top_level_context(&self.module_path));
            return;
        }
    }

    fn function_chunk(&mut self, node: Node<'_>, span: Option<Node<'_>>, context: Option<ChunkContext>) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.parsed.text(name_node).to_string();
        let is_async = has_token(node, "async");
        let is_generator =
            node.kind() == "generator_function_declaration" || has_token(node, "*");
        let kind = if is_generator {
            ChunkKind::Generator
        } else if is_async {
            ChunkKind::AsyncFunction
        } else {
            ChunkKind::Function
        };
        let signature = self.signature_of(node, &name, is_async, is_generator);
        let documentation = self.documentation_for(node, span);
        let context = context.unwrap_or_else(|| top_level_context(&self.module_path));
        self.emit(span.unwrap_or(node), kind, name, Some(signature), documentation, context);
    }

    fn class_chunks(&mut self, node: Node<'_>, span: Option<Node<'_>>) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let class_name = self.parsed.text(name_node).to_string();
        let inheritance = self.class_inheritance(node);
        let class_doc = self.documentation_for(node, span);
        let class_body_text = self.parsed.text(span.unwrap_or(node)).to_string();

        // Identity of the class declaration itself; members reference it
        // whether or not a class chunk is emitted.
        let class_hash = chunk_hash(
            ChunkKind::Class,
            &class_name,
            None,
            class_doc.as_deref(),
            &class_body_text,
        );

        let mut member_count = 0usize;
        if let Some(body) = node.child_by_field_name("body") {
            for member in named_children(body) {
                let (definition, wrapper) = if member.kind() == "decorated_definition" {
                    match member.child_by_field_name("definition") {
                        Some(inner) => (inner, Some(member)),
                        None => continue,
                    }
                } else {
                    (member, None)
                };

                match definition.kind() {
                    "method_definition" | "function_definition" => {
                        if let Some(mname) = definition.child_by_field_name("name") {
                            let name = self.parsed.text(mname).to_string();
                            let is_async = has_token(definition, "async");
                            let is_generator = has_token(definition, "*");
                            let kind = if name == "constructor" || name == "__init__" {
                                ChunkKind::Constructor
                            } else {
                                ChunkKind::Method
                            };
                            let signature = self.signature_of(definition, &name, is_async, is_generator);
                            let documentation = self.documentation_for(definition, wrapper);
                            let context = ChunkContext {
                                class_name: Some(class_name.clone()),
                                class_inheritance: inheritance.clone(),
                                module_path: self.module_path.clone(),
                                namespace: None,
                                is_top_level: false,
                                parent_chunk_hash: Some(class_hash.clone()),
                            };
                            self.emit(
                                wrapper.unwrap_or(definition),
                                kind,
                                name,
                                Some(signature),
                                documentation,
                                context,
                            );
                            member_count += 1;
                        }
                    }
                    "public_field_definition" | "field_definition" => {
                        // Concrete properties only: fields with an initializer
                        if definition.child_by_field_name("value").is_none() {
                            continue;
                        }
                        if let Some(pname) = definition.child_by_field_name("name") {
                            let name = self.parsed.text(pname).to_string();
                            let documentation = self.documentation_for(definition, wrapper);
                            let context = ChunkContext {
                                class_name: Some(class_name.clone()),
                                class_inheritance: inheritance.clone(),
                                module_path: self.module_path.clone(),
                                namespace: None,
                                is_top_level: false,
                                parent_chunk_hash: Some(class_hash.clone()),
                            };
                            self.emit(
                                wrapper.unwrap_or(definition),
                                ChunkKind::Property,
                                name,
                                None,
                                documentation,
                                context,
                            );
                            member_count += 1;
                        }
                    }
                    _ => {}
                }
            }
        }

        if member_count == 0 {
            // A class with no members is itself the chunk
            let context = ChunkContext {
                class_name: Some(class_name.clone()),
                class_inheritance: inheritance,
                module_path: self.module_path.clone(),
                namespace: None,
                is_top_level: true,
                parent_chunk_hash: None,
            };
            self.emit(span.unwrap_or(node), ChunkKind::Class, class_name, None, class_doc, context);
        }
    }

    fn emit_module_chunk(&mut self) {
        let root = self.parsed.root();
        let name = file_stem(self.relative_path);
        self.emit(
            root,
            ChunkKind::Module,
            name,
            None,
            None,
            top_level_context(&self.module_path),
        );
    }

    fn emit(
        &mut self,
        content_node: Node<'_>,
        kind: ChunkKind,
        name: String,
        signature: Option<String>,
        documentation: Option<String>,
        context: ChunkContext,
    ) {
        let content = self.parsed.text(content_node).to_string();
        let start_line = content_node.start_position().row as u32 + 1;
        let end_line = content_node.end_position().row as u32 + 1;

        let line_count = end_line.saturating_sub(start_line) + 1;
        if line_count > self.config.max_chunk_lines {
            tracing::warn!(
                path = self.relative_path,
                chunk = %name,
                lines = line_count,
                limit = self.config.max_chunk_lines,
                "oversize chunk"
            );
        }

        let hash = chunk_hash(
            kind,
            &name,
            signature.as_deref(),
            documentation.as_deref(),
            &content,
        );

        self.chunks.push(CodeChunk {
            chunk_hash: hash,
            kind,
            name,
            signature,
            documentation,
            start_line,
            end_line,
            start_byte: content_node.start_byte() as u32,
            end_byte: content_node.end_byte() as u32,
            language: self.parsed.language,
            context,
            content,
        });
    }

    /// Documentation per language: leading comment run for TS/JS, the
    /// body's first string expression (docstring) for Python.
    fn documentation_for(&self, node: Node<'_>, wrapper: Option<Node<'_>>) -> Option<String> {
        if self.parsed.language == Language::Python {
            return self.python_docstring(node);
        }
        self.docs_for(wrapper.unwrap_or(node))
    }

    fn docs_for(&self, node: Node<'_>) -> Option<String> {
        let run = leading_comments(self.parsed, node);
        if run.is_empty() {
            return None;
        }
        Some(
            run.iter()
                .map(|c| self.parsed.text(*c))
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }

    fn python_docstring(&self, node: Node<'_>) -> Option<String> {
        let body = node.child_by_field_name("body")?;
        let first = named_children(body).into_iter().next()?;
        if first.kind() != "expression_statement" {
            return None;
        }
        let inner = named_children(first).into_iter().next()?;
        if inner.kind() != "string" {
            return None;
        }
        Some(self.parsed.text(inner).to_string())
    }

    fn signature_of(&self, node: Node<'_>, name: &str, is_async: bool, is_generator: bool) -> String {
        let params = node
            .child_by_field_name("parameters")
            .map(|p| self.parsed.text(p).to_string())
            .unwrap_or_else(|| "()".to_string());
        let return_type = if self.parsed.language == Language::Python {
            String::new()
        } else {
            node.child_by_field_name("return_type")
                .map(|r| self.parsed.text(r).to_string())
                .unwrap_or_default()
        };

        let mut sig = String::new();
        if is_async {
            sig.push_str("async ");
        }
        if is_generator {
            sig.push('*');
        }
        sig.push_str(name);
        sig.push_str(&params);
        sig.push_str(&return_type);
        sig
    }

    fn class_inheritance(&self, node: Node<'_>) -> Vec<String> {
        if self.parsed.language == Language::Python {
            return node
                .child_by_field_name("superclasses")
                .map(|args| {
                    named_children(args)
                        .into_iter()
                        .filter(|n| matches!(n.kind(), "identifier" | "attribute"))
                        .map(|n| self.parsed.text(n).to_string())
                        .collect()
                })
                .unwrap_or_default();
        }

        let Some(heritage) = all_children(node)
            .into_iter()
            .find(|c| c.kind() == "class_heritage")
        else {
            return Vec::new();
        };
        for child in named_children(heritage) {
            if child.kind() == "extends_clause" {
                return named_children(child)
                    .into_iter()
                    .filter(|n| n.kind() != "type_arguments")
                    .take(1)
                    .map(|n| self.parsed.text(n).to_string())
                    .collect();
            }
        }
        named_children(heritage)
            .into_iter()
            .take(1)
            .map(|n| self.parsed.text(n).to_string())
            .collect()
    }
}

fn top_level_context(module_path: &str) -> ChunkContext {
    ChunkContext {
        class_name: None,
        class_inheritance: Vec::new(),
        module_path: module_path.to_string(),
        namespace: None,
        is_top_level: true,
        parent_chunk_hash: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::parsing::parse_source;

    fn chunks_of(source: &str, language: Language, path: &str) -> Vec<CodeChunk> {
        let parsed = parse_source(source, language).unwrap();
        chunk_file(&parsed, path, &ChunkerConfig::default())
    }

    #[test]
    fn identical_content_in_different_files_shares_a_hash() {
        let source = "function add(a,b){ return a+b; }";
        let a = chunks_of(source, Language::JavaScript, "a.js");
        let b = chunks_of(source, Language::JavaScript, "b.js");
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].chunk_hash, b[0].chunk_hash);
    }

    #[test]
    fn whitespace_only_difference_shares_a_hash() {
        let a = chunks_of("function f(){\n  return 1;\n}", Language::JavaScript, "a.js");
        let b = chunks_of("function f(){\n    return 1;\n}", Language::JavaScript, "b.js");
        assert_eq!(a[0].chunk_hash, b[0].chunk_hash);
    }

    #[test]
    fn docstring_edit_changes_the_hash() {
        let a = chunks_of("def f():\n    \"\"\"v1\"\"\"\n    return 1\n", Language::Python, "a.py");
        let b = chunks_of("def f():\n    \"\"\"v2\"\"\"\n    return 1\n", Language::Python, "b.py");
        assert_eq!(a[0].documentation.as_deref(), Some("\"\"\"v1\"\"\""));
        assert_ne!(a[0].chunk_hash, b[0].chunk_hash);
    }

    #[test]
    fn nested_functions_stay_embedded() {
        let chunks = chunks_of(
            "function outer() {\n  function inner() { return 1; }\n  return inner();\n}",
            Language::JavaScript,
            "nested.js",
        );
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].name, "outer");
        assert!(chunks[0].content.contains("function inner"));
    }

    #[test]
    fn class_yields_one_chunk_per_member() {
        let chunks = chunks_of(
            r#"
class Repo extends Base {
    constructor(db) { this.db = db; }
    find(id) { return this.db.get(id); }
}
"#,
            Language::JavaScript,
            "repo.js",
        );
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].kind, ChunkKind::Constructor);
        assert_eq!(chunks[1].kind, ChunkKind::Method);
        assert_eq!(chunks[1].context.class_name.as_deref(), Some("Repo"));
        assert_eq!(chunks[1].context.class_inheritance, vec!["Base".to_string()]);
        assert_eq!(
            chunks[0].context.parent_chunk_hash,
            chunks[1].context.parent_chunk_hash
        );
    }

    #[test]
    fn memberless_class_is_one_chunk() {
        let chunks = chunks_of("class Marker {}", Language::JavaScript, "marker.js");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::Class);
        assert_eq!(chunks[0].name, "Marker");
    }

    #[test]
    fn definition_free_file_yields_module_chunk() {
        let chunks = chunks_of(
            "// configuration constants\nconst LIMIT = 10;\n",
            Language::JavaScript,
            "config.js",
        );
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::Module);
        assert_eq!(chunks[0].name, "config");
    }

    #[test]
    fn jsdoc_attaches_when_contiguous() {
        let chunks = chunks_of(
            "/** Adds two numbers. */\nfunction add(a, b) { return a + b; }",
            Language::JavaScript,
            "math.js",
        );
        assert_eq!(
            chunks[0].documentation.as_deref(),
            Some("/** Adds two numbers. */")
        );
    }

    #[test]
    fn detached_comment_does_not_attach() {
        let chunks = chunks_of(
            "/** Module header. */\nconst X = 1;\nfunction f() { return X; }",
            Language::JavaScript,
            "m.js",
        );
        let f = chunks.iter().find(|c| c.name == "f").unwrap();
        assert!(f.documentation.is_none());
    }

    #[test]
    fn python_decorators_are_chunk_content() {
        let chunks = chunks_of(
            "@app.route('/')\ndef index():\n    \"\"\"Home page.\"\"\"\n    return render()\n",
            Language::Python,
            "app.py",
        );
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].content.starts_with("@app.route"));
        assert_eq!(chunks[0].documentation.as_deref(), Some("\"\"\"Home page.\"\"\""));
    }

    #[test]
    fn arrow_function_binding_is_a_function_chunk() {
        let chunks = chunks_of(
            "export const handler = async (req) => { return respond(req); };",
            Language::TypeScript,
            "handler.ts",
        );
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::AsyncFunction);
        assert_eq!(chunks[0].name, "handler");
        assert!(chunks[0].content.starts_with("export const"));
    }

    #[test]
    fn exported_function_content_keeps_the_modifier() {
        let chunks = chunks_of(
            "export function visible() { return true; }",
            Language::TypeScript,
            "v.ts",
        );
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].content.starts_with("export function"));
    }
}
