//! Symbol and call extraction.
//!
//! Walks parsed trees and emits per-file structured facts: functions,
//! classes with their members, interfaces, type aliases, enums, module
//! bindings, imports/exports, and call sites with chain positions. Nodes
//! the walkers cannot interpret (including ERROR nodes from malformed
//! input) are skipped, never fatal.

mod javascript;
mod python;

use tree_sitter::Node;

use crate::domain::parsing::ParsedTree;
use crate::domain::types::{AstDocument, Language};

/// Extract the structured facts document for a parsed file.
pub fn extract(parsed: &ParsedTree, path: &str) -> AstDocument {
    let mut doc = AstDocument {
        path: path.to_string(),
        language: Some(parsed.language),
        ..AstDocument::default()
    };

    match parsed.language {
        Language::TypeScript | Language::Tsx | Language::JavaScript => {
            javascript::extract_into(&mut doc, parsed);
        }
        Language::Python => python::extract_into(&mut doc, parsed),
        Language::Unknown => {}
    }

    doc
}

/// Named children of a node, collected through a fresh cursor.
pub(crate) fn named_children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

/// All children of a node, anonymous tokens included.
pub(crate) fn all_children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.children(&mut cursor).collect()
}

/// Whether a node carries an anonymous child token of the given kind
/// (used for `async`, `static`, `*` modifiers).
pub(crate) fn has_token(node: Node<'_>, token: &str) -> bool {
    all_children(node).iter().any(|c| c.kind() == token)
}

/// 1-based line span of a node.
pub(crate) fn line_span(node: Node<'_>) -> (u32, u32) {
    (
        node.start_position().row as u32 + 1,
        node.end_position().row as u32 + 1,
    )
}

/// Strip matching string quotes from a module identifier.
pub(crate) fn unquote(text: &str) -> String {
    text.trim_matches(|c| c == '"' || c == '\'' || c == '`').to_string()
}

/// Run of comment nodes immediately preceding `node`, separated from it
/// (and from each other) only by whitespace. Returned in source order.
pub(crate) fn leading_comments<'t>(parsed: &ParsedTree, node: Node<'t>) -> Vec<Node<'t>> {
    let mut run = Vec::new();
    let mut current = node;

    while let Some(prev) = current.prev_sibling() {
        if prev.kind() != "comment" {
            break;
        }
        let gap = &parsed.source[prev.end_byte()..current.start_byte()];
        if !gap.chars().all(char::is_whitespace) {
            break;
        }
        run.push(prev);
        current = prev;
    }

    run.reverse();
    run
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::parsing::parse_source;
    use crate::domain::types::{CallKind, SymbolKind, DYNAMIC_CALLEE};

    #[test]
    fn extracts_top_level_function() {
        let parsed = parse_source(
            "export async function fetchUser(id: string): Promise<User> { return load(id); }",
            Language::TypeScript,
        )
        .unwrap();
        let doc = extract(&parsed, "src/users.ts");

        let sym = doc.functions.get("fetchUser").expect("function extracted");
        assert_eq!(sym.kind, SymbolKind::Function);
        assert!(sym.metadata.is_async);
        assert!(sym.metadata.is_exported);
        assert!(sym.parents.is_empty());
        assert_eq!(
            sym.signature.as_deref(),
            Some("async fetchUser(id: string): Promise<User>")
        );
    }

    #[test]
    fn nested_function_records_parent_chain() {
        let parsed = parse_source(
            "function outer() { function inner() { return 1; } return inner(); }",
            Language::JavaScript,
        )
        .unwrap();
        let doc = extract(&parsed, "a.js");

        let inner = doc.functions.get("outer.inner").expect("nested function");
        assert_eq!(inner.parents, vec!["outer".to_string()]);
        assert!(doc.functions.get("outer").unwrap().parents.is_empty());
    }

    #[test]
    fn class_members_and_inheritance() {
        let parsed = parse_source(
            r#"
class Repo extends Base {
    constructor(db) { super(); this.db = db; }
    static of(db) { return new Repo(db); }
    async find(id) { return this.db.get(id); }
}
"#,
            Language::JavaScript,
        )
        .unwrap();
        let doc = extract(&parsed, "repo.js");

        let class = doc.classes.get("Repo").expect("class extracted");
        assert_eq!(class.inheritance, vec!["Base".to_string()]);
        assert_eq!(
            class.methods.get("constructor").unwrap().kind,
            SymbolKind::Constructor
        );
        let of = class.methods.get("of").unwrap();
        assert!(of.metadata.is_static);
        let find = class.methods.get("find").unwrap();
        assert!(find.metadata.is_async);
        assert_eq!(find.parents, vec!["Repo".to_string()]);
    }

    #[test]
    fn python_bases_include_qualified_names() {
        let parsed = parse_source(
            "class Handler(base.Request, Mixin):\n    def handle(self):\n        pass\n",
            Language::Python,
        )
        .unwrap();
        let doc = extract(&parsed, "handler.py");

        let class = doc.classes.get("Handler").unwrap();
        assert_eq!(
            class.inheritance,
            vec!["base.Request".to_string(), "Mixin".to_string()]
        );
        assert!(class.methods.contains_key("handle"));
    }

    #[test]
    fn call_chain_positions() {
        let parsed = parse_source("a.f().g().h();", Language::JavaScript).unwrap();
        let doc = extract(&parsed, "chain.js");

        let mut chained: Vec<_> = doc
            .calls
            .iter()
            .filter(|c| c.chain.is_some())
            .collect();
        chained.sort_by_key(|c| c.chain.as_ref().unwrap().position);

        assert_eq!(chained.len(), 3);
        let f = chained[0];
        assert_eq!((f.callee.as_str(), f.chain.as_ref().unwrap().position), ("f", 0));
        assert_eq!(f.chain.as_ref().unwrap().next.as_deref(), Some("g"));
        let g = chained[1];
        assert_eq!(g.chain.as_ref().unwrap().previous.as_deref(), Some("f"));
        assert_eq!(g.chain.as_ref().unwrap().next.as_deref(), Some("h"));
        let h = chained[2];
        assert_eq!(h.callee, "h");
        assert_eq!(h.chain.as_ref().unwrap().previous.as_deref(), Some("g"));
        assert!(h.chain.as_ref().unwrap().next.is_none());
    }

    #[test]
    fn dynamic_dispatch_is_classified() {
        let parsed = parse_source("handlers[kind](payload, extra);", Language::JavaScript).unwrap();
        let doc = extract(&parsed, "dispatch.js");

        let call = doc.calls.iter().find(|c| c.kind == CallKind::Dynamic).unwrap();
        assert_eq!(call.callee, DYNAMIC_CALLEE);
        assert_eq!(call.argument_count, 2);
    }

    #[test]
    fn constructor_call_argument_count() {
        let parsed = parse_source("const c = new Client(host, port);", Language::JavaScript).unwrap();
        let doc = extract(&parsed, "client.js");

        let call = doc
            .calls
            .iter()
            .find(|c| c.kind == CallKind::Constructor)
            .unwrap();
        assert_eq!(call.callee, "Client");
        assert_eq!(call.argument_count, 2);
    }

    #[test]
    fn imports_and_exports() {
        let parsed = parse_source(
            "import { join as j, dirname } from 'path';\nexport { helper as run };\nconst helper = 1;",
            Language::TypeScript,
        )
        .unwrap();
        let doc = extract(&parsed, "mod.ts");

        assert_eq!(doc.imports.len(), 1);
        assert_eq!(doc.imports[0].module, "path");
        assert_eq!(doc.imports[0].specifiers[0].local, "j");
        assert_eq!(doc.imports[0].specifiers[0].imported, "join");
        assert_eq!(doc.imports[0].specifiers[1].local, "dirname");

        assert_eq!(doc.exports.len(), 1);
        assert_eq!(doc.exports[0].specifiers[0].local, "helper");
        assert_eq!(doc.exports[0].specifiers[0].exported, "run");
        // Listed in a module-level re-export -> the binding is exported
        assert!(doc.variables.get("helper").unwrap().metadata.is_exported);
    }

    #[test]
    fn python_decorated_signature_recurses_to_inner_def() {
        let parsed = parse_source(
            "@cached\nasync def resolve(name, timeout=5):\n    return await lookup(name)\n",
            Language::Python,
        )
        .unwrap();
        let doc = extract(&parsed, "resolve.py");

        let sym = doc.functions.get("resolve").unwrap();
        assert!(sym.metadata.is_async);
        assert_eq!(sym.signature.as_deref(), Some("async resolve(name, timeout=5)"));
    }

    #[test]
    fn python_no_syntactic_export() {
        let parsed = parse_source("def public_api():\n    pass\n", Language::Python).unwrap();
        let doc = extract(&parsed, "api.py");
        assert!(!doc.functions.get("public_api").unwrap().metadata.is_exported);
    }

    #[test]
    fn typescript_declarations() {
        let parsed = parse_source(
            r#"
export interface Shape { area(): number; }
type Alias = Shape | null;
enum Color { Red, Green }
namespace Geo { export function area() { return 1; } }
const LIMIT = 10;
let cursor = 0;
"#,
            Language::TypeScript,
        )
        .unwrap();
        let doc = extract(&parsed, "decl.ts");

        assert!(doc.interfaces.get("Shape").unwrap().metadata.is_exported);
        assert!(doc.types.contains_key("Alias"));
        assert!(doc.enums.contains_key("Color"));
        assert_eq!(doc.variables.get("LIMIT").unwrap().kind, SymbolKind::Constant);
        assert_eq!(doc.variables.get("cursor").unwrap().kind, SymbolKind::Variable);
        assert_eq!(
            doc.functions.get("Geo.area").unwrap().parents,
            vec!["Geo".to_string()]
        );
    }

    #[test]
    fn malformed_source_extracts_what_it_can() {
        let parsed = parse_source(
            "function good() { return 1; }\nfunction broken( {\n",
            Language::JavaScript,
        )
        .unwrap();
        let doc = extract(&parsed, "broken.js");
        assert!(doc.functions.contains_key("good"));
    }
}
