//! Python symbol and call extraction.

use tree_sitter::Node;

use super::{has_token, line_span, named_children};
use crate::domain::parsing::ParsedTree;
use crate::domain::types::{
    AstDocument, CallChain, CallKind, CallSite, ClassFacts, ImportRecord, ImportSpecifier, Symbol,
    SymbolKind, SymbolMetadata, DYNAMIC_CALLEE,
};

pub(super) fn extract_into(doc: &mut AstDocument, parsed: &ParsedTree) {
    let mut walker = Walker {
        parsed,
        doc,
        parents: Vec::new(),
    };
    walker.walk(parsed.root());
}

struct Walker<'w> {
    parsed: &'w ParsedTree,
    doc: &'w mut AstDocument,
    parents: Vec<String>,
}

impl Walker<'_> {
    fn walk(&mut self, node: Node<'_>) {
        match node.kind() {
            "decorated_definition" => {
                // Decorators are chunk content; symbols come from the
                // wrapped definition.
                if let Some(inner) = node.child_by_field_name("definition") {
                    self.walk(inner);
                } else {
                    self.walk_children(node);
                }
            }
            "function_definition" => self.on_function(node),
            "class_definition" => self.on_class(node),
            "import_statement" | "import_from_statement" => self.on_import(node),
            "assignment" => {
                self.on_assignment(node);
                self.walk_children(node);
            }
            "call" => {
                self.on_call(node);
                self.walk_children(node);
            }
            _ => self.walk_children(node),
        }
    }

    fn walk_children(&mut self, node: Node<'_>) {
        for child in named_children(node) {
            self.walk(child);
        }
    }

    fn qualified(&self, name: &str) -> String {
        if self.parents.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.parents.join("."), name)
        }
    }

    fn on_function(&mut self, node: Node<'_>) {
        let Some(name_node) = node.child_by_field_name("name") else {
            self.walk_children(node);
            return;
        };
        let name = self.parsed.text(name_node).to_string();
        let in_class =
            !self.parents.is_empty() && self.doc.classes.contains_key(&self.parents.join("."));

        let metadata = SymbolMetadata {
            is_async: has_token(node, "async"),
            ..SymbolMetadata::default()
        };
        let signature = self.function_signature(node, &name, &metadata);
        let (start_line, end_line) = line_span(node);
        let kind = if in_class && name == "__init__" {
            SymbolKind::Constructor
        } else if in_class {
            SymbolKind::Method
        } else {
            SymbolKind::Function
        };
        let sym = Symbol {
            name: name.clone(),
            kind,
            start_line,
            end_line,
            signature: Some(signature),
            parents: self.parents.clone(),
            metadata,
        };

        if in_class {
            let class_key = self.parents.join(".");
            if let Some(facts) = self.doc.classes.get_mut(&class_key) {
                facts.methods.insert(name.clone(), sym);
            }
        } else {
            self.doc.functions.insert(self.qualified(&name), sym);
        }

        if let Some(body) = node.child_by_field_name("body") {
            self.parents.push(name);
            self.walk_children(body);
            self.parents.pop();
        }
    }

    fn on_class(&mut self, node: Node<'_>) {
        let Some(name_node) = node.child_by_field_name("name") else {
            self.walk_children(node);
            return;
        };
        let name = self.parsed.text(name_node).to_string();

        // All positional base classes, including qualified names (a.b.Base);
        // keyword arguments like metaclass= are not bases.
        let inheritance: Vec<String> = node
            .child_by_field_name("superclasses")
            .map(|args| {
                named_children(args)
                    .into_iter()
                    .filter(|n| matches!(n.kind(), "identifier" | "attribute"))
                    .map(|n| self.parsed.text(n).to_string())
                    .collect()
            })
            .unwrap_or_default();

        let (start_line, end_line) = line_span(node);
        let class_symbol = Symbol {
            name: name.clone(),
            kind: SymbolKind::Class,
            start_line,
            end_line,
            signature: None,
            parents: self.parents.clone(),
            metadata: SymbolMetadata::default(),
        };

        let key = self.qualified(&name);
        self.doc.classes.insert(
            key,
            ClassFacts {
                symbol: Some(class_symbol),
                inheritance,
                ..ClassFacts::default()
            },
        );

        if let Some(body) = node.child_by_field_name("body") {
            self.parents.push(name);
            self.walk_children(body);
            self.parents.pop();
        }
    }

    fn on_assignment(&mut self, node: Node<'_>) {
        // Module-level bindings only; locals stay out of the symbol table.
        if !self.parents.is_empty() {
            return;
        }
        let Some(left) = node.child_by_field_name("left") else {
            return;
        };
        if left.kind() != "identifier" {
            return;
        }
        let name = self.parsed.text(left).to_string();
        if self.doc.variables.contains_key(&name) {
            return;
        }
        let (start_line, end_line) = line_span(node);
        self.doc.variables.insert(
            name.clone(),
            Symbol {
                name,
                kind: SymbolKind::Variable,
                start_line,
                end_line,
                signature: None,
                parents: Vec::new(),
                metadata: SymbolMetadata::default(),
            },
        );
    }

    fn on_import(&mut self, node: Node<'_>) {
        match node.kind() {
            "import_statement" => {
                for name in named_children(node) {
                    match name.kind() {
                        "dotted_name" => {
                            let text = self.parsed.text(name).to_string();
                            self.doc.imports.push(ImportRecord {
                                module: text.clone(),
                                specifiers: vec![ImportSpecifier {
                                    local: text.clone(),
                                    imported: text,
                                }],
                            });
                        }
                        "aliased_import" => {
                            let imported = name
                                .child_by_field_name("name")
                                .map(|n| self.parsed.text(n).to_string())
                                .unwrap_or_default();
                            let local = name
                                .child_by_field_name("alias")
                                .map(|n| self.parsed.text(n).to_string())
                                .unwrap_or_else(|| imported.clone());
                            self.doc.imports.push(ImportRecord {
                                module: imported.clone(),
                                specifiers: vec![ImportSpecifier { local, imported }],
                            });
                        }
                        _ => {}
                    }
                }
            }
            "import_from_statement" => {
                let module = node
                    .child_by_field_name("module_name")
                    .map(|n| self.parsed.text(n).to_string())
                    .unwrap_or_default();
                let mut specifiers = Vec::new();
                for name in named_children(node) {
                    // The module_name field also matches dotted_name; skip it
                    if Some(name.id())
                        == node.child_by_field_name("module_name").map(|n| n.id())
                    {
                        continue;
                    }
                    match name.kind() {
                        "dotted_name" | "identifier" => {
                            let text = self.parsed.text(name).to_string();
                            specifiers.push(ImportSpecifier {
                                local: text.clone(),
                                imported: text,
                            });
                        }
                        "aliased_import" => {
                            let imported = name
                                .child_by_field_name("name")
                                .map(|n| self.parsed.text(n).to_string())
                                .unwrap_or_default();
                            let local = name
                                .child_by_field_name("alias")
                                .map(|n| self.parsed.text(n).to_string())
                                .unwrap_or_else(|| imported.clone());
                            specifiers.push(ImportSpecifier { local, imported });
                        }
                        "wildcard_import" => specifiers.push(ImportSpecifier {
                            local: "*".to_string(),
                            imported: "*".to_string(),
                        }),
                        _ => {}
                    }
                }
                self.doc.imports.push(ImportRecord { module, specifiers });
            }
            _ => {}
        }
    }

    fn on_call(&mut self, node: Node<'_>) {
        let Some(function) = node.child_by_field_name("function") else {
            return;
        };
        let (start_line, end_line) = line_span(node);
        let argument_count = node
            .child_by_field_name("arguments")
            .map(|a| a.named_child_count() as u32)
            .unwrap_or(0);

        let (callee, receiver, kind) = match function.kind() {
            "identifier" => (self.parsed.text(function).to_string(), None, CallKind::Function),
            "attribute" => {
                let callee = function
                    .child_by_field_name("attribute")
                    .map(|a| self.parsed.text(a).to_string())
                    .unwrap_or_else(|| DYNAMIC_CALLEE.to_string());
                let receiver = function
                    .child_by_field_name("object")
                    .map(|o| self.parsed.text(o).to_string());
                (callee, receiver, CallKind::Method)
            }
            "subscript" => {
                let receiver = function
                    .child_by_field_name("value")
                    .map(|o| self.parsed.text(o).to_string());
                (DYNAMIC_CALLEE.to_string(), receiver, CallKind::Dynamic)
            }
            _ => (DYNAMIC_CALLEE.to_string(), None, CallKind::Dynamic),
        };

        self.doc.calls.push(CallSite {
            callee,
            receiver,
            kind,
            argument_count,
            start_line,
            end_line,
            chain: chain_for(self.parsed, node),
        });
    }

    /// `<async? ><name>(<params verbatim>)`. Decorated definitions already
    /// resolve to the inner `function_definition` before reaching here.
    fn function_signature(&self, node: Node<'_>, name: &str, metadata: &SymbolMetadata) -> String {
        let params = node
            .child_by_field_name("parameters")
            .map(|p| self.parsed.text(p).to_string())
            .unwrap_or_else(|| "()".to_string());

        let mut sig = String::new();
        if metadata.is_async {
            sig.push_str("async ");
        }
        sig.push_str(name);
        sig.push_str(&params);
        sig
    }
}

fn chain_for(parsed: &ParsedTree, node: Node<'_>) -> Option<CallChain> {
    let inner = inner_call(node);
    let outer = outer_call(node);
    if inner.is_none() && outer.is_none() {
        return None;
    }

    let mut position = 0u32;
    let mut current = node;
    while let Some(prev) = inner_call(current) {
        position += 1;
        current = prev;
    }

    Some(CallChain {
        position,
        previous: inner.and_then(|n| callee_name(parsed, n)),
        next: outer.and_then(|n| callee_name(parsed, n)),
    })
}

fn callee_name(parsed: &ParsedTree, call: Node<'_>) -> Option<String> {
    let function = call.child_by_field_name("function")?;
    match function.kind() {
        "identifier" => Some(parsed.text(function).to_string()),
        "attribute" => function
            .child_by_field_name("attribute")
            .map(|a| parsed.text(a).to_string()),
        _ => Some(DYNAMIC_CALLEE.to_string()),
    }
}

fn inner_call<'t>(node: Node<'t>) -> Option<Node<'t>> {
    let function = node.child_by_field_name("function")?;
    if function.kind() != "attribute" {
        return None;
    }
    let object = function.child_by_field_name("object")?;
    (object.kind() == "call").then_some(object)
}

fn outer_call<'t>(node: Node<'t>) -> Option<Node<'t>> {
    let attribute = node.parent()?;
    if attribute.kind() != "attribute" {
        return None;
    }
    let object = attribute.child_by_field_name("object")?;
    if object.id() != node.id() {
        return None;
    }
    let call = attribute.parent()?;
    let function = call.child_by_field_name("function")?;
    (call.kind() == "call" && function.id() == attribute.id()).then_some(call)
}
