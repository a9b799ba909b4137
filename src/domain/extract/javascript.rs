//! TypeScript/JavaScript symbol and call extraction.

use tree_sitter::Node;

use super::{all_children, has_token, line_span, named_children, unquote};
use crate::domain::parsing::ParsedTree;
use crate::domain::types::{
    AstDocument, CallChain, CallKind, CallSite, ClassFacts, ExportRecord, ExportSpecifier,
    ImportRecord, ImportSpecifier, Symbol, SymbolKind, SymbolMetadata, DYNAMIC_CALLEE,
};

pub(super) fn extract_into(doc: &mut AstDocument, parsed: &ParsedTree) {
    let mut walker = Walker {
        parsed,
        doc,
        parents: Vec::new(),
    };
    walker.walk(parsed.root(), false);
    mark_reexported(walker.doc);
}

/// Post-pass: a symbol listed in a module-level re-export is exported even
/// without an `export` modifier on its declaration.
fn mark_reexported(doc: &mut AstDocument) {
    let exported: Vec<String> = doc
        .exports
        .iter()
        .filter(|e| e.module.is_none())
        .flat_map(|e| e.specifiers.iter().map(|s| s.local.clone()))
        .collect();

    for name in exported {
        if let Some(sym) = doc.functions.get_mut(&name) {
            sym.metadata.is_exported = true;
        }
        if let Some(class) = doc.classes.get_mut(&name) {
            if let Some(sym) = class.symbol.as_mut() {
                sym.metadata.is_exported = true;
            }
        }
        for map in [&mut doc.interfaces, &mut doc.types, &mut doc.enums, &mut doc.variables] {
            if let Some(sym) = map.get_mut(&name) {
                sym.metadata.is_exported = true;
            }
        }
    }
}

struct Walker<'w> {
    parsed: &'w ParsedTree,
    doc: &'w mut AstDocument,
    parents: Vec<String>,
}

impl Walker<'_> {
    fn walk(&mut self, node: Node<'_>, exported: bool) {
        match node.kind() {
            "export_statement" => self.on_export(node),
            "import_statement" => self.on_import(node),
            "function_declaration" | "generator_function_declaration" => {
                self.on_function(node, exported);
            }
            "class_declaration" => self.on_class(node, exported),
            "interface_declaration" => {
                self.on_declaration(node, SymbolKind::Interface, exported);
            }
            "type_alias_declaration" => self.on_declaration(node, SymbolKind::Type, exported),
            "enum_declaration" => self.on_declaration(node, SymbolKind::Enum, exported),
            "internal_module" | "module" => self.on_namespace(node, exported),
            "lexical_declaration" | "variable_declaration" => self.on_bindings(node, exported),
            "call_expression" | "new_expression" => {
                self.on_call(node);
                self.walk_children(node, false);
            }
            _ => self.walk_children(node, false),
        }
    }

    fn walk_children(&mut self, node: Node<'_>, exported: bool) {
        for child in named_children(node) {
            self.walk(child, exported);
        }
    }

    fn qualified(&self, name: &str) -> String {
        if self.parents.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.parents.join("."), name)
        }
    }

    fn node_name(&self, node: Node<'_>) -> Option<String> {
        node.child_by_field_name("name")
            .map(|n| self.parsed.text(n).to_string())
    }

    fn symbol(
        &self,
        node: Node<'_>,
        name: &str,
        kind: SymbolKind,
        signature: Option<String>,
        metadata: SymbolMetadata,
    ) -> Symbol {
        let (start_line, end_line) = line_span(node);
        Symbol {
            name: name.to_string(),
            kind,
            start_line,
            end_line,
            signature,
            parents: self.parents.clone(),
            metadata,
        }
    }

    // ── Declarations ────────────────────────────────────────────────────

    fn on_function(&mut self, node: Node<'_>, exported: bool) {
        let Some(name) = self.node_name(node) else {
            self.walk_children(node, false);
            return;
        };

        let metadata = SymbolMetadata {
            is_async: has_token(node, "async"),
            is_generator: node.kind() == "generator_function_declaration" || has_token(node, "*"),
            is_exported: exported,
            is_static: false,
        };
        let signature = self.function_signature(node, &name, &metadata);
        let sym = self.symbol(node, &name, SymbolKind::Function, Some(signature), metadata);
        self.doc.functions.insert(self.qualified(&name), sym);

        if let Some(body) = node.child_by_field_name("body") {
            self.parents.push(name);
            self.walk_children(body, false);
            self.parents.pop();
        }
    }

    fn on_class(&mut self, node: Node<'_>, exported: bool) {
        let Some(name) = self.node_name(node) else {
            self.walk_children(node, false);
            return;
        };

        let inheritance = class_inheritance(self.parsed, node);
        let metadata = SymbolMetadata {
            is_exported: exported,
            ..SymbolMetadata::default()
        };
        let class_symbol = self.symbol(node, &name, SymbolKind::Class, None, metadata);

        let mut facts = ClassFacts {
            symbol: Some(class_symbol),
            inheritance,
            ..ClassFacts::default()
        };

        if let Some(body) = node.child_by_field_name("body") {
            self.parents.push(name.clone());
            for member in named_children(body) {
                match member.kind() {
                    "method_definition" => {
                        if let Some(sym) = self.method_symbol(member) {
                            facts.methods.insert(sym.name.clone(), sym);
                        }
                        if let Some(mbody) = member.child_by_field_name("body") {
                            if let Some(mname) = self.node_name(member) {
                                self.parents.push(mname);
                                self.walk_children(mbody, false);
                                self.parents.pop();
                            }
                        }
                    }
                    "public_field_definition" | "field_definition" => {
                        if let Some(pname) = self.node_name(member) {
                            let meta = SymbolMetadata {
                                is_static: has_token(member, "static"),
                                ..SymbolMetadata::default()
                            };
                            let sym = self.symbol(member, &pname, SymbolKind::Property, None, meta);
                            facts.properties.insert(pname, sym);
                            // Property initializers can contain calls
                            if let Some(value) = member.child_by_field_name("value") {
                                self.walk(value, false);
                            }
                        }
                    }
                    _ => self.walk(member, false),
                }
            }
            self.parents.pop();
        }

        self.doc.classes.insert(self.qualified(&name), facts);
    }

    fn method_symbol(&self, node: Node<'_>) -> Option<Symbol> {
        let name = self.node_name(node)?;
        let kind = if name == "constructor" {
            SymbolKind::Constructor
        } else {
            SymbolKind::Method
        };
        let metadata = SymbolMetadata {
            is_async: has_token(node, "async"),
            is_static: has_token(node, "static"),
            is_generator: has_token(node, "*"),
            is_exported: false,
        };
        let signature = self.function_signature(node, &name, &metadata);
        let (start_line, end_line) = line_span(node);
        Some(Symbol {
            name,
            kind,
            start_line,
            end_line,
            signature: Some(signature),
            parents: self.parents.clone(),
            metadata,
        })
    }

    fn on_declaration(&mut self, node: Node<'_>, kind: SymbolKind, exported: bool) {
        if let Some(name) = self.node_name(node) {
            let metadata = SymbolMetadata {
                is_exported: exported,
                ..SymbolMetadata::default()
            };
            let sym = self.symbol(node, &name, kind, None, metadata);
            let key = self.qualified(&name);
            let target = match kind {
                SymbolKind::Interface => &mut self.doc.interfaces,
                SymbolKind::Type => &mut self.doc.types,
                SymbolKind::Enum => &mut self.doc.enums,
                _ => &mut self.doc.variables,
            };
            target.insert(key, sym);
        }
        self.walk_children(node, false);
    }

    fn on_namespace(&mut self, node: Node<'_>, exported: bool) {
        let Some(name) = self.node_name(node) else {
            self.walk_children(node, false);
            return;
        };
        let metadata = SymbolMetadata {
            is_exported: exported,
            ..SymbolMetadata::default()
        };
        let sym = self.symbol(node, &name, SymbolKind::Namespace, None, metadata);
        self.doc.variables.insert(self.qualified(&name), sym);

        if let Some(body) = node.child_by_field_name("body") {
            self.parents.push(name);
            self.walk_children(body, false);
            self.parents.pop();
        }
    }

    fn on_bindings(&mut self, node: Node<'_>, exported: bool) {
        let is_const = all_children(node)
            .first()
            .map(|c| c.kind() == "const")
            .unwrap_or(false);
        let kind = if is_const {
            SymbolKind::Constant
        } else {
            SymbolKind::Variable
        };

        for declarator in named_children(node) {
            if declarator.kind() != "variable_declarator" {
                continue;
            }
            let Some(name) = self.node_name(declarator) else {
                continue;
            };
            let value = declarator.child_by_field_name("value");
            let metadata = SymbolMetadata {
                is_exported: exported,
                is_async: value.map(|v| has_token(v, "async")).unwrap_or(false),
                ..SymbolMetadata::default()
            };
            let sym = self.symbol(declarator, &name, kind, None, metadata);
            self.doc.variables.insert(self.qualified(&name), sym);

            if let Some(value) = value {
                // Function-valued bindings scope their nested definitions
                if matches!(value.kind(), "arrow_function" | "function_expression" | "function") {
                    self.parents.push(name);
                    self.walk_children(value, false);
                    self.parents.pop();
                } else {
                    self.walk(value, false);
                }
            }
        }
    }

    // ── Imports / exports ───────────────────────────────────────────────

    fn on_import(&mut self, node: Node<'_>) {
        let Some(source) = node.child_by_field_name("source") else {
            return;
        };
        let module = unquote(self.parsed.text(source));
        let mut specifiers = Vec::new();

        for clause in named_children(node) {
            if clause.kind() != "import_clause" {
                continue;
            }
            for part in named_children(clause) {
                match part.kind() {
                    "identifier" => specifiers.push(ImportSpecifier {
                        local: self.parsed.text(part).to_string(),
                        imported: "default".to_string(),
                    }),
                    "namespace_import" => {
                        if let Some(alias) = named_children(part).into_iter().next() {
                            specifiers.push(ImportSpecifier {
                                local: self.parsed.text(alias).to_string(),
                                imported: "*".to_string(),
                            });
                        }
                    }
                    "named_imports" => {
                        for spec in named_children(part) {
                            if spec.kind() != "import_specifier" {
                                continue;
                            }
                            let imported = spec
                                .child_by_field_name("name")
                                .map(|n| self.parsed.text(n).to_string())
                                .unwrap_or_default();
                            let local = spec
                                .child_by_field_name("alias")
                                .map(|n| self.parsed.text(n).to_string())
                                .unwrap_or_else(|| imported.clone());
                            specifiers.push(ImportSpecifier { local, imported });
                        }
                    }
                    _ => {}
                }
            }
        }

        self.doc.imports.push(ImportRecord { module, specifiers });
    }

    fn on_export(&mut self, node: Node<'_>) {
        if let Some(declaration) = node.child_by_field_name("declaration") {
            self.walk(declaration, true);
            return;
        }

        let module = node
            .child_by_field_name("source")
            .map(|s| unquote(self.parsed.text(s)));
        let mut specifiers = Vec::new();

        for child in named_children(node) {
            if child.kind() == "export_clause" {
                for spec in named_children(child) {
                    if spec.kind() != "export_specifier" {
                        continue;
                    }
                    let local = spec
                        .child_by_field_name("name")
                        .map(|n| self.parsed.text(n).to_string())
                        .unwrap_or_default();
                    let exported = spec
                        .child_by_field_name("alias")
                        .map(|n| self.parsed.text(n).to_string())
                        .unwrap_or_else(|| local.clone());
                    specifiers.push(ExportSpecifier { local, exported });
                }
            }
        }

        // `export default <expr>`
        if specifiers.is_empty() && has_token(node, "default") {
            if let Some(value) = node.child_by_field_name("value") {
                let text = self.parsed.text(value);
                let local = if value.kind() == "identifier" {
                    text.to_string()
                } else {
                    "default".to_string()
                };
                specifiers.push(ExportSpecifier {
                    local,
                    exported: "default".to_string(),
                });
                self.walk(value, false);
            }
        }

        if !specifiers.is_empty() || module.is_some() {
            self.doc.exports.push(ExportRecord { module, specifiers });
        }
    }

    // ── Calls ───────────────────────────────────────────────────────────

    fn on_call(&mut self, node: Node<'_>) {
        let Some(site) = call_site(self.parsed, node) else {
            return;
        };
        self.doc.calls.push(site);
    }

    // ── Signatures ──────────────────────────────────────────────────────

    /// `<async? ><*?><name>(<params verbatim>)[: <return type>]`
    fn function_signature(&self, node: Node<'_>, name: &str, metadata: &SymbolMetadata) -> String {
        let params = node
            .child_by_field_name("parameters")
            .map(|p| self.parsed.text(p).to_string())
            .unwrap_or_else(|| "()".to_string());
        let return_type = node
            .child_by_field_name("return_type")
            .map(|r| self.parsed.text(r).to_string())
            .unwrap_or_default();

        let mut sig = String::new();
        if metadata.is_async {
            sig.push_str("async ");
        }
        if metadata.is_generator {
            sig.push('*');
        }
        sig.push_str(name);
        sig.push_str(&params);
        sig.push_str(&return_type);
        sig
    }
}

/// Direct parent classes from a `class_heritage` node. TS wraps them in an
/// `extends_clause`; JS puts the expression straight under the heritage.
/// One entry is emitted (single `extends`); `implements` lists are omitted.
pub(super) fn class_inheritance(parsed: &ParsedTree, class_node: Node<'_>) -> Vec<String> {
    let Some(heritage) = all_children(class_node)
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
                .map(|n| parsed.text(n).to_string())
                .collect();
        }
    }

    named_children(heritage)
        .into_iter()
        .take(1)
        .map(|n| parsed.text(n).to_string())
        .collect()
}

/// Build a call site from a `call_expression` or `new_expression`.
pub(super) fn call_site(parsed: &ParsedTree, node: Node<'_>) -> Option<CallSite> {
    let (start_line, end_line) = line_span(node);
    let argument_count = node
        .child_by_field_name("arguments")
        .filter(|a| a.kind() == "arguments")
        .map(|a| a.named_child_count() as u32)
        .unwrap_or(0);

    if node.kind() == "new_expression" {
        let callee = node
            .child_by_field_name("constructor")
            .map(|c| parsed.text(c).to_string())?;
        return Some(CallSite {
            callee,
            receiver: None,
            kind: CallKind::Constructor,
            argument_count,
            start_line,
            end_line,
            chain: None,
        });
    }

    let function = node.child_by_field_name("function")?;
    let (callee, receiver, kind) = match function.kind() {
        "identifier" | "super" => (parsed.text(function).to_string(), None, CallKind::Function),
        "member_expression" => {
            let property = function
                .child_by_field_name("property")
                .map(|p| parsed.text(p).to_string())
                .unwrap_or_else(|| DYNAMIC_CALLEE.to_string());
            let receiver = function
                .child_by_field_name("object")
                .map(|o| parsed.text(o).to_string());
            (property, receiver, CallKind::Method)
        }
        "subscript_expression" => {
            let receiver = function
                .child_by_field_name("object")
                .map(|o| parsed.text(o).to_string());
            (DYNAMIC_CALLEE.to_string(), receiver, CallKind::Dynamic)
        }
        _ => (DYNAMIC_CALLEE.to_string(), None, CallKind::Dynamic),
    };

    Some(CallSite {
        callee,
        receiver,
        kind,
        argument_count,
        start_line,
        end_line,
        chain: chain_for(parsed, node),
    })
}

/// Chain metadata when the call participates in `a.f().g().h()`.
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
        "identifier" | "super" => Some(parsed.text(function).to_string()),
        "member_expression" => function
            .child_by_field_name("property")
            .map(|p| parsed.text(p).to_string()),
        _ => Some(DYNAMIC_CALLEE.to_string()),
    }
}

fn inner_call<'t>(node: Node<'t>) -> Option<Node<'t>> {
    let function = node.child_by_field_name("function")?;
    if function.kind() != "member_expression" {
        return None;
    }
    let object = function.child_by_field_name("object")?;
    (object.kind() == "call_expression").then_some(object)
}

fn outer_call<'t>(node: Node<'t>) -> Option<Node<'t>> {
    let member = node.parent()?;
    if member.kind() != "member_expression" {
        return None;
    }
    let object = member.child_by_field_name("object")?;
    if object.id() != node.id() {
        return None;
    }
    let call = member.parent()?;
    let function = call.child_by_field_name("function")?;
    (call.kind() == "call_expression" && function.id() == member.id()).then_some(call)
}
