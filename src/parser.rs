use std::collections::BTreeMap;

use tree_sitter::{Node, Parser, Tree};

use crate::error::{Error, Result};
use crate::mutants::{Anchor, MutationSite, OperatorKind, SdlKind, Span};
use crate::operators::{self, Selection, RUNTIME_ALIAS};

/// Parse Python source, failing on any syntax error in the tree.
pub fn parse(source: &str, file: &str) -> Result<Tree> {
    let mut parser = Parser::new();
    parser.set_language(&tree_sitter_python::LANGUAGE.into())?;
    let tree = parser.parse(source, None).ok_or_else(|| Error::Parse {
        path: file.to_string(),
        line: 1,
    })?;
    let root = tree.root_node();
    if root.has_error() {
        let line = first_error(root).map(|n| n.start_position().row + 1).unwrap_or(1);
        return Err(Error::Parse {
            path: file.to_string(),
            line,
        });
    }
    Ok(tree)
}

fn first_error(node: Node) -> Option<Node> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    let mut cursor = node.walk();
    let children: Vec<Node> = node.children(&mut cursor).collect();
    children
        .into_iter()
        .filter(|c| c.has_error())
        .find_map(first_error)
}

/// Dotted module path for a project-relative file, e.g. `pkg/calc.py` -> `pkg.calc`.
pub fn module_name(file: &str) -> String {
    let trimmed = file.strip_suffix(".py").unwrap_or(file);
    let dotted = trimmed.replace(['/', '\\'], ".");
    match dotted.strip_suffix(".__init__") {
        Some(pkg) => pkg.to_string(),
        None => dotted,
    }
}

/// Indentation step used when a rewrite has to open a new block.
pub fn indent_unit(source: &str) -> &'static str {
    let tabbed = source
        .lines()
        .find(|l| l.starts_with(' ') || l.starts_with('\t'))
        .is_some_and(|l| l.starts_with('\t'));
    if tabbed { "\t" } else { "    " }
}

/// Walk the tree in pre-order and catalogue every selected site.
pub fn build_catalog(source: &str, file: &str, selection: &Selection) -> Result<Vec<MutationSite>> {
    let tree = parse(source, file)?;
    let mut walker = Walker {
        source,
        file,
        module: module_name(file),
        selection,
        line_starts: line_starts(source),
        counters: BTreeMap::new(),
        sites: Vec::new(),
    };
    walker.walk(tree.root_node(), None, None);
    Ok(walker.sites)
}

/// Qualified names of all callables in the file.
pub fn list_functions(source: &str, file: &str) -> Result<Vec<String>> {
    let tree = parse(source, file)?;
    let mut names = Vec::new();
    collect_function_names(tree.root_node(), source, None, &mut names);
    Ok(names)
}

fn collect_function_names(node: Node, source: &str, prefix: Option<&str>, names: &mut Vec<String>) {
    let mut next_prefix = prefix.map(str::to_string);
    if matches!(node.kind(), "function_definition" | "class_definition") {
        if let Some(name_node) = node.child_by_field_name("name") {
            let qual = qualify(prefix, node_text(name_node, source));
            if node.kind() == "function_definition" {
                names.push(qual.clone());
            }
            next_prefix = Some(qual);
        }
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_function_names(child, source, next_prefix.as_deref(), names);
    }
}

fn qualify(prefix: Option<&str>, name: &str) -> String {
    match prefix {
        Some(p) => format!("{}.{}", p, name),
        None => name.to_string(),
    }
}

fn node_text<'a>(node: Node<'a>, source: &'a str) -> &'a str {
    &source[node.start_byte()..node.end_byte()]
}

fn line_starts(source: &str) -> Vec<usize> {
    let mut starts = vec![0];
    starts.extend(source.match_indices('\n').map(|(i, _)| i + 1));
    starts
}

struct Walker<'a> {
    source: &'a str,
    file: &'a str,
    module: String,
    selection: &'a Selection,
    line_starts: Vec<usize>,
    counters: BTreeMap<(OperatorKind, String), usize>,
    sites: Vec<MutationSite>,
}

impl<'a> Walker<'a> {
    fn walk(&mut self, node: Node, prefix: Option<&str>, callable: Option<&str>) {
        match node.kind() {
            "function_definition" => {
                let Some(name_node) = node.child_by_field_name("name") else {
                    return;
                };
                let name = node_text(name_node, self.source);
                let qual = qualify(prefix, name);
                if self.selection.wants_callable(name, &qual) && !self.has_entry_guard(node) {
                    let anchor = self.callable_anchor(node);
                    self.push(node, OperatorKind::Xmt, &qual, anchor);
                }
                if let Some(body) = node.child_by_field_name("body") {
                    self.walk_children(body, Some(qual.as_str()), Some(qual.as_str()));
                }
                return;
            }
            "class_definition" => {
                let Some(name_node) = node.child_by_field_name("name") else {
                    return;
                };
                let qual = qualify(prefix, node_text(name_node, self.source));
                if let Some(body) = node.child_by_field_name("body") {
                    self.walk_children(body, Some(qual.as_str()), None);
                }
                return;
            }
            "if_statement" if self.is_entry_guard(node) => return,
            kind => {
                if let (Some(sdl), Some(scope)) = (SdlKind::from_node_kind(kind), callable) {
                    if self.selection.wants_statement(sdl) && !self.is_synthetic(node, sdl) {
                        let anchor = self.statement_anchor(node, sdl);
                        self.push(node, OperatorKind::Sdl(sdl), scope, anchor);
                    }
                }
            }
        }
        self.walk_children(node, prefix, callable);
    }

    fn walk_children(&mut self, node: Node, prefix: Option<&str>, callable: Option<&str>) {
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        for child in children {
            self.walk(child, prefix, callable);
        }
    }

    fn push(&mut self, node: Node, operator: OperatorKind, scope: &str, anchor: Anchor) {
        let ordinal = {
            let counter = self
                .counters
                .entry((operator, scope.to_string()))
                .or_insert(0);
            *counter += 1;
            *counter
        };
        let description = node_text(node, self.source)
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();
        self.sites.push(MutationSite {
            file: self.file.to_string(),
            module: self.module.clone(),
            operator,
            scope: scope.to_string(),
            ordinal,
            span: Span {
                start_byte: node.start_byte(),
                end_byte: node.end_byte(),
                start_line: node.start_position().row + 1,
                end_line: node.end_position().row + 1,
            },
            description,
            anchor,
        });
    }

    /// Code this tool injected itself is never catalogued again.
    fn is_synthetic(&self, node: Node, kind: SdlKind) -> bool {
        let marker = format!("{}.", RUNTIME_ALIAS);
        let header = match kind {
            SdlKind::If | SdlKind::While => node.child_by_field_name("condition"),
            SdlKind::For => node.child_by_field_name("right"),
            SdlKind::Return => Some(node),
            SdlKind::Try => None,
        };
        header.is_some_and(|h| node_text(h, self.source).contains(&marker))
    }

    /// `if _pseudotest.is_enabled(...)`: the body is injected code.
    fn is_entry_guard(&self, node: Node) -> bool {
        let call = format!("{}.is_enabled(", RUNTIME_ALIAS);
        node.kind() == "if_statement"
            && node
                .child_by_field_name("condition")
                .is_some_and(|c| node_text(c, self.source).starts_with(&call))
    }

    fn has_entry_guard(&self, func: Node) -> bool {
        let Some(body) = func.child_by_field_name("body") else {
            return false;
        };
        statements(body)
            .first()
            .is_some_and(|first| self.is_entry_guard(*first))
    }

    /// Text between the start of the node's line and the node.
    fn line_prefix(&self, node: Node) -> &'a str {
        let row = node.start_position().row;
        let start = self.line_starts.get(row).copied().unwrap_or(0);
        &self.source[start..node.start_byte()]
    }

    fn starts_line(&self, node: Node) -> bool {
        self.line_prefix(node).chars().all(|c| c == ' ' || c == '\t')
    }

    fn ends_line(&self, node: Node) -> bool {
        let rest = &self.source[node.end_byte()..];
        let line = rest.split('\n').next().unwrap_or_default().trim();
        line.is_empty() || line.starts_with('#')
    }

    fn callable_anchor(&self, func: Node) -> Anchor {
        let Some(body) = func.child_by_field_name("body") else {
            return Anchor::Unsafe("callable has no body".into());
        };
        let stmts = statements(body);
        let Some(first) = stmts.first().copied() else {
            return Anchor::Unsafe("callable has an empty body".into());
        };
        if first.start_position().row == func.start_position().row || !self.starts_line(first) {
            return Anchor::Unsafe("single-line callable body shares the header line".into());
        }
        let indent = self.line_prefix(first).to_string();
        let row = if is_docstring(first) {
            match stmts.get(1) {
                Some(next) if self.starts_line(*next) => next.start_position().row,
                Some(_) => {
                    return Anchor::Unsafe("docstring shares a line with code".into());
                }
                None => first.end_position().row + 1,
            }
        } else {
            first.start_position().row
        };
        Anchor::CallableEntry {
            row,
            indent,
            default_value: self.default_value(func, body).to_string(),
        }
    }

    fn default_value(&self, func: Node, body: Node) -> &'static str {
        if let Some(annotation) = func.child_by_field_name("return_type") {
            return operators::default_for_annotation(node_text(annotation, self.source));
        }
        match first_return(body).and_then(|ret| ret.named_child(0)) {
            Some(expr) => operators::default_for_return_kind(expr.kind()),
            None => "None",
        }
    }

    fn statement_anchor(&self, node: Node, kind: SdlKind) -> Anchor {
        match kind {
            SdlKind::If | SdlKind::While => match node.child_by_field_name("condition") {
                Some(cond) => Anchor::Condition {
                    start: cond.start_byte(),
                    end: cond.end_byte(),
                },
                None => Anchor::Unsafe("statement has no condition".into()),
            },
            SdlKind::For => {
                let mut cursor = node.walk();
                if node.children(&mut cursor).any(|c| c.kind() == "async") {
                    return Anchor::Unsafe("async for loops cannot take a guarded iterable".into());
                }
                match node.child_by_field_name("right") {
                    Some(iter) => Anchor::Iterable {
                        start: iter.start_byte(),
                        end: iter.end_byte(),
                    },
                    None => Anchor::Unsafe("for loop has no iterable".into()),
                }
            }
            SdlKind::Return => {
                if !self.starts_line(node) {
                    Anchor::Unsafe("single-line compound statement".into())
                } else if !self.ends_line(node) {
                    Anchor::Unsafe("statement shares its line with following code".into())
                } else {
                    Anchor::StatementStart {
                        at: node.start_byte(),
                    }
                }
            }
            SdlKind::Try => {
                if !self.starts_line(node) {
                    Anchor::Unsafe("single-line compound statement".into())
                } else if has_multiline_string(node) {
                    Anchor::Unsafe("re-indenting would change a multi-line string".into())
                } else {
                    Anchor::Block {
                        first_row: node.start_position().row,
                        last_row: node.end_position().row,
                        indent: self.line_prefix(node).to_string(),
                    }
                }
            }
        }
    }
}

/// Statements of a block, comments skipped.
fn statements(block: Node) -> Vec<Node> {
    let mut cursor = block.walk();
    block
        .named_children(&mut cursor)
        .filter(|c| c.kind() != "comment")
        .collect()
}

fn is_docstring(stmt: Node) -> bool {
    stmt.kind() == "expression_statement"
        && stmt.named_child_count() == 1
        && stmt.named_child(0).is_some_and(|c| c.kind() == "string")
}

/// First `return` of a callable, not descending into nested definitions.
fn first_return(node: Node) -> Option<Node> {
    let mut cursor = node.walk();
    let children: Vec<Node> = node.named_children(&mut cursor).collect();
    for child in children {
        match child.kind() {
            "return_statement" => return Some(child),
            "function_definition" | "class_definition" | "lambda" => continue,
            _ => {
                if let Some(found) = first_return(child) {
                    return Some(found);
                }
            }
        }
    }
    None
}

fn has_multiline_string(node: Node) -> bool {
    if node.kind() == "string" && node.start_position().row != node.end_position().row {
        return true;
    }
    let mut cursor = node.walk();
    let children: Vec<Node> = node.named_children(&mut cursor).collect();
    children.into_iter().any(has_multiline_string)
}
