//! Operator selection and the per-operator rewrite of a single site.
//! Every function here is pure: a site (plus the source it came from) in,
//! a replacement fragment out.
use std::collections::BTreeSet;

use crate::mutants::{Anchor, MutationSite, SdlKind};

/// Name the instrumented files bind the activation runtime to.
pub const RUNTIME_ALIAS: &str = "_pseudotest";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CallableTargets {
    #[default]
    Nothing,
    /// `"*"`: every callable except dunder methods.
    All,
    Named(BTreeSet<String>),
}

/// Which catalogued sites become real mutants.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Selection {
    pub xmt: CallableTargets,
    pub sdl: BTreeSet<SdlKind>,
}

impl Selection {
    pub fn all() -> Self {
        Selection {
            xmt: CallableTargets::All,
            sdl: SdlKind::ALL.into_iter().collect(),
        }
    }

    /// Build a selection from target lists where `"*"` is the wildcard.
    pub fn from_lists(xmt: &[String], sdl: &[String]) -> Result<Self, String> {
        let xmt = if xmt.iter().any(|t| t.trim() == "*") {
            CallableTargets::All
        } else if xmt.is_empty() {
            CallableTargets::Nothing
        } else {
            CallableTargets::Named(
                xmt.iter()
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect(),
            )
        };
        let sdl = if sdl.iter().any(|t| t.trim() == "*") {
            SdlKind::ALL.into_iter().collect()
        } else {
            sdl.iter()
                .filter(|t| !t.trim().is_empty())
                .map(|t| t.parse())
                .collect::<Result<BTreeSet<_>, _>>()?
        };
        Ok(Selection { xmt, sdl })
    }

    pub fn is_empty(&self) -> bool {
        self.xmt == CallableTargets::Nothing && self.sdl.is_empty()
    }

    pub fn wants_callable(&self, name: &str, qualname: &str) -> bool {
        match &self.xmt {
            CallableTargets::Nothing => false,
            CallableTargets::All => !is_dunder(name),
            CallableTargets::Named(names) => names.contains(name) || names.contains(qualname),
        }
    }

    pub fn wants_statement(&self, kind: SdlKind) -> bool {
        self.sdl.contains(&kind)
    }
}

pub fn is_dunder(name: &str) -> bool {
    name.len() > 4 && name.starts_with("__") && name.ends_with("__")
}

/// Text change contributed by one site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    /// Whole lines inserted before original row `row`.
    Prelude { row: usize, lines: Vec<String> },
    /// Replace `start..end` with `text`; `start == end` is an insertion.
    Splice {
        start: usize,
        end: usize,
        text: String,
    },
    /// Put `header` before `first_row` and indent rows `first_row..=last_row` one level.
    Wrap {
        first_row: usize,
        last_row: usize,
        header: String,
    },
}

pub fn enabled_call(id: &str) -> String {
    format!("{}.is_enabled(\"{}\")", RUNTIME_ALIAS, id)
}

/// Rewrite one site. `unit` is the file's indentation step.
/// Returns the reason when the site cannot be rewritten safely.
pub fn fragment(site: &MutationSite, source: &str, unit: &str) -> Result<Fragment, String> {
    let call = enabled_call(&site.mutant_id());
    match &site.anchor {
        Anchor::CallableEntry {
            row,
            indent,
            default_value,
        } => Ok(Fragment::Prelude {
            row: *row,
            lines: vec![
                format!("{}if {}:", indent, call),
                format!("{}{}return {}", indent, unit, default_value),
            ],
        }),
        Anchor::Condition { start, end } => Ok(Fragment::Splice {
            start: *start,
            end: *end,
            text: format!("not {} and ({})", call, &source[*start..*end]),
        }),
        Anchor::Iterable { start, end } => Ok(Fragment::Splice {
            start: *start,
            end: *end,
            text: format!("({}) if not {} else ()", &source[*start..*end], call),
        }),
        Anchor::StatementStart { at } => Ok(Fragment::Splice {
            start: *at,
            end: *at,
            text: format!("if not {}: ", call),
        }),
        Anchor::Block {
            first_row,
            last_row,
            indent,
        } => Ok(Fragment::Wrap {
            first_row: *first_row,
            last_row: *last_row,
            header: format!("{}if not {}:", indent, call),
        }),
        Anchor::Unsafe(reason) => Err(reason.clone()),
    }
}

/// Zero value for a declared return annotation, `None` when unknown.
pub fn default_for_annotation(annotation: &str) -> &'static str {
    let text = annotation
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim();
    if text.starts_with("Optional[") || text.split('|').any(|part| part.trim() == "None") {
        return "None";
    }
    let base = text.split('[').next().unwrap_or(text).trim();
    let base = base.rsplit('.').next().unwrap_or(base);
    match base {
        "int" => "0",
        "float" => "0.0",
        "complex" => "0j",
        "str" => "\"\"",
        "bytes" => "b\"\"",
        "bool" => "False",
        "list" | "List" | "Sequence" | "MutableSequence" => "[]",
        "dict" | "Dict" | "Mapping" | "MutableMapping" => "{}",
        "set" | "Set" | "AbstractSet" | "MutableSet" => "set()",
        "frozenset" | "FrozenSet" => "frozenset()",
        "tuple" | "Tuple" => "()",
        _ => "None",
    }
}

/// Default value inferred from the syntax kind of the first returned expression.
pub fn default_for_return_kind(kind: &str) -> &'static str {
    match kind {
        "binary_operator" | "integer" | "unary_operator" => "0",
        "float" => "0.0",
        "list" | "list_comprehension" => "[]",
        "dictionary" | "dictionary_comprehension" => "{}",
        "set" | "set_comprehension" => "set()",
        "tuple" => "()",
        "string" | "concatenated_string" => "\"\"",
        "true" | "false" | "comparison_operator" | "boolean_operator" | "not_operator" => "False",
        _ => "None",
    }
}
