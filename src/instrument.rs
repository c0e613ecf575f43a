//! Assembles per-site fragments into one instrumented source text.
//!
//! The rewrite is textual on top of the catalog's byte and row anchors, so
//! everything outside the touched rows is copied through unchanged. Guards
//! are added in front of existing lines wherever possible; only guarded `try`
//! statements are re-indented.
use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::activation::RUNTIME_MODULE;
use crate::error::{Error, Result, Warning};
use crate::mutants::MutationSite;
use crate::operators::{self, Fragment, RUNTIME_ALIAS};
use crate::parser;

/// Trailing marker on the import line every instrumented file starts with.
pub const PROLOGUE_MARKER: &str = "# pseudotest: instrumented";

/// Python only accepts a byte order mark as the very first character.
const BOM: char = '\u{feff}';

pub struct Instrumented {
    pub source: String,
    /// Sites that made it into the output, in catalog order.
    pub entries: Vec<MutationSite>,
    /// Sites that could not be rewritten safely.
    pub dropped: Vec<Warning>,
}

pub fn prologue() -> String {
    format!(
        "import {} as {}  {}",
        RUNTIME_MODULE, RUNTIME_ALIAS, PROLOGUE_MARKER
    )
}

pub fn is_instrumented(source: &str) -> bool {
    source.lines().any(|l| {
        let l = l.trim_start_matches(BOM);
        l.starts_with("import ") && l.trim_end().ends_with(PROLOGUE_MARKER)
    })
}

struct Splice {
    start: usize,
    end: usize,
    text: String,
}

struct Wrap {
    first_row: usize,
    last_row: usize,
    header: String,
}

/// Rewrite `source` so every catalogued site becomes a runtime-switchable
/// mutant. Output is a pure function of the inputs. When no site survives
/// the source is returned as-is, without a prologue.
pub fn instrument(source: &str, file: &str, sites: &[MutationSite]) -> Result<Instrumented> {
    if is_instrumented(source) {
        return Err(Error::AlreadyInstrumented {
            path: file.to_string(),
        });
    }
    let unit = parser::indent_unit(source);

    let mut entries = Vec::new();
    let mut dropped = Vec::new();
    let mut preludes: BTreeMap<usize, Vec<Vec<String>>> = BTreeMap::new();
    let mut splices: Vec<(Splice, usize)> = Vec::new();
    let mut wraps: Vec<Wrap> = Vec::new();

    for site in sites {
        match operators::fragment(site, source, unit) {
            Ok(Fragment::Prelude { row, lines }) => {
                preludes.entry(row).or_default().push(lines);
                entries.push(site.clone());
            }
            Ok(Fragment::Splice { start, end, text }) => {
                splices.push((Splice { start, end, text }, entries.len()));
                entries.push(site.clone());
            }
            Ok(Fragment::Wrap {
                first_row,
                last_row,
                header,
            }) => {
                wraps.push(Wrap {
                    first_row,
                    last_row,
                    header,
                });
                entries.push(site.clone());
            }
            Err(reason) => {
                warn!(file, line = site.line(), mutant = %site.mutant_id(), "dropping site: {}", reason);
                dropped.push(Warning::site(file, site.line(), site.mutant_id(), reason));
            }
        }
    }

    // Two rewrites of the same bytes cannot both apply; the earlier one wins.
    splices.sort_by_key(|(s, _)| (s.start, s.end));
    let mut rejected = Vec::new();
    let mut kept: Vec<Splice> = Vec::with_capacity(splices.len());
    for (splice, idx) in splices {
        let clashes = kept.last().is_some_and(|prev| splice.start < prev.end);
        if clashes {
            rejected.push(idx);
        } else {
            kept.push(splice);
        }
    }
    if !rejected.is_empty() {
        rejected.sort_unstable();
        for idx in rejected.into_iter().rev() {
            let site = entries.remove(idx);
            let reason = "rewrite overlaps another site";
            warn!(file, line = site.line(), mutant = %site.mutant_id(), "dropping site: {}", reason);
            dropped.push(Warning::site(file, site.line(), site.mutant_id(), reason));
        }
    }

    if entries.is_empty() {
        return Ok(Instrumented {
            source: source.to_string(),
            entries,
            dropped,
        });
    }

    let tree = parser::parse(source, file)?;
    let prologue_row = prologue_row(tree.root_node(), source);

    let rendered = render(source, unit, prologue_row, &preludes, &kept, &wraps);

    if let Err(e) = parser::parse(&rendered, file) {
        warn!(file, "instrumented output does not parse, leaving file untouched");
        return Err(e);
    }
    debug!(file, mutants = entries.len(), "instrumented");
    Ok(Instrumented {
        source: rendered,
        entries,
        dropped,
    })
}

/// Row of the first top-level statement that is neither the module
/// docstring nor a `__future__` import.
fn prologue_row(root: tree_sitter::Node, source: &str) -> Option<usize> {
    let mut cursor = root.walk();
    let mut seen_code = false;
    for child in root.named_children(&mut cursor) {
        match child.kind() {
            "comment" => continue,
            "future_import_statement" => {
                seen_code = true;
                continue;
            }
            "expression_statement"
                if !seen_code
                    && child.named_child_count() == 1
                    && child.named_child(0).is_some_and(|c| c.kind() == "string") =>
            {
                seen_code = true;
                continue;
            }
            _ => {
                let text = &source[child.start_byte()..child.end_byte()];
                if text.starts_with("from __future__") {
                    continue;
                }
                return Some(child.start_position().row);
            }
        }
    }
    None
}

fn render(
    source: &str,
    unit: &str,
    prologue_row: Option<usize>,
    preludes: &BTreeMap<usize, Vec<Vec<String>>>,
    splices: &[Splice],
    wraps: &[Wrap],
) -> String {
    let nl = if source.contains("\r\n") { "\r\n" } else { "\n" };
    let mut starts = vec![0];
    starts.extend(source.match_indices('\n').map(|(i, _)| i + 1));
    starts.retain(|&s| s < source.len());
    let rows = starts.len();
    let prologue_row = prologue_row.unwrap_or(rows);
    let bom = if source.starts_with(BOM) { BOM.len_utf8() } else { 0 };

    // Lines of a guarded `try` are shifted one level per enclosing wrap.
    let body_depth = |row: usize| {
        wraps
            .iter()
            .filter(|w| w.first_row <= row && row <= w.last_row)
            .count()
    };
    let header_depth = |row: usize| {
        wraps
            .iter()
            .filter(|w| w.first_row < row && row <= w.last_row)
            .count()
    };
    // Guards follow the depth of the row above, which may be the last row of
    // a docstring-only body.
    let prelude_depth = |row: usize| {
        wraps
            .iter()
            .filter(|w| w.first_row < row && row - 1 <= w.last_row)
            .count()
    };

    let mut out = String::with_capacity(source.len() + source.len() / 4);
    let emit_preludes = |out: &mut String, row: usize| {
        if prologue_row == row {
            out.push_str(&prologue());
            out.push_str(nl);
        }
        if let Some(groups) = preludes.get(&row) {
            let pad = unit.repeat(prelude_depth(row));
            for line in groups.iter().flatten() {
                out.push_str(&pad);
                out.push_str(line);
                out.push_str(nl);
            }
        }
    };

    let mut cursor = 0;
    let mut next_splice = 0;
    for (row, &ls) in starts.iter().enumerate() {
        let le = starts.get(row + 1).copied().unwrap_or(source.len());
        if ls >= cursor {
            if row == 0 && bom > 0 {
                out.push(BOM);
            }
            emit_preludes(&mut out, row);
            for wrap in wraps.iter().filter(|w| w.first_row == row) {
                out.push_str(&unit.repeat(header_depth(row)));
                out.push_str(&wrap.header);
                out.push_str(nl);
            }
            if !source[ls..le].trim().is_empty() {
                out.push_str(&unit.repeat(body_depth(row)));
            }
            cursor = if row == 0 { ls + bom } else { ls };
        }
        while let Some(splice) = splices.get(next_splice) {
            if splice.start >= le {
                break;
            }
            out.push_str(&source[cursor..splice.start]);
            out.push_str(&splice.text);
            cursor = splice.end;
            next_splice += 1;
        }
        if cursor < le {
            out.push_str(&source[cursor..le]);
            cursor = le;
        }
    }

    let tail_rows: Vec<usize> = preludes
        .keys()
        .copied()
        .filter(|&r| r >= rows)
        .chain(std::iter::once(prologue_row).filter(|&r| r >= rows))
        .collect();
    if !tail_rows.is_empty() {
        if !out.is_empty() && !out.ends_with('\n') {
            out.push_str(nl);
        }
        let mut seen = tail_rows;
        seen.sort_unstable();
        seen.dedup();
        for row in seen {
            emit_preludes(&mut out, row);
        }
    }
    out
}
