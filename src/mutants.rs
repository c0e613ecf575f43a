use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Mutant identifiers are plain strings, `<operator>:<module>:<scope>:<ordinal>`.
pub type MutantId = String;

/// Statement kinds the statement-deletion operator understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdlKind {
    For,
    If,
    While,
    Return,
    Try,
}

impl SdlKind {
    pub const ALL: [SdlKind; 5] = [
        SdlKind::For,
        SdlKind::If,
        SdlKind::While,
        SdlKind::Return,
        SdlKind::Try,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SdlKind::For => "for",
            SdlKind::If => "if",
            SdlKind::While => "while",
            SdlKind::Return => "return",
            SdlKind::Try => "try",
        }
    }

    /// Map a tree-sitter-python node kind to the statement it represents.
    pub fn from_node_kind(kind: &str) -> Option<SdlKind> {
        match kind {
            "for_statement" => Some(SdlKind::For),
            "if_statement" => Some(SdlKind::If),
            "while_statement" => Some(SdlKind::While),
            "return_statement" => Some(SdlKind::Return),
            "try_statement" => Some(SdlKind::Try),
            _ => None,
        }
    }
}

impl FromStr for SdlKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SdlKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s.trim())
            .ok_or_else(|| {
                format!(
                    "unknown statement kind '{}'. Supported: for, if, while, return, try",
                    s
                )
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum OperatorKind {
    Xmt,
    Sdl(SdlKind),
}

impl OperatorKind {
    pub fn is_xmt(self) -> bool {
        matches!(self, OperatorKind::Xmt)
    }
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatorKind::Xmt => write!(f, "xmt"),
            OperatorKind::Sdl(kind) => write!(f, "sdl-{}", kind.as_str()),
        }
    }
}

impl FromStr for OperatorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "xmt" {
            return Ok(OperatorKind::Xmt);
        }
        match s.strip_prefix("sdl-") {
            Some(kind) => Ok(OperatorKind::Sdl(kind.parse()?)),
            None => Err(format!("unknown operator '{}'", s)),
        }
    }
}

impl TryFrom<String> for OperatorKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OperatorKind> for String {
    fn from(value: OperatorKind) -> Self {
        value.to_string()
    }
}

/// Byte and line extent of a site in the original source. Lines are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start_byte: usize,
    pub end_byte: usize,
    pub start_line: usize,
    pub end_line: usize,
}

impl Span {
    pub fn contains(&self, other: &Span) -> bool {
        self.start_byte <= other.start_byte && other.end_byte <= self.end_byte
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start_byte < other.end_byte && other.start_byte < self.end_byte
    }
}

/// Where and how a site is rewritten. Filled in by the catalog from the
/// syntax tree so the operators never need the tree themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anchor {
    /// Guard lines go before `row` (0-based) at `indent`.
    CallableEntry {
        row: usize,
        indent: String,
        default_value: String,
    },
    /// A condition (`if`/`while`) occupying these bytes.
    Condition { start: usize, end: usize },
    /// The iterable of a `for` header.
    Iterable { start: usize, end: usize },
    /// Statement start where an inline guard is prefixed.
    StatementStart { at: usize },
    /// Whole statement occupying rows `first_row..=last_row`, re-indented under a guard.
    Block {
        first_row: usize,
        last_row: usize,
        indent: String,
    },
    /// The site cannot be rewritten safely.
    Unsafe(String),
}

/// One catalogued mutation location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationSite {
    /// Project-relative path with `/` separators.
    pub file: String,
    pub module: String,
    pub operator: OperatorKind,
    /// Qualified name of the enclosing callable, e.g. `Calculator.add`.
    pub scope: String,
    pub ordinal: usize,
    pub span: Span,
    pub description: String,
    pub anchor: Anchor,
}

impl MutationSite {
    pub fn mutant_id(&self) -> MutantId {
        format!(
            "{}:{}:{}:{}",
            self.operator, self.module, self.scope, self.ordinal
        )
    }

    pub fn line(&self) -> usize {
        self.span.start_line
    }
}

/// Final classification of a mutant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutantStatus {
    Killed,
    Survived,
    NotCovered,
    Inconclusive,
}

impl fmt::Display for MutantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MutantStatus::Killed => "killed",
            MutantStatus::Survived => "survived",
            MutantStatus::NotCovered => "not covered",
            MutantStatus::Inconclusive => "inconclusive",
        };
        f.write_str(s)
    }
}
