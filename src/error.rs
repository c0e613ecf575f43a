use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to parse {path}: syntax error near line {line}")]
    Parse { path: String, line: usize },

    #[error("{path} already contains instrumentation; restore it before instrumenting again")]
    AlreadyInstrumented { path: String },

    #[error("refusing to restore {path}: {reason}")]
    RestoreConflict { path: String, reason: String },

    #[error("no instrumented workspace found for {}. Run `pseudotest instrument` first.", .0.display())]
    NotInstrumented(PathBuf),

    #[error("tests fail before mutation. Fix failing tests first.\n{0}")]
    BaselineFailed(String),

    #[error("invalid config {}: {source}", .path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Language(#[from] tree_sitter::LanguageError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A non-fatal problem attached to a file, site or mutant. Collected instead
/// of aborting so the rest of the project keeps going.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutant: Option<String>,
    pub reason: String,
}

impl Warning {
    pub fn file(file: impl Into<String>, reason: impl Into<String>) -> Self {
        Warning {
            file: file.into(),
            line: None,
            mutant: None,
            reason: reason.into(),
        }
    }

    pub fn site(
        file: impl Into<String>,
        line: usize,
        mutant: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Warning {
            file: file.into(),
            line: Some(line),
            mutant: Some(mutant.into()),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.file)?;
        if let Some(line) = self.line {
            write!(f, ":{}", line)?;
        }
        if let Some(ref id) = self.mutant {
            write!(f, " [{}]", id)?;
        }
        write!(f, ": {}", self.reason)
    }
}
