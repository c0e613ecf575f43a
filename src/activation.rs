//! The activation protocol shared by the orchestrator and the embedded
//! Python runtime.
//!
//! Each test process is pointed at its own activation file through
//! [`ACTIVATION_ENV`]. The file is read once and never changes while the
//! process runs, so concurrent processes with different activation sets can
//! share one instrumented tree.
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::Result;
use crate::mutants::MutantId;

pub const ACTIVATION_ENV: &str = "PSEUDOTEST_ACTIVATION";
pub const COVERAGE_ENV: &str = "PSEUDOTEST_COVERAGE";
pub const TRACE_ENV: &str = "PSEUDOTEST_TRACE";

/// Module name instrumented files import.
pub const RUNTIME_MODULE: &str = "pseudotest_runtime";
pub const RUNTIME_FILE: &str = "pseudotest_runtime.py";
pub const RUNTIME_SOURCE: &str = include_str!("runtime.py");

/// Answers whether a mutant behaves mutated in the current process.
pub trait Activation {
    fn is_enabled(&self, id: &str) -> bool;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationConfig {
    #[serde(default)]
    pub mutation_enabled: bool,
    #[serde(default)]
    pub enabled: BTreeSet<MutantId>,
}

impl ActivationConfig {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn only<I>(ids: I) -> Self
    where
        I: IntoIterator<Item = MutantId>,
    {
        ActivationConfig {
            mutation_enabled: true,
            enabled: ids.into_iter().collect(),
        }
    }

    /// Read an activation file. Anything unreadable resolves to "disabled".
    pub fn resolve(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::disabled();
        };
        let parsed = std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|data| serde_json::from_str(&data).map_err(|e| e.to_string()));
        match parsed {
            Ok(config) => config,
            Err(reason) => {
                debug!(path = %path.display(), "activation unavailable, mutation disabled: {}", reason);
                Self::disabled()
            }
        }
    }

    /// Write this set to a fresh temporary file. Every call yields a distinct
    /// path; the file is removed when the handle drops.
    pub fn materialize(&self) -> Result<NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .prefix("pseudotest-activation-")
            .suffix(".json")
            .tempfile()?;
        serde_json::to_writer(&mut file, self)?;
        file.flush()?;
        Ok(file)
    }
}

impl Activation for ActivationConfig {
    fn is_enabled(&self, id: &str) -> bool {
        self.mutation_enabled && self.enabled.contains(id)
    }
}

/// Drop the runtime module at the import root of `root`.
pub fn install_runtime(root: &Path) -> Result<PathBuf> {
    let path = root.join(RUNTIME_FILE);
    std::fs::write(&path, RUNTIME_SOURCE)?;
    Ok(path)
}
