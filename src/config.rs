//! Project-level configuration.
//!
//! Loaded from an optional `pseudotest.toml` at the project root. Command-line
//! flags override what is set here; anything unset falls back to defaults.

use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::operators::Selection;

pub const CONFIG_FILE: &str = "pseudotest.toml";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub test: TestConfig,
    #[serde(default)]
    pub mutation: MutationConfig,
}

/// How the test suite is invoked.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TestConfig {
    /// Test command, split on whitespace. Default: `pytest`.
    #[serde(default = "default_cmd")]
    pub cmd: String,
    /// Extra arguments appended to every invocation.
    #[serde(default)]
    pub args: Vec<String>,
    /// Per-execution bound. Unset means derived from the baseline run.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_timeout_mult")]
    pub timeout_mult: f64,
    /// Test processes run concurrently.
    #[serde(default = "default_jobs")]
    pub jobs: usize,
}

/// Which sites become mutants. `"*"` selects everything.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MutationConfig {
    #[serde(default = "default_xmt")]
    pub xmt: Vec<String>,
    #[serde(default = "default_sdl")]
    pub sdl: Vec<String>,
}

fn default_cmd() -> String {
    "pytest".to_string()
}

fn default_timeout_mult() -> f64 {
    3.0
}

fn default_jobs() -> usize {
    1
}

fn default_xmt() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_sdl() -> Vec<String> {
    vec!["*".to_string()]
}

impl Default for TestConfig {
    fn default() -> Self {
        TestConfig {
            cmd: default_cmd(),
            args: Vec::new(),
            timeout_secs: None,
            timeout_mult: default_timeout_mult(),
            jobs: default_jobs(),
        }
    }
}

impl Default for MutationConfig {
    fn default() -> Self {
        MutationConfig {
            xmt: default_xmt(),
            sdl: default_sdl(),
        }
    }
}

impl Config {
    /// Missing or whitespace-only files yield the defaults.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE);
        if !path.is_file() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        toml::from_str(&content).map_err(|source| Error::Config { path, source })
    }
}

impl MutationConfig {
    pub fn selection(&self) -> std::result::Result<Selection, String> {
        Selection::from_lists(&self.xmt, &self.sdl)
    }
}
