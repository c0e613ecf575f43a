//! Persisted record of one instrumentation pass, kept under `.pseudotest/`
//! in the instrumented tree.
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result, Warning};
use crate::mutants::{MutantId, MutationSite, OperatorKind, SdlKind, Span};
use crate::operators::{CallableTargets, Selection};

pub const STATE_DIR: &str = ".pseudotest";
const MANIFEST_FILE: &str = "manifest.json";
const ORIGINALS_DIR: &str = "originals";
const REPORT_FILE: &str = "report.json";
const COVERAGE_FILE: &str = "coverage.json";

pub fn state_dir(root: &Path) -> PathBuf {
    root.join(STATE_DIR)
}

pub fn manifest_path(root: &Path) -> PathBuf {
    state_dir(root).join(MANIFEST_FILE)
}

pub fn originals_dir(root: &Path) -> PathBuf {
    state_dir(root).join(ORIGINALS_DIR)
}

pub fn report_path(root: &Path) -> PathBuf {
    state_dir(root).join(REPORT_FILE)
}

pub fn coverage_path(root: &Path) -> PathBuf {
    state_dir(root).join(COVERAGE_FILE)
}

pub fn digest_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleOperator {
    Xmt,
    Sdl,
}

/// `"*"` or an explicit list of callable names / statement kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleTarget {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionRule {
    pub operator: RuleOperator,
    pub target: RuleTarget,
}

pub fn rules_for(selection: &Selection) -> Vec<SelectionRule> {
    let mut rules = Vec::new();
    match &selection.xmt {
        CallableTargets::Nothing => {}
        CallableTargets::All => rules.push(SelectionRule {
            operator: RuleOperator::Xmt,
            target: RuleTarget::One("*".into()),
        }),
        CallableTargets::Named(names) => rules.push(SelectionRule {
            operator: RuleOperator::Xmt,
            target: RuleTarget::Many(names.iter().cloned().collect()),
        }),
    }
    if selection.sdl.len() == SdlKind::ALL.len() {
        rules.push(SelectionRule {
            operator: RuleOperator::Sdl,
            target: RuleTarget::One("*".into()),
        });
    } else if !selection.sdl.is_empty() {
        rules.push(SelectionRule {
            operator: RuleOperator::Sdl,
            target: RuleTarget::Many(selection.sdl.iter().map(|k| k.as_str().to_string()).collect()),
        });
    }
    rules
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Project-relative, `/`-separated.
    pub path: String,
    pub original_sha256: String,
    pub instrumented_sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub id: MutantId,
    pub operator: OperatorKind,
    pub file: String,
    pub line: usize,
    pub span: Span,
    pub scope: String,
    pub description: String,
}

impl From<&MutationSite> for ManifestEntry {
    fn from(site: &MutationSite) -> Self {
        ManifestEntry {
            id: site.mutant_id(),
            operator: site.operator,
            file: site.file.clone(),
            line: site.line(),
            span: site.span,
            scope: site.scope.clone(),
            description: site.description.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub mutation_enabled: bool,
    pub rules: Vec<SelectionRule>,
    pub files: Vec<FileRecord>,
    pub mutants: Vec<ManifestEntry>,
    #[serde(default)]
    pub warnings: Vec<Warning>,
}

impl Manifest {
    pub fn load(root: &Path) -> Result<Manifest> {
        let path = manifest_path(root);
        if !path.is_file() {
            return Err(Error::NotInstrumented(root.to_path_buf()));
        }
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        std::fs::create_dir_all(state_dir(root))?;
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(manifest_path(root), json)?;
        Ok(())
    }

    pub fn entry(&self, id: &str) -> Option<&ManifestEntry> {
        self.mutants.iter().find(|m| m.id == id)
    }

    pub fn ids(&self) -> Vec<MutantId> {
        self.mutants.iter().map(|m| m.id.clone()).collect()
    }

    /// Identity of the instrumented source and its mutants; cached coverage
    /// is only valid for the digest it was collected under.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for file in &self.files {
            hasher.update(file.path.as_bytes());
            hasher.update(file.instrumented_sha256.as_bytes());
        }
        for entry in &self.mutants {
            hasher.update(entry.id.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}
