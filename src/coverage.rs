//! Which tests reach which mutation sites.
//!
//! Coverage comes either from the runtime's own trace (a JSON line per
//! `(test, mutant)` pair, written while every mutant is switched off) or from
//! external per-test line coverage mapped onto the sites in the manifest.
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::Result;
use crate::manifest::{self, ManifestEntry, digest_hex};
use crate::mutants::MutantId;
use crate::project;

/// pytest node id, e.g. `tests/test_calc.py::test_add`.
pub type TestId = String;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageMap {
    pub tests: BTreeMap<TestId, BTreeSet<MutantId>>,
}

#[derive(Deserialize)]
struct TraceRecord {
    test: String,
    mutant: String,
}

/// `{test: {file: [line, ...]}}`
pub type LineCoverage = BTreeMap<TestId, BTreeMap<String, Vec<usize>>>;

impl CoverageMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records with an empty test id (code run at import or collection time,
    /// outside any test) are ignored.
    pub fn insert(&mut self, test: impl Into<TestId>, mutant: impl Into<MutantId>) {
        let test = test.into();
        if test.trim().is_empty() {
            return;
        }
        self.tests
            .entry(test)
            .or_default()
            .insert(mutant.into());
    }

    pub fn is_empty(&self) -> bool {
        self.tests.values().all(BTreeSet::is_empty)
    }

    /// Parse a runtime trace. Ids not in `known` and malformed lines are skipped.
    pub fn from_trace(data: &str, known: &BTreeSet<MutantId>) -> Self {
        let mut map = CoverageMap::new();
        for (n, line) in data.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TraceRecord>(line) {
                Ok(rec) if known.contains(&rec.mutant) => map.insert(rec.test, rec.mutant),
                Ok(rec) => debug!(mutant = %rec.mutant, "trace mentions an unknown mutant"),
                Err(e) => warn!(line = n + 1, "skipping malformed trace record: {}", e),
            }
        }
        map
    }

    pub fn read_trace(path: &Path, known: &BTreeSet<MutantId>) -> Result<Self> {
        if !path.exists() {
            return Ok(CoverageMap::new());
        }
        let data = std::fs::read_to_string(path)?;
        Ok(Self::from_trace(&data, known))
    }

    /// Map executed lines onto sites. A statement site is reached when its
    /// first line ran; a callable is reached when any line of its body ran.
    pub fn from_line_coverage(lines: &LineCoverage, entries: &[ManifestEntry]) -> Self {
        let mut map = CoverageMap::new();
        for (test, files) in lines {
            for (file, executed) in files {
                let executed: BTreeSet<usize> = executed.iter().copied().collect();
                for entry in entries.iter().filter(|e| same_file(file, &e.file)) {
                    let reached = if entry.operator.is_xmt() {
                        entry.span.end_line > entry.span.start_line
                            && executed
                            .range(entry.span.start_line + 1..=entry.span.end_line)
                            .next()
                            .is_some()
                    } else {
                        executed.contains(&entry.span.start_line)
                    };
                    if reached {
                        map.insert(test.clone(), entry.id.clone());
                    }
                }
            }
        }
        map
    }

    pub fn read_line_coverage(path: &Path, entries: &[ManifestEntry]) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let lines: LineCoverage = serde_json::from_str(&data)?;
        Ok(Self::from_line_coverage(&lines, entries))
    }

    /// `mutant -> covering tests`
    pub fn invert(&self) -> BTreeMap<MutantId, BTreeSet<TestId>> {
        let mut inverted: BTreeMap<MutantId, BTreeSet<TestId>> = BTreeMap::new();
        for (test, mutants) in &self.tests {
            for mutant in mutants {
                inverted
                    .entry(mutant.clone())
                    .or_default()
                    .insert(test.clone());
            }
        }
        inverted
    }
}

fn same_file(reported: &str, relative: &str) -> bool {
    let reported = reported.replace('\\', "/");
    let reported = reported.trim_start_matches("./");
    reported == relative
        || reported
            .strip_suffix(relative)
            .is_some_and(|prefix| prefix.ends_with('/'))
}

/// Identity of everything the coverage run depends on: the instrumented
/// revision, the test files and the command running them.
pub fn cache_key(root: &Path, manifest_digest: &str, command_line: &str) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(manifest_digest.as_bytes());
    hasher.update(b"\0");
    hasher.update(command_line.as_bytes());
    for rel in project::discover_tests(root)? {
        let content = std::fs::read(root.join(&rel))?;
        hasher.update(b"\0");
        hasher.update(rel.as_bytes());
        hasher.update(digest_hex(&content).as_bytes());
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Coverage and baseline timing saved for one instrumented revision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageCache {
    pub key: String,
    pub baseline_ms: u64,
    pub coverage: CoverageMap,
}

pub fn load_cached(root: &Path, key: &str) -> Option<CoverageCache> {
    let data = std::fs::read_to_string(manifest::coverage_path(root)).ok()?;
    let cache: CoverageCache = serde_json::from_str(&data).ok()?;
    if cache.key == key {
        Some(cache)
    } else {
        debug!("cached coverage is stale, ignoring it");
        None
    }
}

pub fn save_cached(root: &Path, cache: &CoverageCache) -> Result<()> {
    std::fs::create_dir_all(manifest::state_dir(root))?;
    std::fs::write(manifest::coverage_path(root), serde_json::to_string(cache)?)?;
    Ok(())
}
