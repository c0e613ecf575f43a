use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::coverage::TestId;
use crate::error::{Result, Warning};
use crate::mutants::{MutantId, MutantStatus};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// Identifies the `run-all-mutations` invocation in logs.
    #[serde(default)]
    pub session: String,
    pub total: usize,
    pub killed: usize,
    pub survived: usize,
    pub not_covered: usize,
    pub inconclusive: usize,
    /// Test executions this run actually made, attribution reruns included.
    pub executions: usize,
    /// Executions one-mutant-per-run scheduling would have made.
    pub exhaustive_executions: usize,
    pub duration_ms: u64,
    /// killed / (killed + survived), 1.0 when nothing was classified.
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutantRecord {
    pub id: MutantId,
    pub operator: String,
    pub file: String,
    pub line: usize,
    pub scope: String,
    pub description: String,
    pub status: MutantStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub killed_by: Vec<TestId>,
    #[serde(default)]
    pub covering_tests: Vec<TestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
}

impl MutantRecord {
    /// Covered, yet no covering test noticed it.
    pub fn is_pseudo_tested(&self) -> bool {
        self.status == MutantStatus::Survived && !self.covering_tests.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MutationReport {
    pub summary: Summary,
    pub mutants: Vec<MutantRecord>,
    pub pseudo_tested: Vec<MutantId>,
    #[serde(default)]
    pub warnings: Vec<Warning>,
}

impl MutationReport {
    /// Build a report and recount the summary from the records.
    pub fn from_records(mutants: Vec<MutantRecord>, executions: usize, exhaustive_executions: usize) -> Self {
        let count = |s: MutantStatus| mutants.iter().filter(|m| m.status == s).count();
        let killed = count(MutantStatus::Killed);
        let survived = count(MutantStatus::Survived);
        let classified = killed + survived;
        let summary = Summary {
            session: String::new(),
            total: mutants.len(),
            killed,
            survived,
            not_covered: count(MutantStatus::NotCovered),
            inconclusive: count(MutantStatus::Inconclusive),
            executions,
            exhaustive_executions,
            duration_ms: 0,
            score: if classified > 0 {
                killed as f64 / classified as f64
            } else {
                1.0
            },
        };
        let pseudo_tested = mutants
            .iter()
            .filter(|m| m.is_pseudo_tested())
            .map(|m| m.id.clone())
            .collect();
        MutationReport {
            summary,
            mutants,
            pseudo_tested,
            warnings: Vec::new(),
        }
    }

    pub fn find(&self, id: &str) -> Option<&MutantRecord> {
        self.mutants.iter().find(|m| m.id == id)
    }
}

pub fn save_to_path(report: &MutationReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(report)?)?;
    Ok(())
}

pub fn load_from_path(path: &Path) -> Option<MutationReport> {
    let data = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&data).ok()
}
