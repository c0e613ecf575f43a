//! Turns coverage into the list of test executions that classifies every
//! covered mutant.
//!
//! Mutants with the same covering tests are enabled together, one execution
//! per (test, batch). A batch never holds two mutants whose spans nest or
//! overlap in the same file, since the outer one would keep the inner one
//! from running. Uncovered mutants get no executions at all.
use std::collections::{BTreeMap, BTreeSet};

use crate::coverage::{CoverageMap, TestId};
use crate::manifest::ManifestEntry;
use crate::mutants::MutantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulePolicy {
    #[default]
    Grouped,
    /// One mutant per execution; the exhaustive baseline.
    Isolated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleUnit {
    pub test: TestId,
    pub activation: BTreeSet<MutantId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schedule {
    pub units: Vec<ScheduleUnit>,
    pub not_covered: Vec<MutantId>,
    /// Executions a one-mutant-per-run schedule would need.
    pub exhaustive_executions: usize,
}

pub fn schedule(entries: &[ManifestEntry], coverage: &CoverageMap, policy: SchedulePolicy) -> Schedule {
    let inverted = coverage.invert();
    let mut groups: BTreeMap<BTreeSet<TestId>, Vec<&ManifestEntry>> = BTreeMap::new();
    let mut not_covered = Vec::new();
    let mut exhaustive_executions = 0;

    for entry in entries {
        match inverted.get(&entry.id) {
            Some(tests) if !tests.is_empty() => {
                exhaustive_executions += tests.len();
                groups.entry(tests.clone()).or_default().push(entry);
            }
            _ => not_covered.push(entry.id.clone()),
        }
    }

    let mut units = Vec::new();
    for (tests, members) in &groups {
        let batches = match policy {
            SchedulePolicy::Grouped => split_interfering(members),
            SchedulePolicy::Isolated => members.iter().map(|m| vec![*m]).collect(),
        };
        for batch in &batches {
            let activation: BTreeSet<MutantId> = batch.iter().map(|m| m.id.clone()).collect();
            for test in tests {
                units.push(ScheduleUnit {
                    test: test.clone(),
                    activation: activation.clone(),
                });
            }
        }
    }

    Schedule {
        units,
        not_covered,
        exhaustive_executions,
    }
}

/// First-fit into batches without nested or overlapping spans per file.
fn split_interfering<'a>(members: &[&'a ManifestEntry]) -> Vec<Vec<&'a ManifestEntry>> {
    let mut batches: Vec<Vec<&ManifestEntry>> = Vec::new();
    for &member in members {
        let slot = batches.iter_mut().find(|batch| {
            !batch
                .iter()
                .any(|other| other.file == member.file && other.span.overlaps(&member.span))
        });
        match slot {
            Some(batch) => batch.push(member),
            None => batches.push(vec![member]),
        }
    }
    batches
}
