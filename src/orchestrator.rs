//! Executes a schedule and turns pass/fail into per-mutant classifications.
//!
//! A passing batch clears every mutant in it for that test. A failing batch
//! is attributed by rerunning each candidate alone against the same test,
//! skipping mutants some other unit has already killed. A runner fault is
//! retried once; a batch that still faults is attributed the same way, and a
//! single mutant that still faults is inconclusive for that test.
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::activation::ActivationConfig;
use crate::coverage::{CoverageMap, TestId};
use crate::manifest::ManifestEntry;
use crate::mutants::{MutantId, MutantStatus};
use crate::runner::{RunOutcome, TestRunner};
use crate::scheduler::{Schedule, ScheduleUnit};
use crate::state::{MutantRecord, MutationReport};

#[derive(Debug, Default)]
struct Ledger {
    killed_by: BTreeMap<MutantId, BTreeSet<TestId>>,
    survived: BTreeMap<MutantId, BTreeSet<TestId>>,
    faults: BTreeMap<MutantId, String>,
}

impl Ledger {
    fn is_killed(&self, id: &str) -> bool {
        self.killed_by.get(id).is_some_and(|t| !t.is_empty())
    }
}

struct Execution<'a, R: ?Sized> {
    runner: &'a R,
    ledger: Mutex<Ledger>,
    executions: AtomicUsize,
}

impl<R: TestRunner + Sync + ?Sized> Execution<'_, R> {
    fn run_once(&self, test: &str, activation: &BTreeSet<MutantId>) -> RunOutcome {
        let config = ActivationConfig::only(activation.iter().cloned());
        let mut outcome = self.runner.run_test(test, &config);
        self.executions.fetch_add(1, Ordering::Relaxed);
        if let RunOutcome::Fault(reason) = &outcome {
            warn!(test, mutants = activation.len(), "runner fault, retrying once: {}", reason);
            outcome = self.runner.run_test(test, &config);
            self.executions.fetch_add(1, Ordering::Relaxed);
        }
        outcome
    }

    fn record(&self, test: &str, id: &str, outcome: &RunOutcome) {
        let mut ledger = self.ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match outcome {
            RunOutcome::Passed => {
                ledger.survived.entry(id.to_string()).or_default().insert(test.to_string());
            }
            RunOutcome::Failed => {
                ledger.killed_by.entry(id.to_string()).or_default().insert(test.to_string());
            }
            RunOutcome::Fault(reason) => {
                warn!(test, mutant = id, "inconclusive: {}", reason);
                ledger
                    .faults
                    .entry(id.to_string())
                    .or_insert_with(|| format!("{}: {}", test, reason));
            }
        }
    }

    fn run_unit(&self, unit: &ScheduleUnit) {
        let outcome = self.run_once(&unit.test, &unit.activation);
        if outcome == RunOutcome::Passed || unit.activation.len() == 1 {
            for id in &unit.activation {
                self.record(&unit.test, id, &outcome);
            }
            return;
        }

        let candidates: Vec<MutantId> = {
            let ledger = self.ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            unit.activation
                .iter()
                .filter(|id| !ledger.is_killed(id))
                .cloned()
                .collect()
        };
        debug!(
            test = %unit.test,
            batch = unit.activation.len(),
            candidates = candidates.len(),
            "batch did not pass, attributing"
        );

        let mut reproduced = false;
        for id in &candidates {
            let single = BTreeSet::from([id.clone()]);
            let outcome = self.run_once(&unit.test, &single);
            reproduced |= outcome != RunOutcome::Passed;
            self.record(&unit.test, id, &outcome);
        }
        if !reproduced && !candidates.is_empty() && outcome == RunOutcome::Failed {
            warn!(
                test = %unit.test,
                "batch failed but no single mutant reproduces the failure"
            );
        }
    }
}

/// Execute every unit with up to `jobs` concurrent test processes and
/// classify every mutant in `entries`. The result does not depend on the
/// order units finish in.
pub fn run_schedule<R>(
    runner: &R,
    entries: &[ManifestEntry],
    coverage: &CoverageMap,
    schedule: &Schedule,
    jobs: usize,
) -> MutationReport
where
    R: TestRunner + Sync + ?Sized,
{
    let start = Instant::now();
    let exec = Execution {
        runner,
        ledger: Mutex::new(Ledger::default()),
        executions: AtomicUsize::new(0),
    };
    let next = AtomicUsize::new(0);
    let workers = jobs.clamp(1, schedule.units.len().max(1));
    info!(
        units = schedule.units.len(),
        workers,
        not_covered = schedule.not_covered.len(),
        "executing schedule"
    );

    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                let idx = next.fetch_add(1, Ordering::Relaxed);
                let Some(unit) = schedule.units.get(idx) else {
                    break;
                };
                exec.run_unit(unit);
            });
        }
    });

    let ledger = exec.ledger.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
    let executions = exec.executions.into_inner();
    let inverted = coverage.invert();
    let not_covered: BTreeSet<&MutantId> = schedule.not_covered.iter().collect();

    let records = entries
        .iter()
        .map(|entry| {
            let killed_by: Vec<TestId> = ledger
                .killed_by
                .get(&entry.id)
                .map(|t| t.iter().cloned().collect())
                .unwrap_or_default();
            let fault = ledger.faults.get(&entry.id).cloned();
            let status = if !killed_by.is_empty() {
                MutantStatus::Killed
            } else if fault.is_some() {
                MutantStatus::Inconclusive
            } else if not_covered.contains(&entry.id) {
                MutantStatus::NotCovered
            } else {
                MutantStatus::Survived
            };
            MutantRecord {
                id: entry.id.clone(),
                operator: entry.operator.to_string(),
                file: entry.file.clone(),
                line: entry.line,
                scope: entry.scope.clone(),
                description: entry.description.clone(),
                status,
                killed_by,
                covering_tests: inverted
                    .get(&entry.id)
                    .map(|t| t.iter().cloned().collect())
                    .unwrap_or_default(),
                fault: if status == MutantStatus::Inconclusive { fault } else { None },
            }
        })
        .collect();

    let mut report = MutationReport::from_records(records, executions, schedule.exhaustive_executions);
    report.summary.duration_ms = start.elapsed().as_millis() as u64;
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysFails;

    impl TestRunner for AlwaysFails {
        fn run_test(&self, _test: &str, _activation: &ActivationConfig) -> RunOutcome {
            RunOutcome::Failed
        }
    }

    #[test]
    fn results_are_kept_after_a_worker_panicked_holding_the_ledger() {
        let exec = Execution {
            runner: &AlwaysFails,
            ledger: Mutex::new(Ledger::default()),
            executions: AtomicUsize::new(0),
        };
        std::thread::scope(|scope| {
            let _ = scope
                .spawn(|| {
                    let _guard = exec.ledger.lock().unwrap();
                    panic!("worker died");
                })
                .join();
        });
        assert!(exec.ledger.is_poisoned());

        exec.record("t::a", "xmt:m:f:1", &RunOutcome::Failed);
        let unit = ScheduleUnit {
            test: "t::b".into(),
            activation: BTreeSet::from(["xmt:m:g:1".to_string()]),
        };
        exec.run_unit(&unit);

        let ledger = exec.ledger.into_inner().unwrap_or_else(|p| p.into_inner());
        assert!(ledger.is_killed("xmt:m:f:1"));
        assert!(ledger.is_killed("xmt:m:g:1"));
    }
}
