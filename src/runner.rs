use std::collections::BTreeSet;
use std::ffi::OsString;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::activation::{ACTIVATION_ENV, ActivationConfig, COVERAGE_ENV, TRACE_ENV};
use crate::coverage::CoverageMap;
use crate::error::{Error, Result};
use crate::manifest;
use crate::mutants::MutantId;

const BASELINE_ARGS: &[&str] = &["-x", "-q", "--tb=short", "--no-header", "-p", "no:cacheprovider"];
const UNIT_ARGS: &[&str] = &["-x", "-q", "--tb=no", "--no-header", "-p", "no:cacheprovider"];

/// Result of one test execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Passed,
    Failed,
    /// The runner itself misbehaved: crash, timeout, usage error.
    Fault(String),
}

/// Runs a single test with a given activation set, in its own process.
pub trait TestRunner {
    fn run_test(&self, test: &str, activation: &ActivationConfig) -> RunOutcome;
}

pub fn parse_test_cmd(cmd: &str) -> (String, Vec<String>) {
    let parts: Vec<&str> = cmd.split_whitespace().collect();
    if parts.len() > 1 {
        (parts[0].to_string(), parts[1..].iter().map(|s| s.to_string()).collect())
    } else {
        (cmd.to_string(), vec![])
    }
}

pub fn resolve_cmd(cmd: &str, working_dir: &Path, cwd: &Path) -> String {
    let p = Path::new(cmd);
    if p.is_absolute() {
        return cmd.to_string();
    }
    // Relative paths such as .venv/bin/pytest: prefer the caller's directory
    if cmd.contains('/') {
        let from_cwd = cwd.join(p);
        if from_cwd.exists() {
            return from_cwd.to_string_lossy().to_string();
        }
        let from_wd = working_dir.join(p);
        if from_wd.exists() {
            return from_wd.to_string_lossy().to_string();
        }
    }
    cmd.to_string()
}

/// Remove the __pycache__ .pyc files for a given source file.
/// This forces Python to re-read the .py file on next import.
pub fn clear_pycache(source_file: &Path) {
    let (Some(parent), Some(stem)) = (source_file.parent(), source_file.file_stem()) else {
        return;
    };
    let cache_dir = parent.join("__pycache__");
    let Ok(entries) = std::fs::read_dir(&cache_dir) else {
        return;
    };
    let prefix = format!("{}.", stem.to_string_lossy());
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        if name_str.starts_with(&prefix) && name_str.ends_with(".pyc") {
            let _ = std::fs::remove_file(entry.path());
        }
    }
}

/// Runs pytest inside an instrumented tree.
#[derive(Debug, Clone)]
pub struct PytestRunner {
    root: PathBuf,
    program: String,
    cmd_args: Vec<String>,
    extra_args: Vec<String>,
    timeout: Duration,
    trace: bool,
}

impl PytestRunner {
    pub fn new(root: &Path, test_cmd: &str, extra_args: Vec<String>) -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let (program, cmd_args) = parse_test_cmd(&resolve_cmd(test_cmd, root, &cwd));
        PytestRunner {
            root: root.to_path_buf(),
            program,
            cmd_args,
            extra_args,
            timeout: Duration::from_secs(30),
            trace: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The resolved command and its extra arguments, as one line.
    pub fn command_line(&self) -> String {
        std::iter::once(&self.program)
            .chain(&self.cmd_args)
            .chain(&self.extra_args)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.cmd_args)
            .args(args)
            .arg(format!("--rootdir={}", self.root.display()))
            .args(&self.extra_args)
            .current_dir(&self.root)
            .env("PYTHONPATH", self.python_path())
            .env("OBJC_DISABLE_INITIALIZE_FORK_SAFETY", "YES")
            .env_remove(ACTIVATION_ENV)
            .env_remove(COVERAGE_ENV);
        if self.trace {
            cmd.env(TRACE_ENV, "1");
        } else {
            cmd.env_remove(TRACE_ENV);
        }
        cmd
    }

    /// The instrumented root goes first so the runtime module always resolves.
    fn python_path(&self) -> OsString {
        let mut paths = vec![self.root.clone()];
        if let Some(existing) = std::env::var_os("PYTHONPATH") {
            paths.extend(std::env::split_paths(&existing));
        }
        std::env::join_paths(paths).unwrap_or_else(|_| self.root.clone().into_os_string())
    }

    /// Run the whole suite once with every mutant off, recording which test
    /// reaches which mutant. Doubles as the baseline: returns its duration.
    pub fn collect_coverage(&self, known: &BTreeSet<MutantId>) -> Result<(CoverageMap, u64)> {
        let trace_path = manifest::state_dir(&self.root).join("trace.jsonl");
        std::fs::create_dir_all(manifest::state_dir(&self.root))?;
        if trace_path.exists() {
            std::fs::remove_file(&trace_path)?;
        }
        info!("running baseline suite with coverage tracing");
        let start = Instant::now();
        let output = self
            .command(BASELINE_ARGS)
            .env(COVERAGE_ENV, &trace_path)
            .output()
            .map_err(|e| Error::BaselineFailed(format!("Failed to run {}: {}", self.program, e)))?;
        let duration_ms = start.elapsed().as_millis() as u64;
        if !output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::BaselineFailed(format!("{}\n{}", stdout, stderr)));
        }
        let coverage = CoverageMap::read_trace(&trace_path, known)?;
        let _ = std::fs::remove_file(&trace_path);
        debug!(duration_ms, tests = coverage.tests.len(), "baseline passed");
        Ok((coverage, duration_ms))
    }

    /// Run the suite (or one test) in the foreground with the given activation.
    /// Returns the test command's exit code.
    pub fn run_foreground(&self, activation: &ActivationConfig, test: Option<&str>) -> Result<i32> {
        let handle = activation.materialize()?;
        let mut cmd = self.command(&["-q", "-p", "no:cacheprovider"]);
        if let Some(test) = test {
            cmd.arg(test);
        }
        let status = cmd.env(ACTIVATION_ENV, handle.path()).status()?;
        Ok(status.code().unwrap_or(-1))
    }
}

impl TestRunner for PytestRunner {
    fn run_test(&self, test: &str, activation: &ActivationConfig) -> RunOutcome {
        let handle = match activation.materialize() {
            Ok(h) => h,
            Err(e) => return RunOutcome::Fault(format!("cannot write activation file: {}", e)),
        };
        // Captured into files so a chatty test cannot fill a pipe and stall.
        let (Ok(stdout), Ok(mut stderr)) = (tempfile::tempfile(), tempfile::tempfile()) else {
            return RunOutcome::Fault("cannot create capture files".into());
        };
        let stderr_handle = match stderr.try_clone() {
            Ok(h) => h,
            Err(e) => return RunOutcome::Fault(e.to_string()),
        };

        let start = Instant::now();
        let child = self
            .command(UNIT_ARGS)
            .arg(test)
            .env(ACTIVATION_ENV, handle.path())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr_handle))
            .spawn();

        let mut child = match child {
            Ok(c) => c,
            Err(e) => return RunOutcome::Fault(format!("Failed to run {}: {}", self.program, e)),
        };
        let status = loop {
            match child.try_wait() {
                Ok(Some(exit_status)) => break exit_status,
                Ok(None) => {
                    if start.elapsed() > self.timeout {
                        let _ = child.kill();
                        let _ = child.wait();
                        return RunOutcome::Fault(format!(
                            "timed out after {:.1}s",
                            self.timeout.as_secs_f64()
                        ));
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(e) => return RunOutcome::Fault(e.to_string()),
            }
        };

        match status.code() {
            Some(0) => RunOutcome::Passed,
            Some(1) => RunOutcome::Failed,
            // Interrupted, which with mutants on means a module stopped importing.
            Some(2) if activation.mutation_enabled && !activation.enabled.is_empty() => RunOutcome::Failed,
            code => {
                let mut captured = String::new();
                let _ = stderr.seek(SeekFrom::Start(0));
                let _ = stderr.read_to_string(&mut captured);
                let tail: String = captured.lines().rev().take(3).collect::<Vec<_>>().join(" | ");
                RunOutcome::Fault(match code {
                    Some(c) => format!("test command exited with {}: {}", c, tail),
                    None => format!("test command killed by signal: {}", tail),
                })
            }
        }
    }
}

/// Default per-unit bound derived from how long the baseline took.
pub fn timeout_from_baseline(baseline_ms: u64, timeout_mult: f64) -> Duration {
    Duration::from_millis((baseline_ms as f64 * timeout_mult) as u64 + 2000)
}
