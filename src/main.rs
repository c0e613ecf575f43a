use pseudotest::activation::ActivationConfig;
use pseudotest::config::Config;
use pseudotest::coverage::{self, CoverageCache, CoverageMap};
use pseudotest::manifest::{self, Manifest};
use pseudotest::operators::Selection;
use pseudotest::output;
use pseudotest::project;
use pseudotest::runner::{self, PytestRunner};
use pseudotest::safety;
use pseudotest::scheduler::{self, SchedulePolicy};
use pseudotest::state;
use pseudotest::{Error, orchestrator};

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pseudotest", version, about = "Find pseudo-tested Python code with extreme mutation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Debug logging (PSEUDOTEST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Test command override (default: pytest, or [test].cmd from pseudotest.toml)
    #[arg(long, global = true)]
    test_cmd: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Instrument a project's sources with switchable mutants
    Instrument {
        project: PathBuf,
        /// Callables for extreme mutation ("*" for all)
        #[arg(long, value_delimiter = ',')]
        xmt: Vec<String>,
        /// Statement kinds to delete: for, if, while, return, try ("*" for all)
        #[arg(long, value_delimiter = ',')]
        sdl: Vec<String>,
        /// Instrument the project itself instead of a working copy
        #[arg(long)]
        in_place: bool,
        /// Turn every mutant on by default for `run`
        #[arg(long)]
        enable_mutations: bool,
        /// Print what would change without writing anything
        #[arg(long)]
        diff: bool,
    },
    /// List the mutants of an instrumented project
    ListMutations {
        project: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Run the test suite once against the instrumented project
    Run {
        project: PathBuf,
        #[arg(long, conflicts_with_all = ["disable_mutations", "single_mutant"])]
        enable_mutations: bool,
        #[arg(long, conflicts_with = "single_mutant")]
        disable_mutations: bool,
        /// Enable exactly this mutant
        #[arg(long)]
        single_mutant: Option<String>,
        /// Restrict to one test node id
        #[arg(long)]
        test: Option<String>,
        /// Report every mutant that fires on stderr
        #[arg(long)]
        trace: bool,
    },
    /// Classify every mutant as killed, survived, not covered or inconclusive
    RunAllMutations {
        project: PathBuf,
        /// Concurrent test processes
        #[arg(short, long)]
        jobs: Option<usize>,
        /// Per-execution timeout in seconds (default: 3x baseline + 2s)
        #[arg(long)]
        timeout: Option<u64>,
        /// One mutant per execution instead of grouped batches
        #[arg(long)]
        isolate: bool,
        /// Per-test line coverage JSON ({test: {file: [lines]}}) to use instead of tracing
        #[arg(long)]
        coverage: Option<PathBuf>,
        #[arg(long)]
        json: bool,
        /// Where to write the report (default: .pseudotest/report.json)
        #[arg(long)]
        report: Option<PathBuf>,
        /// Session id for log correlation (default: random)
        #[arg(long)]
        session: Option<String>,
    },
    /// Put the original sources back
    Restore { project: PathBuf },
    /// Summary of the last run
    Status {
        #[arg(default_value = ".")]
        project: PathBuf,
        #[arg(long)]
        json: bool,
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Details for one mutant from the last run
    Show {
        id: String,
        #[arg(default_value = ".")]
        project: PathBuf,
        #[arg(long)]
        json: bool,
        #[arg(long)]
        report: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let test_cmd = cli.test_cmd;
    let exit_code = match cli.command {
        Commands::Instrument {
            project,
            xmt,
            sdl,
            in_place,
            enable_mutations,
            diff,
        } => cmd_instrument(project, xmt, sdl, in_place, enable_mutations, diff),
        Commands::ListMutations { project, json } => cmd_list(project, json),
        Commands::Run {
            project,
            enable_mutations,
            disable_mutations,
            single_mutant,
            test,
            trace,
        } => cmd_run(
            project,
            test_cmd,
            enable_mutations,
            disable_mutations,
            single_mutant,
            test,
            trace,
        ),
        Commands::RunAllMutations {
            project,
            jobs,
            timeout,
            isolate,
            coverage,
            json,
            report,
            session,
        } => cmd_run_all(project, test_cmd, jobs, timeout, isolate, coverage, json, report, session),
        Commands::Restore { project } => cmd_restore(project),
        Commands::Status {
            project,
            json,
            report,
        } => cmd_status(project, json, report),
        Commands::Show {
            id,
            project,
            json,
            report,
        } => cmd_show(id, project, json, report),
    };

    process::exit(exit_code);
}

fn generate_session_id() -> String {
    format!("{:08x}", fastrand::u32(..))
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("PSEUDOTEST_LOG")
        .unwrap_or_else(|_| EnvFilter::new(format!("pseudotest={}", level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Usage and lookup problems exit 2, everything else that stops a command exits 3.
fn fail(e: &Error) -> i32 {
    output::print_error(&e.to_string());
    match e {
        Error::NotInstrumented(_) | Error::AlreadyInstrumented { .. } | Error::Config { .. } => 2,
        _ => 3,
    }
}

fn existing_project(project: &Path) -> Result<PathBuf, i32> {
    match project.canonicalize() {
        Ok(p) if p.is_dir() => Ok(p),
        _ => {
            output::print_error(&format!(
                "Project not found: {}. Check the path and try again.",
                project.display()
            ));
            Err(2)
        }
    }
}

fn load_config(root: &Path) -> Result<Config, i32> {
    Config::load(root).map_err(|e| fail(&e))
}

fn cmd_instrument(
    project: PathBuf,
    xmt: Vec<String>,
    sdl: Vec<String>,
    in_place: bool,
    enable_mutations: bool,
    diff: bool,
) -> i32 {
    let project = match existing_project(&project) {
        Ok(p) => p,
        Err(code) => return code,
    };
    let config = match load_config(&project) {
        Ok(c) => c,
        Err(code) => return code,
    };
    let selection = if xmt.is_empty() && sdl.is_empty() {
        config.mutation.selection()
    } else {
        Selection::from_lists(&xmt, &sdl)
    };
    let selection = match selection {
        Ok(s) if !s.is_empty() => s,
        Ok(_) => {
            output::print_error("Nothing selected. Pass --xmt and/or --sdl.");
            return 2;
        }
        Err(e) => {
            output::print_error(&e);
            return 2;
        }
    };

    match project::unknown_targets(&project, &selection) {
        Ok(missing) if !missing.is_empty() => {
            output::print_error(&format!(
                "Function {} not found. Check the name or use \"*\".",
                missing.join(", ")
            ));
            return 2;
        }
        Ok(_) => {}
        Err(e) => return fail(&e),
    }

    if diff {
        return match project::plan(&project, &selection) {
            Ok(plan) => {
                for file in &plan.files {
                    let d = project::generate_diff(&file.original, &file.instrumented.source);
                    output::print_diff(&file.path, &d);
                }
                output::print_warnings(&plan.warnings);
                0
            }
            Err(e) => fail(&e),
        };
    }

    if !in_place && safety::is_instrumented(&project) {
        output::print_error(&format!(
            "{} is instrumented in place. Run `pseudotest restore` first or pass --in-place.",
            project.display()
        ));
        return 2;
    }

    let result = project::prepare_workspace(&project, in_place)
        .and_then(|root| project::instrument_project(&root, &selection, enable_mutations).map(|m| (root, m)));
    match result {
        Ok((root, manifest)) => {
            output::print_instrumented(&manifest, &root);
            0
        }
        Err(e) => fail(&e),
    }
}

fn open_workspace(project: &Path) -> Result<(PathBuf, Manifest), i32> {
    let project = existing_project(project)?;
    project::resolve_workspace(&project)
        .and_then(|root| Manifest::load(&root).map(|m| (root, m)))
        .map_err(|e| fail(&e))
}

fn cmd_list(project: PathBuf, json_mode: bool) -> i32 {
    let (_, manifest) = match open_workspace(&project) {
        Ok(w) => w,
        Err(code) => return code,
    };
    if json_mode {
        match serde_json::to_string(&manifest.mutants) {
            Ok(json) => println!("{}", json),
            Err(e) => return fail(&Error::from(e)),
        }
    } else {
        output::print_mutations(&manifest);
    }
    0
}

fn test_runner(root: &Path, config: &Config, test_cmd: Option<String>) -> PytestRunner {
    let cmd = test_cmd.unwrap_or_else(|| config.test.cmd.clone());
    PytestRunner::new(root, &cmd, config.test.args.clone())
}

fn cmd_run(
    project: PathBuf,
    test_cmd: Option<String>,
    enable: bool,
    disable: bool,
    single: Option<String>,
    test: Option<String>,
    trace: bool,
) -> i32 {
    let (root, manifest) = match open_workspace(&project) {
        Ok(w) => w,
        Err(code) => return code,
    };
    let config = match load_config(&root) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let activation = match single {
        Some(id) => {
            if manifest.entry(&id).is_none() {
                output::print_error(&format!(
                    "Mutant {} not found. Use `pseudotest list-mutations` to see valid ids.",
                    id
                ));
                return 2;
            }
            ActivationConfig::only([id])
        }
        None if enable || (manifest.mutation_enabled && !disable) => ActivationConfig::only(manifest.ids()),
        None => ActivationConfig::disabled(),
    };
    info!(enabled = activation.enabled.len(), "running test suite");

    let runner = test_runner(&root, &config, test_cmd).with_trace(trace);
    match runner.run_foreground(&activation, test.as_deref()) {
        Ok(0) => {
            output::print_success("tests passed");
            0
        }
        Ok(code) => {
            output::print_error(&format!("tests failed (exit {})", code));
            0
        }
        Err(e) => fail(&e),
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_run_all(
    project: PathBuf,
    test_cmd: Option<String>,
    jobs: Option<usize>,
    timeout: Option<u64>,
    isolate: bool,
    coverage_file: Option<PathBuf>,
    json_mode: bool,
    report_path: Option<PathBuf>,
    session: Option<String>,
) -> i32 {
    let session_id = session.unwrap_or_else(generate_session_id);
    let span = tracing::info_span!("session", id = %session_id);
    let _entered = span.enter();

    let (root, manifest) = match open_workspace(&project) {
        Ok(w) => w,
        Err(code) => return code,
    };
    let config = match load_config(&root) {
        Ok(c) => c,
        Err(code) => return code,
    };
    let runner = test_runner(&root, &config, test_cmd);

    let key = match coverage::cache_key(&root, &manifest.digest(), &runner.command_line()) {
        Ok(key) => key,
        Err(e) => return fail(&e),
    };
    let cache = match coverage::load_cached(&root, &key) {
        Some(cache) => {
            info!("using cached coverage");
            cache
        }
        None => {
            let known: BTreeSet<String> = manifest.ids().into_iter().collect();
            match runner.collect_coverage(&known) {
                Ok((coverage, baseline_ms)) => {
                    let cache = CoverageCache {
                        key,
                        baseline_ms,
                        coverage,
                    };
                    if let Err(e) = coverage::save_cached(&root, &cache) {
                        tracing::warn!("could not cache coverage: {}", e);
                    }
                    cache
                }
                Err(e) => return fail(&e),
            }
        }
    };

    let coverage_map = match coverage_file {
        Some(path) => match CoverageMap::read_line_coverage(&path, &manifest.mutants) {
            Ok(map) => map,
            Err(e) => {
                output::print_error(&format!("Cannot read coverage {}: {}", path.display(), e));
                return 2;
            }
        },
        None => cache.coverage,
    };
    if coverage_map.is_empty() {
        tracing::warn!("no test reaches any mutant; every mutant will be reported as not covered");
    }

    let timeout = timeout
        .or(config.test.timeout_secs)
        .map(Duration::from_secs)
        .unwrap_or_else(|| runner::timeout_from_baseline(cache.baseline_ms, config.test.timeout_mult));
    let runner = runner.with_timeout(timeout);

    let policy = if isolate {
        SchedulePolicy::Isolated
    } else {
        SchedulePolicy::Grouped
    };
    let schedule = scheduler::schedule(&manifest.mutants, &coverage_map, policy);
    info!(
        units = schedule.units.len(),
        exhaustive = schedule.exhaustive_executions,
        timeout_ms = timeout.as_millis() as u64,
        "schedule ready"
    );

    let jobs = jobs.unwrap_or(config.test.jobs);
    let mut report = orchestrator::run_schedule(&runner, &manifest.mutants, &coverage_map, &schedule, jobs);
    report.summary.session = session_id;
    report.warnings.extend(manifest.warnings.iter().cloned());

    let path = report_path.unwrap_or_else(|| manifest::report_path(&root));
    if let Err(e) = state::save_to_path(&report, &path) {
        return fail(&e);
    }

    if json_mode {
        match serde_json::to_string(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => return fail(&Error::from(e)),
        }
    } else {
        output::print_report(&report);
    }
    0
}

fn cmd_restore(project: PathBuf) -> i32 {
    let project = match existing_project(&project) {
        Ok(p) => p,
        Err(code) => return code,
    };
    let result = project::resolve_workspace(&project).and_then(|root| safety::restore(&root).map(|n| (root, n)));
    match result {
        Ok((root, restored)) => {
            output::print_success(&format!("{}: restored {} files", root.display(), restored));
            0
        }
        Err(e) => fail(&e),
    }
}

fn load_report(project: &Path, report: Option<PathBuf>) -> Result<state::MutationReport, i32> {
    let path = match report {
        Some(p) => p,
        None => {
            let root = project
                .canonicalize()
                .ok()
                .and_then(|p| project::resolve_workspace(&p).ok())
                .unwrap_or_else(|| project.to_path_buf());
            manifest::report_path(&root)
        }
    };
    state::load_from_path(&path).ok_or_else(|| {
        output::print_error("No previous run found. Run `pseudotest run-all-mutations` first.");
        2
    })
}

fn cmd_status(project: PathBuf, json_mode: bool, report: Option<PathBuf>) -> i32 {
    let report = match load_report(&project, report) {
        Ok(r) => r,
        Err(code) => return code,
    };
    if json_mode {
        match serde_json::to_string(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => return fail(&Error::from(e)),
        }
    } else {
        output::print_status(&report);
    }
    0
}

fn cmd_show(id: String, project: PathBuf, json_mode: bool, report: Option<PathBuf>) -> i32 {
    let report = match load_report(&project, report) {
        Ok(r) => r,
        Err(code) => return code,
    };
    match report.find(&id) {
        Some(m) => {
            if json_mode {
                match serde_json::to_string(m) {
                    Ok(json) => println!("{}", json),
                    Err(e) => return fail(&Error::from(e)),
                }
            } else {
                output::print_mutant_detail(m);
            }
            0
        }
        None => {
            let hint: Vec<_> = report.pseudo_tested.iter().take(5).cloned().collect();
            output::print_error(&format!(
                "Mutant {} not found in the last report. Pseudo-tested: {}",
                id,
                if hint.is_empty() { "none".to_string() } else { hint.join(", ") }
            ));
            2
        }
    }
}
