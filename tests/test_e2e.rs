use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const TEST_CMD: &str = "python3 -m pytest";

fn pseudotest_bin() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    // test binary is in target/debug/deps/, pseudotest binary is in target/debug/
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.push("pseudotest");
    path
}

fn pytest_available() -> bool {
    Command::new("python3")
        .args(["-m", "pytest", "--version"])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

const CALCULATOR: &str = r#"_history = []


def add(a, b):
    return a + b


def log_result(value):
    _history.append(value)


def unused(x):
    return x * 2
"#;

fn create_python_project(dir: &Path) {
    std::fs::create_dir_all(dir.join("tests")).unwrap();
    std::fs::write(dir.join("calculator.py"), CALCULATOR).unwrap();
    std::fs::write(
        dir.join("tests/test_calculator.py"),
        r#"from calculator import add, log_result


def test_add():
    result = add(2, 3)
    log_result(result)
    assert result == 5
"#,
    )
    .unwrap();
}

fn pseudotest(args: &[&str], cwd: &Path) -> Output {
    Command::new(pseudotest_bin())
        .args(args)
        .args(["--test-cmd", TEST_CMD])
        .current_dir(cwd)
        .env_remove("PSEUDOTEST_LOG")
        .output()
        .expect("failed to run pseudotest")
}

fn json(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(stdout.trim()).unwrap_or_else(|e| {
        panic!(
            "Invalid JSON: {e}\nstdout: {stdout}\nstderr: {}",
            String::from_utf8_lossy(&output.stderr)
        )
    })
}

/// A parent temp dir holding `calc/`, so the sibling working copy is cleaned up too.
fn setup() -> (tempfile::TempDir, PathBuf) {
    let parent = tempfile::TempDir::new().unwrap();
    let project = parent.path().join("calc");
    create_python_project(&project);
    (parent, project)
}

#[test]
fn e2e_instrument_list_restore() {
    let (parent, project) = setup();
    let project_arg = project.to_str().unwrap();

    let out = pseudotest(&["instrument", project_arg], parent.path());
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let work = parent.path().join("calc_pseudotest_work");
    assert!(work.join(".pseudotest/manifest.json").is_file());
    assert!(work.join("pseudotest_runtime.py").is_file());
    assert_eq!(
        std::fs::read_to_string(project.join("calculator.py")).unwrap(),
        CALCULATOR,
        "the project itself must not be touched"
    );

    let listed = json(&pseudotest(&["list-mutations", project_arg, "--json"], parent.path()));
    let ids: Vec<&str> = listed
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_str().unwrap())
        .collect();
    assert_eq!(
        ids,
        vec![
            "xmt:calculator:add:1",
            "sdl-return:calculator:add:1",
            "xmt:calculator:log_result:1",
            "xmt:calculator:unused:1",
            "sdl-return:calculator:unused:1",
        ]
    );

    let out = pseudotest(&["restore", project_arg], parent.path());
    assert!(out.status.success());
    assert_eq!(
        std::fs::read_to_string(work.join("calculator.py")).unwrap(),
        CALCULATOR
    );
    assert!(!work.join(".pseudotest").exists());
}

#[test]
fn e2e_run_all_reports_pseudo_tested_code() {
    if !pytest_available() {
        eprintln!("skipping: python3 -m pytest is not available");
        return;
    }
    let (parent, project) = setup();
    let project_arg = project.to_str().unwrap();
    assert!(pseudotest(&["instrument", project_arg], parent.path()).status.success());

    let out = pseudotest(&["run-all-mutations", project_arg, "--json"], parent.path());
    assert_eq!(out.status.code(), Some(0), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let report = json(&out);

    assert_eq!(report["summary"]["total"], 5);
    assert_eq!(report["summary"]["killed"], 2);
    assert_eq!(report["summary"]["survived"], 1);
    assert_eq!(report["summary"]["not_covered"], 2);
    assert_eq!(report["pseudo_tested"][0], "xmt:calculator:log_result:1");
    assert!(report["summary"]["executions"].as_u64().unwrap() <= 4);

    let status = json(&pseudotest(&["status", project_arg, "--json"], parent.path()));
    assert_eq!(status["summary"]["total"], 5);

    let shown = json(&pseudotest(
        &["show", "xmt:calculator:log_result:1", project_arg, "--json"],
        parent.path(),
    ));
    assert_eq!(shown["status"], "survived");
    assert_eq!(shown["covering_tests"][0], "tests/test_calculator.py::test_add");
}

#[test]
fn e2e_run_with_single_mutant() {
    if !pytest_available() {
        eprintln!("skipping: python3 -m pytest is not available");
        return;
    }
    let (parent, project) = setup();
    let project_arg = project.to_str().unwrap();
    assert!(pseudotest(&["instrument", project_arg], parent.path()).status.success());

    let clean = pseudotest(&["run", project_arg], parent.path());
    assert!(clean.status.success());
    assert!(String::from_utf8_lossy(&clean.stdout).contains("tests passed"));

    let mutated = pseudotest(
        &["run", project_arg, "--single-mutant", "xmt:calculator:add:1"],
        parent.path(),
    );
    assert_eq!(mutated.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&mutated.stderr).contains("tests failed"));
}

#[test]
fn e2e_missing_project() {
    let dir = tempfile::TempDir::new().unwrap();
    let output = pseudotest(&["instrument", "nonexistent"], dir.path());
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn e2e_not_instrumented() {
    let (parent, project) = setup();
    let output = pseudotest(&["list-mutations", project.to_str().unwrap()], parent.path());
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("pseudotest instrument"), "stderr: {stderr}");
}

#[test]
fn e2e_unknown_mutant() {
    let (parent, project) = setup();
    let project_arg = project.to_str().unwrap();
    assert!(pseudotest(&["instrument", project_arg], parent.path()).status.success());
    let output = pseudotest(&["run", project_arg, "--single-mutant", "xmt:calculator:nope:1"], parent.path());
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn e2e_diff_writes_nothing() {
    let (parent, project) = setup();
    let output = pseudotest(&["instrument", project.to_str().unwrap(), "--diff"], parent.path());
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("calculator.py"));
    assert!(stdout.contains("is_enabled"));
    assert!(!parent.path().join("calc_pseudotest_work").exists());
}

#[test]
fn e2e_invalid_function_name() {
    let (parent, project) = setup();
    let output = pseudotest(
        &["instrument", project.to_str().unwrap(), "--xmt", "nonexistent_func"],
        parent.path(),
    );
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not found"), "Should report function not found: {stderr}");
}
