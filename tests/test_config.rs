use pseudotest::config::{self, Config};
use pseudotest::operators::{CallableTargets, Selection};
use pseudotest::Error;
use tempfile::TempDir;

#[test]
fn missing_file_gives_defaults() {
    let dir = TempDir::new().unwrap();
    let config = Config::load(dir.path()).unwrap();
    assert_eq!(config, Config::default());
    assert_eq!(config.test.cmd, "pytest");
    assert_eq!(config.test.jobs, 1);
    assert_eq!(config.test.timeout_mult, 3.0);
    assert!(config.test.timeout_secs.is_none());
    assert_eq!(config.mutation.selection().unwrap(), Selection::all());
}

#[test]
fn empty_file_gives_defaults() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(config::CONFIG_FILE), "\n  \n").unwrap();
    assert_eq!(Config::load(dir.path()).unwrap(), Config::default());
}

#[test]
fn partial_file_keeps_other_defaults() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join(config::CONFIG_FILE),
        r#"
[test]
cmd = ".venv/bin/pytest"
args = ["-p", "no:randomly"]
jobs = 4

[mutation]
xmt = ["Calculator.add"]
sdl = []
"#,
    )
    .unwrap();
    let config = Config::load(dir.path()).unwrap();
    assert_eq!(config.test.cmd, ".venv/bin/pytest");
    assert_eq!(config.test.args, vec!["-p", "no:randomly"]);
    assert_eq!(config.test.jobs, 4);
    assert_eq!(config.test.timeout_mult, 3.0);

    let selection = config.mutation.selection().unwrap();
    assert!(matches!(selection.xmt, CallableTargets::Named(ref names) if names.contains("Calculator.add")));
    assert!(selection.sdl.is_empty());
}

#[test]
fn invalid_toml_is_a_config_error() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(config::CONFIG_FILE), "[test\ncmd = ").unwrap();
    let err = Config::load(dir.path()).unwrap_err();
    assert!(matches!(err, Error::Config { .. }));
    assert!(err.to_string().contains(config::CONFIG_FILE));
}

#[test]
fn wrong_types_are_a_config_error() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(config::CONFIG_FILE), "[test]\njobs = \"many\"\n").unwrap();
    assert!(matches!(Config::load(dir.path()).unwrap_err(), Error::Config { .. }));
}

#[test]
fn unknown_statement_kind_is_reported_by_selection() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(config::CONFIG_FILE), "[mutation]\nsdl = [\"goto\"]\n").unwrap();
    let config = Config::load(dir.path()).unwrap();
    assert!(config.mutation.selection().unwrap_err().contains("goto"));
}
