use std::fs;
use std::path::Path;

use pseudotest::activation::RUNTIME_FILE;
use pseudotest::instrument;
use pseudotest::manifest::{self, Manifest};
use pseudotest::operators::Selection;
use pseudotest::{Error, project, safety};
use tempfile::TempDir;

const A: &str = "def add(a, b):\n    return a + b\n\ndef clamp(x):\n    if x > 100:\n        return 100\n    return x\n";
const B: &str = "\"\"\"Formatting helpers.\"\"\"\n\ndef shout(s):\n    for c in s:\n        print(c)\n    return s.upper()\n";

fn create_project(dir: &Path) {
    fs::write(dir.join("a.py"), A).unwrap();
    fs::write(dir.join("b.py"), B).unwrap();
    fs::create_dir_all(dir.join("tests")).unwrap();
    fs::write(
        dir.join("tests/test_a.py"),
        "from a import add\n\ndef test_add():\n    assert add(1, 2) == 3\n",
    )
    .unwrap();
}

#[test]
fn restore_returns_exact_original_bytes() {
    let dir = TempDir::new().unwrap();
    create_project(dir.path());
    project::instrument_project(dir.path(), &Selection::all(), false).unwrap();
    assert!(safety::is_instrumented(dir.path()));
    assert!(instrument::is_instrumented(&fs::read_to_string(dir.path().join("a.py")).unwrap()));
    assert!(dir.path().join(RUNTIME_FILE).exists());

    let restored = safety::restore(dir.path()).unwrap();
    assert_eq!(restored, 2);
    assert_eq!(fs::read_to_string(dir.path().join("a.py")).unwrap(), A);
    assert_eq!(fs::read_to_string(dir.path().join("b.py")).unwrap(), B);
    assert!(!dir.path().join(RUNTIME_FILE).exists());
    assert!(!manifest::state_dir(dir.path()).exists());
    assert!(!safety::is_instrumented(dir.path()));
}

#[test]
fn test_files_are_never_instrumented() {
    let dir = TempDir::new().unwrap();
    create_project(dir.path());
    let before = fs::read_to_string(dir.path().join("tests/test_a.py")).unwrap();
    let m = project::instrument_project(dir.path(), &Selection::all(), false).unwrap();
    assert!(m.files.iter().all(|f| !f.path.starts_with("tests/")));
    assert_eq!(fs::read_to_string(dir.path().join("tests/test_a.py")).unwrap(), before);
}

#[test]
fn edited_file_blocks_restore_without_partial_writes() {
    let dir = TempDir::new().unwrap();
    create_project(dir.path());
    project::instrument_project(dir.path(), &Selection::all(), false).unwrap();
    let instrumented_a = fs::read_to_string(dir.path().join("a.py")).unwrap();
    let mut edited_b = fs::read_to_string(dir.path().join("b.py")).unwrap();
    edited_b.push_str("\n# local edit\n");
    fs::write(dir.path().join("b.py"), &edited_b).unwrap();

    let err = safety::restore(dir.path()).unwrap_err();
    match err {
        Error::RestoreConflict { path, .. } => assert_eq!(path, "b.py"),
        other => panic!("expected restore conflict, got {other:?}"),
    }
    // Nothing was written: a.py is still instrumented and the state is intact.
    assert_eq!(fs::read_to_string(dir.path().join("a.py")).unwrap(), instrumented_a);
    assert_eq!(fs::read_to_string(dir.path().join("b.py")).unwrap(), edited_b);
    assert!(safety::is_instrumented(dir.path()));
}

#[test]
fn missing_original_blocks_restore() {
    let dir = TempDir::new().unwrap();
    create_project(dir.path());
    project::instrument_project(dir.path(), &Selection::all(), false).unwrap();
    fs::remove_file(manifest::originals_dir(dir.path()).join("a.py")).unwrap();

    let err = safety::restore(dir.path()).unwrap_err();
    assert!(matches!(err, Error::RestoreConflict { ref path, .. } if path == "a.py"));
}

#[test]
fn tampered_original_blocks_restore() {
    let dir = TempDir::new().unwrap();
    create_project(dir.path());
    project::instrument_project(dir.path(), &Selection::all(), false).unwrap();
    fs::write(manifest::originals_dir(dir.path()).join("a.py"), "x = 1\n").unwrap();
    assert!(matches!(
        safety::restore(dir.path()).unwrap_err(),
        Error::RestoreConflict { .. }
    ));
}

#[test]
fn restore_without_instrumentation_is_an_error() {
    let dir = TempDir::new().unwrap();
    create_project(dir.path());
    assert!(matches!(
        safety::restore(dir.path()).unwrap_err(),
        Error::NotInstrumented(_)
    ));
}

#[test]
fn reinstrumenting_unchanged_sources_is_idempotent() {
    let dir = TempDir::new().unwrap();
    create_project(dir.path());
    let first = project::instrument_project(dir.path(), &Selection::all(), false).unwrap();
    let first_a = fs::read_to_string(dir.path().join("a.py")).unwrap();

    let second = project::instrument_project(dir.path(), &Selection::all(), false).unwrap();
    assert_eq!(first.ids(), second.ids());
    assert_eq!(first.files, second.files);
    assert_eq!(fs::read_to_string(dir.path().join("a.py")).unwrap(), first_a);

    safety::restore(dir.path()).unwrap();
    assert_eq!(fs::read_to_string(dir.path().join("a.py")).unwrap(), A);
}

#[test]
fn manifest_records_selection_and_flag() {
    let dir = TempDir::new().unwrap();
    create_project(dir.path());
    let selection = Selection::from_lists(&["add".to_string()], &[]).unwrap();
    project::instrument_project(dir.path(), &selection, true).unwrap();

    let m = Manifest::load(dir.path()).unwrap();
    assert!(m.mutation_enabled);
    assert_eq!(m.ids(), vec!["xmt:a:add:1"]);
    assert_eq!(m.rules, manifest::rules_for(&selection));
    // b.py has no selected sites and is left alone.
    assert_eq!(m.files.len(), 1);
    assert_eq!(fs::read_to_string(dir.path().join("b.py")).unwrap(), B);
}
