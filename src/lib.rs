pub mod activation;
pub mod config;
pub mod copy_tree;
pub mod coverage;
pub mod error;
pub mod instrument;
pub mod manifest;
pub mod mutants;
pub mod operators;
pub mod orchestrator;
pub mod output;
pub mod parser;
pub mod project;
pub mod runner;
pub mod safety;
pub mod scheduler;
pub mod state;

pub use error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRole {
    Source,
    Test,
}

/// Python files are either code under test or part of the test suite.
/// Anything else is not ours to touch.
pub fn classify_file(path: &std::path::Path) -> Option<FileRole> {
    if path.extension()?.to_str()? != "py" {
        return None;
    }
    let name = path.file_name()?.to_str()?;
    let in_tests_dir = path
        .parent()
        .into_iter()
        .flat_map(|p| p.components())
        .any(|c| matches!(c.as_os_str().to_str(), Some("tests" | "test")));
    if name == "conftest.py" || name.starts_with("test_") || name.ends_with("_test.py") || in_tests_dir {
        Some(FileRole::Test)
    } else {
        Some(FileRole::Source)
    }
}
