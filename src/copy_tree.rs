use std::fs;
use std::path::Path;

use crate::manifest::STATE_DIR;

const SKIP_NAMES: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    ".venv",
    "venv",
    "__pycache__",
    ".tox",
    ".nox",
    ".mypy_cache",
    ".pytest_cache",
    ".ruff_cache",
    ".eggs",
    "dist",
    "build",
    STATE_DIR,
];

const SKIP_SUFFIXES: &[&str] = &[".pyc", ".pyo", ".egg-info"];

/// Names never copied into a working copy nor scanned for sources.
pub fn should_skip(name: &str) -> bool {
    SKIP_NAMES.iter().any(|s| *s == name) || SKIP_SUFFIXES.iter().any(|s| name.ends_with(s))
}

fn copy_dir_filtered(src: &Path, dst: &Path) -> std::io::Result<usize> {
    fs::create_dir_all(dst)?;
    let mut copied = 0;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        if should_skip(&name_str) {
            continue;
        }
        let src_path = entry.path();
        let dst_path = dst.join(&name);
        let ft = entry.file_type()?;
        if ft.is_dir() {
            copied += copy_dir_filtered(&src_path, &dst_path)?;
        } else if ft.is_file() {
            fs::copy(&src_path, &dst_path)?;
            copied += 1;
        }
        // Skip symlinks and other special files
    }
    Ok(copied)
}

/// Copy `project` into `dest`, replacing whatever `dest` held before.
/// Returns the number of files copied.
pub fn copy_project(project: &Path, dest: &Path) -> std::io::Result<usize> {
    if dest.exists() {
        fs::remove_dir_all(dest)?;
    }
    copy_dir_filtered(project, dest)
}
