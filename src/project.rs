//! Project-wide instrumentation on top of the per-file catalog and
//! instrumenter, plus locating the tree a command should act on.
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::activation::{RUNTIME_FILE, install_runtime};
use crate::copy_tree;
use crate::error::{Error, Result, Warning};
use crate::instrument::{self, Instrumented};
use crate::manifest::{self, FileRecord, Manifest, ManifestEntry, digest_hex, rules_for};
use crate::operators::{CallableTargets, Selection};
use crate::parser;
use crate::runner::clear_pycache;
use crate::safety;
use crate::{FileRole, classify_file};

/// Suffix of the sibling directory holding the working copy.
pub const WORK_SUFFIX: &str = "_pseudotest_work";

pub fn work_dir_for(project: &Path) -> PathBuf {
    let name = project
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "project".to_string());
    let parent = project.parent().unwrap_or(project);
    parent.join(format!("{}{}", name, WORK_SUFFIX))
}

/// The instrumented tree for `project`: the project itself when it was
/// instrumented in place, otherwise its working copy.
pub fn resolve_workspace(project: &Path) -> Result<PathBuf> {
    if safety::is_instrumented(project) {
        return Ok(project.to_path_buf());
    }
    let work = work_dir_for(project);
    if safety::is_instrumented(&work) {
        return Ok(work);
    }
    Err(Error::NotInstrumented(project.to_path_buf()))
}

/// Make the tree to instrument. Without `in_place` this is a fresh working
/// copy next to the project.
pub fn prepare_workspace(project: &Path, in_place: bool) -> Result<PathBuf> {
    if in_place {
        return Ok(project.to_path_buf());
    }
    let work = work_dir_for(project);
    let copied = copy_tree::copy_project(project, &work)?;
    info!(files = copied, work = %work.display(), "created working copy");
    Ok(work)
}

/// Project-relative paths (`/`-separated) of every non-test Python file,
/// sorted.
pub fn discover_sources(root: &Path) -> Result<Vec<String>> {
    discover(root, FileRole::Source)
}

/// Same as [`discover_sources`] for the test suite's files.
pub fn discover_tests(root: &Path) -> Result<Vec<String>> {
    discover(root, FileRole::Test)
}

fn discover(root: &Path, role: FileRole) -> Result<Vec<String>> {
    let mut found = Vec::new();
    walk(root, root, role, &mut found)?;
    found.sort();
    Ok(found)
}

fn walk(root: &Path, dir: &Path, role: FileRole, found: &mut Vec<String>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if copy_tree::should_skip(&name) || name.ends_with(WORK_SUFFIX) {
            continue;
        }
        let path = entry.path();
        let ft = entry.file_type()?;
        if ft.is_dir() {
            walk(root, &path, role, found)?;
            continue;
        }
        if !ft.is_file() || name == RUNTIME_FILE {
            continue;
        }
        let Ok(rel) = path.strip_prefix(root) else {
            continue;
        };
        if classify_file(rel) == Some(role) {
            let rel = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            found.push(rel);
        }
    }
    Ok(())
}

pub struct FilePlan {
    pub path: String,
    pub original: String,
    pub instrumented: Instrumented,
}

/// What instrumenting `root` would do, without writing anything.
#[derive(Default)]
pub struct Plan {
    pub files: Vec<FilePlan>,
    pub warnings: Vec<Warning>,
}

impl Plan {
    pub fn entries(&self) -> Vec<ManifestEntry> {
        self.files
            .iter()
            .flat_map(|f| f.instrumented.entries.iter().map(ManifestEntry::from))
            .collect()
    }
}

pub fn plan(root: &Path, selection: &Selection) -> Result<Plan> {
    let mut plan = Plan::default();
    for rel in discover_sources(root)? {
        let original = match std::fs::read_to_string(root.join(&rel)) {
            Ok(s) => s,
            Err(e) => {
                warn!(file = %rel, "skipping unreadable file: {}", e);
                plan.warnings.push(Warning::file(&rel, format!("unreadable: {}", e)));
                continue;
            }
        };
        let instrumented = parser::build_catalog(&original, &rel, selection)
            .and_then(|sites| instrument::instrument(&original, &rel, &sites));
        match instrumented {
            Ok(result) => {
                plan.warnings.extend(result.dropped.iter().cloned());
                if result.entries.is_empty() {
                    debug!(file = %rel, "no mutants");
                    continue;
                }
                plan.files.push(FilePlan {
                    path: rel,
                    original,
                    instrumented: result,
                });
            }
            Err(e) => {
                warn!(file = %rel, "skipping file: {}", e);
                plan.warnings.push(Warning::file(&rel, e.to_string()));
            }
        }
    }
    Ok(plan)
}

/// Instrument every source file under `root` and write the manifest.
/// An already instrumented tree is restored first, so repeating this on
/// unchanged sources reproduces the same bytes and ids.
///
/// Originals are retained before any source is touched, and a failure
/// after that puts every rewritten file back.
pub fn instrument_project(root: &Path, selection: &Selection, mutation_enabled: bool) -> Result<Manifest> {
    if safety::is_instrumented(root) {
        info!("restoring previous instrumentation first");
        safety::restore(root)?;
    }
    let plan = plan(root, selection)?;
    let originals = manifest::originals_dir(root);
    for file in &plan.files {
        let kept = originals.join(&file.path);
        if let Some(parent) = kept.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&kept, &file.original)?;
    }

    let mut written = 0;
    match write_instrumented(root, &plan, selection, mutation_enabled, &mut written) {
        Ok(manifest) => {
            info!(
                files = manifest.files.len(),
                mutants = manifest.mutants.len(),
                warnings = manifest.warnings.len(),
                "instrumentation complete"
            );
            Ok(manifest)
        }
        Err(e) => {
            warn!("instrumentation failed, rolling back: {}", e);
            roll_back(root, &plan.files[..written]);
            Err(e)
        }
    }
}

/// Rewrite the planned sources and save the manifest. `written` counts the
/// sources already overwritten when this fails.
fn write_instrumented(
    root: &Path,
    plan: &Plan,
    selection: &Selection,
    mutation_enabled: bool,
    written: &mut usize,
) -> Result<Manifest> {
    let mut files = Vec::with_capacity(plan.files.len());
    for file in &plan.files {
        let target = root.join(&file.path);
        std::fs::write(&target, &file.instrumented.source)?;
        *written += 1;
        clear_pycache(&target);
        files.push(FileRecord {
            path: file.path.clone(),
            original_sha256: digest_hex(file.original.as_bytes()),
            instrumented_sha256: digest_hex(file.instrumented.source.as_bytes()),
        });
    }
    if !files.is_empty() {
        install_runtime(root)?;
    }

    let manifest = Manifest {
        mutation_enabled,
        rules: rules_for(selection),
        files,
        mutants: plan.entries(),
        warnings: plan.warnings.clone(),
    };
    manifest.save(root)?;
    Ok(manifest)
}

/// Put back files rewritten by a failed instrumentation. Their originals
/// stay under `.pseudotest/originals` either way.
fn roll_back(root: &Path, files: &[FilePlan]) {
    for file in files {
        let target = root.join(&file.path);
        match std::fs::write(&target, &file.original) {
            Ok(()) => clear_pycache(&target),
            Err(e) => error!(file = %file.path, "could not roll back: {}", e),
        }
    }
    if !files.is_empty() {
        let runtime = root.join(RUNTIME_FILE);
        if runtime.is_file() && std::fs::remove_file(&runtime).is_ok() {
            clear_pycache(&runtime);
        }
    }
}

/// Named callable targets that match no callable in any source file.
/// Files that fail to parse are ignored here; `plan` reports them.
pub fn unknown_targets(root: &Path, selection: &Selection) -> Result<Vec<String>> {
    let CallableTargets::Named(names) = &selection.xmt else {
        return Ok(Vec::new());
    };
    let mut known = std::collections::BTreeSet::new();
    for rel in discover_sources(root)? {
        let Ok(source) = std::fs::read_to_string(root.join(&rel)) else {
            continue;
        };
        let Ok(functions) = parser::list_functions(&source, &rel) else {
            continue;
        };
        for qualname in functions {
            if let Some((_, short)) = qualname.rsplit_once('.') {
                known.insert(short.to_string());
            }
            known.insert(qualname);
        }
    }
    Ok(names.iter().filter(|n| !known.contains(*n)).cloned().collect())
}

pub fn generate_diff(original: &str, instrumented: &str) -> String {
    use similar::TextDiff;
    let diff = TextDiff::from_lines(original, instrumented);
    let mut output = String::new();
    for change in diff.iter_all_changes() {
        match change.tag() {
            similar::ChangeTag::Delete => {
                output.push_str(&format!("- {}", change));
            }
            similar::ChangeTag::Insert => {
                output.push_str(&format!("+ {}", change));
            }
            _ => {}
        }
    }
    output
}
