//! Restoring an instrumented tree to its exact pre-instrumentation bytes.
//!
//! Every file is checked before anything is written: the retained original
//! must match the digest recorded at instrumentation time and the file on
//! disk must still be the instrumented version. Any mismatch aborts the
//! whole restore with [`Error::RestoreConflict`] and leaves the tree as is.
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::activation::RUNTIME_FILE;
use crate::error::{Error, Result};
use crate::manifest::{self, Manifest, digest_hex};
use crate::runner::clear_pycache;

pub fn is_instrumented(root: &Path) -> bool {
    manifest::manifest_path(root).is_file()
}

fn conflict(path: &str, reason: &str) -> Error {
    Error::RestoreConflict {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

/// Put every instrumented file back and remove all instrumentation state.
/// Returns the number of files restored.
pub fn restore(root: &Path) -> Result<usize> {
    let manifest = Manifest::load(root)?;
    let originals = manifest::originals_dir(root);

    let mut planned: Vec<(PathBuf, Vec<u8>)> = Vec::with_capacity(manifest.files.len());
    for record in &manifest.files {
        let original = std::fs::read(originals.join(&record.path))
            .map_err(|_| conflict(&record.path, "retained original is missing"))?;
        if digest_hex(&original) != record.original_sha256 {
            return Err(conflict(&record.path, "retained original does not match the manifest"));
        }
        let target = root.join(&record.path);
        let current = std::fs::read(&target)
            .map_err(|_| conflict(&record.path, "file was removed after instrumentation"))?;
        if digest_hex(&current) != record.instrumented_sha256 {
            return Err(conflict(
                &record.path,
                "file was modified after instrumentation; restoring would discard those edits",
            ));
        }
        planned.push((target, original));
    }

    for (target, original) in &planned {
        std::fs::write(target, original)?;
        clear_pycache(target);
        debug!(file = %target.display(), "restored");
    }

    let runtime = root.join(RUNTIME_FILE);
    if runtime.exists() {
        std::fs::remove_file(&runtime)?;
        clear_pycache(&runtime);
    }
    std::fs::remove_dir_all(manifest::state_dir(root))?;
    info!(files = planned.len(), "restored original sources");
    Ok(planned.len())
}
