//! Task-file path resolution inside the workspace root.
//!
//! The request's `taskFilePath` is anchored at the workspace root: a
//! leading `/` does not escape it, `..` may not climb above it, and an
//! existing path whose symlinks resolve outside it is refused.

use std::path::{Component, Path, PathBuf};

use crate::{AppError, Result};

/// Resolve `candidate` relative to `workspace_root`.
///
/// Returns the canonical path when it exists, otherwise the normalized
/// absolute path.
///
/// # Errors
///
/// Returns `AppError::Validation` if:
/// - The workspace root cannot be canonicalized.
/// - The candidate contains `..` segments that climb above the root.
/// - The candidate exists but resolves (through symlinks) outside the root.
pub fn resolve_within(workspace_root: &Path, candidate: impl AsRef<Path>) -> Result<PathBuf> {
    let root = workspace_root
        .canonicalize()
        .map_err(|err| AppError::Validation(format!("workspace root invalid: {err}")))?;

    let mut relative = PathBuf::new();
    for component in candidate.as_ref().components() {
        match component {
            Component::ParentDir => {
                if !relative.pop() {
                    return Err(AppError::Validation(
                        "path escapes the workspace".into(),
                    ));
                }
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::Normal(part) => relative.push(part),
        }
    }

    let absolute = root.join(relative);
    if !absolute.exists() {
        return Ok(absolute);
    }

    let canonical = absolute
        .canonicalize()
        .map_err(|err| AppError::Validation(format!("cannot resolve path: {err}")))?;
    if !canonical.starts_with(&root) {
        return Err(AppError::Validation(
            "symlink target escapes the workspace".into(),
        ));
    }
    Ok(canonical)
}
