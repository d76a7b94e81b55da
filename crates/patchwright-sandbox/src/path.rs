//! Workspace path resolution with escape protection

use crate::provider::SandboxError;
use std::path::{Component, Path, PathBuf};

/// Purely lexical resolution of `path` against `workspace`. Handles paths
/// that do not exist yet; any `..` that climbs above the workspace root is
/// refused. Absolute paths are accepted only when they already point inside
/// the workspace.
pub fn resolve_lexical(workspace: &Path, path: &str) -> Result<PathBuf, SandboxError> {
    let candidate = Path::new(path);

    let relative: PathBuf = if candidate.is_absolute() {
        candidate
            .strip_prefix(workspace)
            .map_err(|_| SandboxError::PathEscape(path.to_string()))?
            .to_path_buf()
    } else {
        candidate.to_path_buf()
    };

    let mut resolved = workspace.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !resolved.pop() || !resolved.starts_with(workspace) {
                    return Err(SandboxError::PathEscape(path.to_string()));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(SandboxError::PathEscape(path.to_string()));
            }
        }
    }

    if !resolved.starts_with(workspace) {
        return Err(SandboxError::PathEscape(path.to_string()));
    }

    Ok(resolved)
}

/// Lexical resolution plus a canonicalization pass to catch symlinks that
/// point out of the workspace. Used by the local backend where the
/// filesystem is visible to this process.
pub fn resolve_workspace_path(workspace: &Path, path: &str) -> Result<PathBuf, SandboxError> {
    let resolved = resolve_lexical(workspace, path)?;

    if resolved.exists() {
        let canonical = resolved.canonicalize()?;
        let canonical_root = workspace.canonicalize()?;
        if !canonical.starts_with(&canonical_root) {
            return Err(SandboxError::PathEscape(path.to_string()));
        }
    }

    Ok(resolved)
}
