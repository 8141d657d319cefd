//! Path resolution that keeps tools inside the workspace.

use std::path::{Component, Path, PathBuf};

use crate::error::ToolError;

fn join_workspace(raw: &str, workspace: &Path) -> Result<PathBuf, ToolError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ToolError::invalid_path("Path must not be empty"));
    }
    if trimmed.contains('\0') {
        return Err(ToolError::invalid_path("Path contains a NUL byte"));
    }
    let path = Path::new(trimmed);
    Ok(if path.is_absolute() {
        path.to_path_buf()
    } else {
        workspace.join(path)
    })
}

/// Lexically drop `.` and fold `..` for paths that do not exist yet.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Canonicalize the deepest existing ancestor and re-append the missing tail.
fn canonical_or_ancestor(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    let normalized = normalize(path);
    let mut ancestor = normalized.as_path();
    while let Some(parent) = ancestor.parent() {
        if let Ok(canon_parent) = parent.canonicalize() {
            let suffix = normalized.strip_prefix(parent).unwrap_or(&normalized);
            return canon_parent.join(suffix);
        }
        ancestor = parent;
    }
    normalized
}

fn check_inside(path: &Path, workspace: &Path) -> Result<(), ToolError> {
    let workspace_canon = workspace.canonicalize().unwrap_or_else(|_| workspace.to_path_buf());
    if !path.starts_with(&workspace_canon) {
        return Err(ToolError::invalid_path(format!(
            "Path '{}' is outside the workspace '{}'",
            path.display(),
            workspace_canon.display()
        )));
    }
    Ok(())
}

/// Resolve `raw` against `workspace` (unless absolute) with symlinks and `..` resolved.
pub fn validate_path(raw: &str, workspace: &Path, restrict: bool) -> Result<PathBuf, ToolError> {
    let path = join_workspace(raw, workspace)?;
    let resolved = canonical_or_ancestor(&path);
    if restrict {
        check_inside(&resolved, workspace)?;
    }
    Ok(resolved)
}

/// Like [`validate_path`], for a target that may not exist yet. Parent
/// directories are not created here.
pub fn validate_write_path(raw: &str, workspace: &Path, restrict: bool) -> Result<PathBuf, ToolError> {
    let resolved = validate_path(raw, workspace, restrict)?;
    if resolved.file_name().is_none() {
        return Err(ToolError::invalid_path(format!("Not a writable path: {raw}")));
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolErrorKind;

    #[test]
    fn test_relative_path_resolves() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = dir.path();
        std::fs::write(workspace.join("test.txt"), "hello").unwrap();

        let result = validate_path("test.txt", workspace, true).unwrap();
        assert!(result.starts_with(workspace.canonicalize().unwrap()));
    }

    #[test]
    fn test_escape_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = dir.path();
        std::fs::create_dir_all(workspace.join("sub")).unwrap();

        let err = validate_path("sub/../../../etc/passwd", workspace, true).unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::InvalidPath);
    }

    #[test]
    fn test_missing_file_under_new_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = dir.path();

        let result = validate_write_path("a/b/../c/new.rs", workspace, true).unwrap();
        assert_eq!(result, workspace.canonicalize().unwrap().join("a/c/new.rs"));
    }

    #[test]
    fn test_absolute_inside_workspace_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = dir.path();
        let abs = workspace.join("x.txt");
        assert!(validate_path(abs.to_str().unwrap(), workspace, true).is_ok());
    }

    #[test]
    fn test_unrestricted_allows_escape() {
        let dir = tempfile::tempdir().unwrap();
        assert!(validate_path("/tmp", dir.path(), false).is_ok());
    }

    #[test]
    fn test_absolute_outside_workspace_depends_on_restriction() {
        let workspace = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let target = other.path().join("notes.md");
        std::fs::write(&target, "x").unwrap();
        let raw = target.to_str().unwrap();

        let err = validate_path(raw, workspace.path(), true).unwrap_err();
        assert_eq!(err.code(), "invalid_path");
        let resolved = validate_path(raw, workspace.path(), false).unwrap();
        assert_eq!(resolved, target.canonicalize().unwrap());
    }

    #[test]
    fn test_empty_path_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(validate_path("  ", dir.path(), true).is_err());
    }
}
