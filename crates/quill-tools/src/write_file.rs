//! `write_file` and `create_file_or_folder`.

use std::path::Path;

use serde_json::json;

use crate::args::{CreateArgs, WriteFileArgs};
use crate::error::ToolError;
use crate::{ToolContext, ToolOutput};

/// Lines added and removed between two versions, after trimming the common
/// leading and trailing lines.
pub fn line_delta(old: &str, new: &str) -> (usize, usize) {
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();

    let prefix = old_lines
        .iter()
        .zip(&new_lines)
        .take_while(|(a, b)| a == b)
        .count();
    let suffix = old_lines[prefix..]
        .iter()
        .rev()
        .zip(new_lines[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    let added = new_lines.len() - prefix - suffix;
    let removed = old_lines.len() - prefix - suffix;
    (added, removed)
}

/// Write via a sibling temp file and rename so readers never see a partial file.
pub(crate) async fn atomic_write(path: &Path, content: &str) -> Result<(), ToolError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = path.with_file_name(format!(".{file_name}.quill.tmp"));
    let fail = |e: std::io::Error| ToolError::write_failure(format!("Failed to write {}: {e}", path.display()));

    tokio::fs::write(&tmp_path, content.as_bytes()).await.map_err(fail)?;
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(fail(e));
    }
    Ok(())
}

async fn ensure_parent(path: &Path) -> Result<(), ToolError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ToolError::write_failure(format!("Failed to create {}: {e}", parent.display())))?;
    }
    Ok(())
}

async fn write_contents(path: &Path, content: &str, ctx: &ToolContext<'_>) -> Result<ToolOutput, ToolError> {
    if path.is_dir() {
        return Err(ToolError::invalid_path(format!("Is a directory: {}", ctx.display_path(path))));
    }

    let existed = path.exists();
    let previous = if existed {
        tokio::fs::read_to_string(path).await.unwrap_or_default()
    } else {
        String::new()
    };

    ensure_parent(path).await?;
    atomic_write(path, content).await?;

    let (lines_added, lines_removed) = line_delta(&previous, content);
    let action = if existed { "updated" } else { "created" };
    let shown = ctx.display_path(path);

    Ok(ToolOutput::text(format!(
        "{} {shown} ({} bytes, +{lines_added} -{lines_removed})",
        if existed { "Updated" } else { "Created" },
        content.len()
    ))
    .with_meta(json!({
        "path": shown,
        "action": action,
        "previous_content": previous,
        "lines_added": lines_added,
        "lines_removed": lines_removed,
    })))
}

pub async fn write_file(args: WriteFileArgs, ctx: &ToolContext<'_>) -> Result<ToolOutput, ToolError> {
    let path = ctx.resolve_for_write(&args.path)?;
    write_contents(&path, &args.content, ctx).await
}

pub async fn create_file_or_folder(args: CreateArgs, ctx: &ToolContext<'_>) -> Result<ToolOutput, ToolError> {
    let is_folder = args.path.ends_with('/') || args.path.ends_with('\\');
    if !is_folder {
        let path = ctx.resolve_for_write(&args.path)?;
        return write_contents(&path, args.content.as_deref().unwrap_or_default(), ctx).await;
    }

    let path = ctx.resolve(args.path.trim_end_matches(['/', '\\']))?;
    if path.is_file() {
        return Err(ToolError::invalid_path(format!("A file already exists at {}", args.path)));
    }
    let existed = path.is_dir();
    tokio::fs::create_dir_all(&path)
        .await
        .map_err(|e| ToolError::write_failure(format!("Failed to create {}: {e}", args.path)))?;

    let shown = ctx.display_path(&path);
    let action = if existed { "exists" } else { "created" };
    Ok(ToolOutput::text(format!("Folder {shown}/ {action}")).with_meta(json!({
        "path": shown,
        "action": action,
        "kind": "directory",
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolSettings;

    fn ctx<'a>(dir: &'a Path, settings: &'a ToolSettings) -> ToolContext<'a> {
        ToolContext {
            workspace: dir,
            settings,
        }
    }

    #[test]
    fn test_line_delta() {
        assert_eq!(line_delta("", "a\nb"), (2, 0));
        assert_eq!(line_delta("a\nb\nc", "a\nX\nc"), (1, 1));
        assert_eq!(line_delta("a\nb\nc", "a\nc"), (0, 1));
        assert_eq!(line_delta("same", "same"), (0, 0));
        assert_eq!(line_delta("a\na", "a\na\na"), (1, 0));
    }

    #[tokio::test]
    async fn test_write_creates_parents_and_reports_created() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ToolSettings::default();
        let out = write_file(
            WriteFileArgs {
                path: "deep/nested/file.txt".into(),
                content: "hello\nworld".into(),
            },
            &ctx(dir.path(), &settings),
        )
        .await
        .unwrap();

        let meta = out.meta.unwrap();
        assert_eq!(meta["action"], "created");
        assert_eq!(meta["previous_content"], "");
        assert_eq!(meta["lines_added"], 2);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("deep/nested/file.txt")).unwrap(),
            "hello\nworld"
        );
    }

    #[tokio::test]
    async fn test_overwrite_captures_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "old\nkeep").unwrap();
        let settings = ToolSettings::default();
        let out = write_file(
            WriteFileArgs {
                path: "a.txt".into(),
                content: "new\nkeep".into(),
            },
            &ctx(dir.path(), &settings),
        )
        .await
        .unwrap();

        let meta = out.meta.unwrap();
        assert_eq!(meta["action"], "updated");
        assert_eq!(meta["previous_content"], "old\nkeep");
        assert_eq!(meta["lines_added"], 1);
        assert_eq!(meta["lines_removed"], 1);
        assert!(!dir.path().join(".a.txt.quill.tmp").exists());
    }

    #[tokio::test]
    async fn test_write_outside_workspace_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ToolSettings::default();
        let err = write_file(
            WriteFileArgs {
                path: "../escape.txt".into(),
                content: String::new(),
            },
            &ctx(dir.path(), &settings),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "invalid_path");
    }

    #[tokio::test]
    async fn test_create_folder_with_trailing_slash() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ToolSettings::default();
        let out = create_file_or_folder(
            CreateArgs {
                path: "src/components/".into(),
                content: None,
            },
            &ctx(dir.path(), &settings),
        )
        .await
        .unwrap();
        assert!(dir.path().join("src/components").is_dir());
        assert_eq!(out.meta.unwrap()["kind"], "directory");
    }

    #[tokio::test]
    async fn test_create_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ToolSettings::default();
        create_file_or_folder(
            CreateArgs {
                path: "notes.md".into(),
                content: None,
            },
            &ctx(dir.path(), &settings),
        )
        .await
        .unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("notes.md")).unwrap(), "");
    }
}
