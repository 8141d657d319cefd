//! `delete_file_or_folder`. Approval is the caller's concern; this always deletes.

use serde_json::json;
use tracing::info;

use crate::args::DeleteArgs;
use crate::error::ToolError;
use crate::{ToolContext, ToolOutput};

pub async fn delete_file_or_folder(args: DeleteArgs, ctx: &ToolContext<'_>) -> Result<ToolOutput, ToolError> {
    let path = ctx.resolve(&args.path)?;
    let root = ctx.workspace.canonicalize().unwrap_or_else(|_| ctx.workspace.to_path_buf());
    if path == root {
        return Err(ToolError::invalid_path("Refusing to delete the workspace root"));
    }

    let metadata = tokio::fs::symlink_metadata(&path)
        .await
        .map_err(|_| ToolError::not_found(format!("Path not found: {}", args.path)))?;
    let shown = ctx.display_path(&path);

    let kind = if metadata.is_dir() {
        let result = if args.recursive {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_dir(&path).await
        };
        result.map_err(|e| {
            let hint = if args.recursive { "" } else { " (set recursive=true for non-empty folders)" };
            ToolError::write_failure(format!("Failed to delete {shown}: {e}{hint}"))
        })?;
        "directory"
    } else {
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| ToolError::write_failure(format!("Failed to delete {shown}: {e}")))?;
        "file"
    };

    info!(path = %shown, kind, "Deleted workspace entry");
    Ok(ToolOutput::text(format!("Deleted {kind} {shown}")).with_meta(json!({
        "path": shown,
        "kind": kind,
        "action": "deleted",
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolSettings;

    async fn run(dir: &std::path::Path, path: &str, recursive: bool) -> Result<ToolOutput, ToolError> {
        let settings = ToolSettings::default();
        let ctx = ToolContext {
            workspace: dir,
            settings: &settings,
        };
        delete_file_or_folder(
            DeleteArgs {
                path: path.into(),
                recursive,
            },
            &ctx,
        )
        .await
    }

    #[tokio::test]
    async fn test_delete_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("gone.txt"), "x").unwrap();
        let out = run(dir.path(), "gone.txt", false).await.unwrap();
        assert_eq!(out.meta.unwrap()["kind"], "file");
        assert!(!dir.path().join("gone.txt").exists());
    }

    #[tokio::test]
    async fn test_non_empty_folder_needs_recursive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("pkg/src")).unwrap();
        std::fs::write(dir.path().join("pkg/src/lib.rs"), "").unwrap();

        let err = run(dir.path(), "pkg", false).await.unwrap_err();
        assert_eq!(err.code(), "write_failure");
        assert!(dir.path().join("pkg").exists());

        run(dir.path(), "pkg", true).await.unwrap();
        assert!(!dir.path().join("pkg").exists());
    }

    #[tokio::test]
    async fn test_missing_and_root() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(run(dir.path(), "nope", false).await.unwrap_err().code(), "not_found");
        assert_eq!(run(dir.path(), ".", true).await.unwrap_err().code(), "invalid_path");
    }
}
