//! `read_file`: line-numbered file content with an optional line window.

use serde_json::json;

use crate::args::ReadFileArgs;
use crate::error::ToolError;
use crate::{ToolContext, ToolOutput};

/// Clamp a 1-indexed inclusive window to `total` lines. Returns a 0-based half-open range.
pub fn clamp_window(start: Option<usize>, end: Option<usize>, total: usize) -> (usize, usize) {
    if total == 0 {
        return (0, 0);
    }
    let start = start.unwrap_or(1).clamp(1, total);
    let end = end.unwrap_or(total).clamp(start, total);
    (start - 1, end)
}

pub async fn read_file(args: ReadFileArgs, ctx: &ToolContext<'_>) -> Result<ToolOutput, ToolError> {
    let path = ctx.resolve(&args.path)?;

    if !path.exists() {
        return Err(ToolError::not_found(format!("File not found: {}", args.path)));
    }
    if !path.is_file() {
        return Err(ToolError::invalid_path(format!("Not a file: {}", args.path)));
    }

    let content = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| ToolError::read_failure(format!("Failed to read {}: {e}", args.path)))?;

    let lines: Vec<&str> = content.lines().collect();
    let total = lines.len();
    let (from, to) = clamp_window(args.start_line, args.end_line, total);

    let mut result = String::new();
    for (i, line) in lines[from..to].iter().enumerate() {
        let line_num = from + i + 1;
        result.push_str(&format!("{line_num:>6}\t{line}\n"));
    }
    if result.is_empty() {
        result = "(empty file)".into();
    }

    Ok(ToolOutput::text(result).with_meta(json!({
        "path": ctx.display_path(&path),
        "total_lines": total,
        "start_line": if total == 0 { 0 } else { from + 1 },
        "end_line": to,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolErrorKind;
    use crate::ToolSettings;

    async fn run(dir: &std::path::Path, args: ReadFileArgs) -> Result<ToolOutput, ToolError> {
        let settings = ToolSettings::default();
        let ctx = ToolContext {
            workspace: dir,
            settings: &settings,
        };
        read_file(args, &ctx).await
    }

    fn args(path: &str, start_line: Option<usize>, end_line: Option<usize>) -> ReadFileArgs {
        ReadFileArgs {
            path: path.into(),
            start_line,
            end_line,
        }
    }

    #[test]
    fn test_clamp_window() {
        assert_eq!(clamp_window(None, None, 5), (0, 5));
        assert_eq!(clamp_window(Some(2), Some(3), 5), (1, 3));
        assert_eq!(clamp_window(Some(0), Some(99), 5), (0, 5));
        assert_eq!(clamp_window(Some(9), None, 5), (4, 5));
        assert_eq!(clamp_window(Some(4), Some(2), 5), (3, 4));
        assert_eq!(clamp_window(Some(3), None, 0), (0, 0));
    }

    #[tokio::test]
    async fn test_read_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "line1\nline2\nline3").unwrap();

        let out = run(dir.path(), args("hello.txt", None, None)).await.unwrap();
        assert_eq!(out.content, "     1\tline1\n     2\tline2\n     3\tline3\n");
        assert_eq!(out.meta.unwrap()["total_lines"], 3);
    }

    #[tokio::test]
    async fn test_read_window() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.txt"), "a\nb\nc\nd\ne").unwrap();

        let out = run(dir.path(), args("data.txt", Some(3), Some(4))).await.unwrap();
        assert_eq!(out.content, "     3\tc\n     4\td\n");
    }

    #[tokio::test]
    async fn test_read_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(dir.path(), args("nope.txt", None, None)).await.unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_read_directory_is_invalid_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        let err = run(dir.path(), args("src", None, None)).await.unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::InvalidPath);
    }
}
