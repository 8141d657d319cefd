//! `edit_file`: apply SEARCH/REPLACE blocks to a file.
//!
//! ```text
//! <<<<<<< SEARCH
//! old text
//! =======
//! new text
//! >>>>>>> REPLACE
//! ```
//!
//! Each block is tried as an exact substring first, then as a line-normalized
//! match where trailing whitespace on every line is ignored. Blocks that match
//! nowhere are reported; the call only fails when none applied.

use serde_json::json;

use crate::args::EditFileArgs;
use crate::error::{ToolError, ToolErrorKind};
use crate::write_file::{atomic_write, line_delta};
use crate::{ToolContext, ToolOutput};

const PREVIEW_CHARS: usize = 80;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchReplace {
    pub search: String,
    pub replace: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Fuzzy,
}

enum ParseState {
    Outside,
    Search(Vec<String>),
    Replace(Vec<String>, Vec<String>),
}

fn is_search_marker(line: &str) -> bool {
    let t = line.trim();
    t.starts_with("<<<<<<<") && t.trim_start_matches('<').trim() == "SEARCH"
}

fn is_divider(line: &str) -> bool {
    let t = line.trim();
    t.len() >= 7 && t.chars().all(|c| c == '=')
}

fn is_replace_marker(line: &str) -> bool {
    let t = line.trim();
    t.starts_with(">>>>>>>") && t.trim_start_matches('>').trim() == "REPLACE"
}

/// Parse every complete block in `text`. Incomplete trailing blocks are ignored.
pub fn parse_blocks(text: &str) -> Vec<SearchReplace> {
    let mut blocks = Vec::new();
    let mut state = ParseState::Outside;

    for line in text.lines() {
        state = match state {
            ParseState::Outside if is_search_marker(line) => ParseState::Search(Vec::new()),
            ParseState::Outside => ParseState::Outside,
            ParseState::Search(search) if is_divider(line) => ParseState::Replace(search, Vec::new()),
            ParseState::Search(mut search) => {
                search.push(line.to_string());
                ParseState::Search(search)
            }
            ParseState::Replace(search, replace) if is_replace_marker(line) => {
                blocks.push(SearchReplace {
                    search: search.join("\n"),
                    replace: replace.join("\n"),
                });
                ParseState::Outside
            }
            ParseState::Replace(search, mut replace) => {
                replace.push(line.to_string());
                ParseState::Replace(search, replace)
            }
        };
    }
    blocks
}

/// Byte range of the first run of lines in `content` equal to `search` once
/// trailing whitespace is stripped from both. The range excludes the final
/// line terminator.
pub fn fuzzy_find(content: &str, search: &str) -> Option<(usize, usize)> {
    let needle: Vec<&str> = search.lines().map(str::trim_end).collect();
    if needle.is_empty() || needle.iter().all(|l| l.is_empty()) {
        return None;
    }

    let mut lines: Vec<(usize, &str)> = Vec::new();
    let mut offset = 0;
    for raw in content.split_inclusive('\n') {
        lines.push((offset, raw.trim_end_matches(['\n', '\r'])));
        offset += raw.len();
    }
    if lines.len() < needle.len() {
        return None;
    }

    (0..=lines.len() - needle.len()).find_map(|start| {
        let window = &lines[start..start + needle.len()];
        let matches = window
            .iter()
            .zip(&needle)
            .all(|((_, line), want)| line.trim_end() == *want);
        matches.then(|| {
            let (last_offset, last_line) = window[window.len() - 1];
            (window[0].0, last_offset + last_line.len())
        })
    })
}

/// Apply one block to `content`, returning how it matched.
pub fn apply_block(content: &mut String, block: &SearchReplace) -> Option<MatchKind> {
    if block.search.is_empty() {
        return None;
    }
    if let Some(pos) = content.find(&block.search) {
        content.replace_range(pos..pos + block.search.len(), &block.replace);
        return Some(MatchKind::Exact);
    }
    let (start, end) = fuzzy_find(content, &block.search)?;
    content.replace_range(start..end, &block.replace);
    Some(MatchKind::Fuzzy)
}

fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() { format!("{head}...") } else { head }
}

pub async fn edit_file(args: EditFileArgs, ctx: &ToolContext<'_>) -> Result<ToolOutput, ToolError> {
    let path = ctx.resolve(&args.path)?;
    if !path.is_file() {
        return Err(ToolError::not_found(format!("File not found: {}", args.path)));
    }

    let blocks = parse_blocks(&args.search_replace_blocks);
    if blocks.is_empty() {
        return Err(ToolError::invalid_arguments(
            "No SEARCH/REPLACE blocks found. Use <<<<<<< SEARCH / ======= / >>>>>>> REPLACE markers.",
        ));
    }

    let original = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| ToolError::read_failure(format!("Failed to read {}: {e}", args.path)))?;

    let mut content = original.clone();
    let mut applied = 0usize;
    let mut fuzzy = 0usize;
    let mut failures = Vec::new();
    for (i, block) in blocks.iter().enumerate() {
        match apply_block(&mut content, block) {
            Some(kind) => {
                applied += 1;
                if kind == MatchKind::Fuzzy {
                    fuzzy += 1;
                }
            }
            None => failures.push(format!(
                "Block {}: SEARCH text not found: \"{}\"",
                i + 1,
                preview(&block.search)
            )),
        }
    }

    let total = blocks.len();
    if applied == 0 {
        return Err(ToolError::new(
            ToolErrorKind::ZeroBlocksApplied,
            format!(
                "No SEARCH/REPLACE blocks applied to {} (0 of {total})\n{}",
                args.path,
                failures.join("\n")
            ),
        ));
    }

    if content != original {
        atomic_write(&path, &content).await?;
    }

    let (lines_added, lines_removed) = line_delta(&original, &content);
    let mut message = format!("Applied {applied} of {total} blocks to {}", ctx.display_path(&path));
    if !failures.is_empty() {
        message.push('\n');
        message.push_str(&failures.join("\n"));
    }

    Ok(ToolOutput::text(message).with_meta(json!({
        "path": ctx.display_path(&path),
        "action": "updated",
        "applied_count": applied,
        "total_blocks": total,
        "fuzzy_matches": fuzzy,
        "failures": failures,
        "previous_content": original,
        "lines_added": lines_added,
        "lines_removed": lines_removed,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolSettings;

    fn block(search: &str, replace: &str) -> String {
        format!("<<<<<<< SEARCH\n{search}\n=======\n{replace}\n>>>>>>> REPLACE\n")
    }

    async fn run(dir: &std::path::Path, path: &str, blocks: String) -> Result<ToolOutput, ToolError> {
        let settings = ToolSettings::default();
        let ctx = ToolContext {
            workspace: dir,
            settings: &settings,
        };
        edit_file(
            EditFileArgs {
                path: path.into(),
                search_replace_blocks: blocks,
            },
            &ctx,
        )
        .await
    }

    #[test]
    fn test_parse_multiple_blocks() {
        let text = format!("intro\n{}{}", block("a", "b"), block("c\nd", ""));
        let blocks = parse_blocks(&text);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0], SearchReplace { search: "a".into(), replace: "b".into() });
        assert_eq!(blocks[1].search, "c\nd");
        assert_eq!(blocks[1].replace, "");
    }

    #[test]
    fn test_unterminated_block_ignored() {
        assert!(parse_blocks("<<<<<<< SEARCH\nx\n=======\ny\n").is_empty());
    }

    #[test]
    fn test_fuzzy_ignores_trailing_whitespace() {
        let content = "fn a() {   \n    body();\t\n}\nrest\n";
        let (start, end) = fuzzy_find(content, "fn a() {\n    body();\n}").unwrap();
        assert_eq!(&content[start..end], "fn a() {   \n    body();\t\n}");
    }

    #[test]
    fn test_fuzzy_handles_crlf() {
        let content = "one\r\ntwo  \r\nthree\r\n";
        let (start, end) = fuzzy_find(content, "two").unwrap();
        assert_eq!(&content[start..end], "two  ");
    }

    #[tokio::test]
    async fn test_exact_match_applies_one() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("code.rs"), "fn main() {\n    println!(\"old\");\n}\n").unwrap();

        let out = run(dir.path(), "code.rs", block("    println!(\"old\");", "    println!(\"new\");"))
            .await
            .unwrap();
        assert_eq!(out.meta.unwrap()["applied_count"], 1);
        let content = std::fs::read_to_string(dir.path().join("code.rs")).unwrap();
        assert_eq!(content, "fn main() {\n    println!(\"new\");\n}\n");
    }

    #[tokio::test]
    async fn test_fuzzy_match_applies() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def f():  \n    return 1   \n").unwrap();

        let out = run(dir.path(), "a.py", block("def f():\n    return 1", "def f():\n    return 2"))
            .await
            .unwrap();
        assert_eq!(out.meta.unwrap()["fuzzy_matches"], 1);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.py")).unwrap(),
            "def f():\n    return 2\n"
        );
    }

    #[tokio::test]
    async fn test_missing_search_reports_preview() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("t.txt"), "hello world").unwrap();

        let err = run(dir.path(), "t.txt", block("goodbye cruel world", "x")).await.unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::ZeroBlocksApplied);
        assert!(err.message.contains("0 of 1"));
        assert!(err.message.contains("goodbye cruel"));
        assert_eq!(std::fs::read_to_string(dir.path().join("t.txt")).unwrap(), "hello world");
    }

    #[tokio::test]
    async fn test_partial_application_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("t.txt"), "alpha\nbeta\n").unwrap();

        let blocks = format!("{}{}", block("alpha", "ALPHA"), block("gamma", "GAMMA"));
        let out = run(dir.path(), "t.txt", blocks).await.unwrap();
        let meta = out.meta.unwrap();
        assert_eq!(meta["applied_count"], 1);
        assert_eq!(meta["total_blocks"], 2);
        assert!(out.content.contains("Block 2"));
    }

    #[tokio::test]
    async fn test_no_blocks_is_invalid_arguments() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("t.txt"), "x").unwrap();
        let err = run(dir.path(), "t.txt", "just replace it".into()).await.unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::InvalidArguments);
    }

    #[test]
    fn test_preview_truncates() {
        let long = "x".repeat(200);
        assert_eq!(preview(&long).len(), PREVIEW_CHARS + 3);
        assert_eq!(preview("short"), "short");
    }
}
