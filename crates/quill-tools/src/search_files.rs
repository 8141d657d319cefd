//! `search_files`: case-insensitive content search across the workspace.

use std::path::{Path, PathBuf};

use regex::{Regex, RegexBuilder};
use serde::Serialize;
use serde_json::json;

use crate::args::SearchFilesArgs;
use crate::error::ToolError;
use crate::file_list::{EntryKind, entry_kind, visible_entries};
use crate::{ToolContext, ToolOutput};

pub const MAX_MATCHES_PER_FILE: usize = 5;
/// Files opened per search, matching or not.
pub const MAX_FILES_SCANNED: usize = 50;
pub const MAX_FILES_REPORTED: usize = 20;
const MAX_LINE_CHARS: usize = 200;

/// Translate a `*`/`?` wildcard into an anchored, case-insensitive regex.
pub fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut source = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            other => source.push_str(&regex::escape(&other.to_string())),
        }
    }
    source.push('$');
    RegexBuilder::new(&source).case_insensitive(true).build()
}

enum Matcher {
    Substring(String),
    Pattern(Regex),
}

impl Matcher {
    fn is_match(&self, line: &str) -> bool {
        match self {
            Self::Substring(needle) => line.to_lowercase().contains(needle),
            Self::Pattern(re) => re.is_match(line),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineMatch {
    pub line: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileMatches {
    pub path: String,
    pub matches: Vec<LineMatch>,
}

struct Search {
    root: PathBuf,
    allowed: Vec<String>,
    matcher: Matcher,
    file_filter: Option<Regex>,
    scanned: usize,
    truncated: bool,
    files: Vec<FileMatches>,
}

impl Search {
    fn full(&self) -> bool {
        self.scanned >= MAX_FILES_SCANNED
    }

    fn walk(&mut self, dir: &Path) {
        let Ok(entries) = visible_entries(dir, &self.allowed) else {
            return;
        };
        for entry in entries {
            if self.full() {
                self.truncated = true;
                return;
            }
            let path = entry.path();
            match entry_kind(&entry) {
                EntryKind::Symlink => continue,
                EntryKind::Dir => {
                    self.walk(&path);
                    continue;
                }
                EntryKind::File => {}
            }
            if let Some(filter) = &self.file_filter {
                if !filter.is_match(&entry.file_name().to_string_lossy()) {
                    continue;
                }
            }
            self.scan_file(&path);
        }
    }

    fn scan_file(&mut self, path: &Path) {
        self.scanned += 1;
        // Binary and non-UTF-8 files are skipped.
        let Ok(content) = std::fs::read_to_string(path) else {
            return;
        };
        let matches: Vec<LineMatch> = content
            .lines()
            .enumerate()
            .filter(|(_, line)| self.matcher.is_match(line))
            .take(MAX_MATCHES_PER_FILE)
            .map(|(i, line)| LineMatch {
                line: i + 1,
                text: line.trim().chars().take(MAX_LINE_CHARS).collect(),
            })
            .collect();
        if !matches.is_empty() {
            let relative = path.strip_prefix(&self.root).unwrap_or(path);
            self.files.push(FileMatches {
                path: relative.display().to_string(),
                matches,
            });
        }
    }
}

pub async fn search_files(args: SearchFilesArgs, ctx: &ToolContext<'_>) -> Result<ToolOutput, ToolError> {
    if args.query.is_empty() {
        return Err(ToolError::invalid_arguments("query must not be empty"));
    }
    let raw = args.path.as_deref().unwrap_or(".");
    let dir = ctx.resolve(raw)?;
    if !dir.is_dir() {
        return Err(ToolError::not_found(format!("Directory not found: {raw}")));
    }

    let matcher = if args.is_regex {
        let re = RegexBuilder::new(&args.query)
            .case_insensitive(true)
            .build()
            .map_err(|e| ToolError::invalid_arguments(format!("Invalid regex: {e}")))?;
        Matcher::Pattern(re)
    } else {
        Matcher::Substring(args.query.to_lowercase())
    };
    let file_filter = args
        .file_pattern
        .as_deref()
        .filter(|p| !p.is_empty())
        .map(glob_to_regex)
        .transpose()
        .map_err(|e| ToolError::invalid_arguments(format!("Invalid file pattern: {e}")))?;

    let mut search = Search {
        root: dir.clone(),
        allowed: ctx.settings.dotfile_allowlist.clone(),
        matcher,
        file_filter,
        scanned: 0,
        truncated: false,
        files: Vec::new(),
    };
    let (scanned, stopped, files) = tokio::task::spawn_blocking(move || {
        let root = search.root.clone();
        search.walk(&root);
        (search.scanned, search.truncated, search.files)
    })
    .await
    .map_err(|e| ToolError::read_failure(format!("Search aborted: {e}")))?;

    let found = files.len();
    let reported: Vec<FileMatches> = files.into_iter().take(MAX_FILES_REPORTED).collect();

    let mut content = if reported.is_empty() {
        format!("No matches for \"{}\"", args.query)
    } else {
        let mut out = String::new();
        for file in &reported {
            for m in &file.matches {
                out.push_str(&format!("{}:{}: {}\n", file.path, m.line, m.text));
            }
        }
        if found > reported.len() {
            out.push_str(&format!(
                "... showing {} of {found} matching files; narrow the query or path\n",
                reported.len()
            ));
        }
        out
    };
    if stopped {
        content.push_str(&format!("\n(search stopped after scanning {MAX_FILES_SCANNED} files)"));
    }

    Ok(ToolOutput::text(content).with_meta(json!({
        "files_scanned": scanned,
        "files_matched": found,
        "files_reported": reported.len(),
        "results": reported,
    })))
}
