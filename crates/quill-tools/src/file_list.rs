//! `list_directory` and `get_dir_tree`.

use std::fs::DirEntry;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::json;

use crate::args::{DirTreeArgs, ListDirectoryArgs};
use crate::error::ToolError;
use crate::{ToolContext, ToolOutput};

pub const MAX_LIST_ENTRIES: usize = 100;
pub const DEFAULT_DEPTH: usize = 3;
pub const MAX_DEPTH: usize = 5;

/// Dotfiles worth showing to the model.
pub const DOTFILE_ALLOWLIST: &[&str] = &[".github", ".gitignore", ".env.example"];

/// Build output, VCS metadata, and dependency directories.
pub const IGNORED_NAMES: &[&str] = &[
    "node_modules",
    "target",
    "dist",
    "build",
    ".git",
    "__pycache__",
    ".next",
    ".venv",
    "vendor",
    "out",
    "coverage",
];

/// Whether a walk should skip `name`.
pub(crate) fn is_skipped(name: &str, extra_allowed: &[String]) -> bool {
    if IGNORED_NAMES.contains(&name) {
        return true;
    }
    name.starts_with('.')
        && !DOTFILE_ALLOWLIST.contains(&name)
        && !extra_allowed.iter().any(|allowed| allowed == name)
}

/// What a directory entry is, without following symlinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryKind {
    Dir,
    File,
    Symlink,
}

pub(crate) fn entry_kind(entry: &DirEntry) -> EntryKind {
    match entry.file_type() {
        Ok(t) if t.is_symlink() => EntryKind::Symlink,
        Ok(t) if t.is_dir() => EntryKind::Dir,
        _ => EntryKind::File,
    }
}

/// Directory entries that survive the skip rules, directories first, then by name.
pub(crate) fn visible_entries(dir: &Path, extra_allowed: &[String]) -> std::io::Result<Vec<DirEntry>> {
    let mut entries: Vec<DirEntry> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| !is_skipped(&e.file_name().to_string_lossy(), extra_allowed))
        .collect();
    entries.sort_by_key(|e| (entry_kind(e) != EntryKind::Dir, e.file_name()));
    Ok(entries)
}

fn resolve_dir(raw: Option<&str>, ctx: &ToolContext<'_>) -> Result<PathBuf, ToolError> {
    let raw = raw.unwrap_or(".");
    let path = ctx.resolve(raw)?;
    if !path.exists() {
        return Err(ToolError::not_found(format!("Directory not found: {raw}")));
    }
    if !path.is_dir() {
        return Err(ToolError::invalid_path(format!("Not a directory: {raw}")));
    }
    Ok(path)
}

struct Listing {
    root: PathBuf,
    allowed: Vec<String>,
    max_depth: usize,
    lines: Vec<String>,
    truncated: bool,
}

impl Listing {
    fn collect(&mut self, dir: &Path, depth: usize) -> std::io::Result<()> {
        for entry in visible_entries(dir, &self.allowed)? {
            if self.lines.len() >= MAX_LIST_ENTRIES {
                self.truncated = true;
                return Ok(());
            }
            let path = entry.path();
            let relative = path.strip_prefix(&self.root).unwrap_or(&path).to_path_buf();
            match entry_kind(&entry) {
                EntryKind::Dir => {
                    self.lines.push(format!("[dir]  {}/", relative.display()));
                    if depth + 1 < self.max_depth {
                        self.collect(&path, depth + 1)?;
                    }
                }
                // Links are listed but never followed.
                EntryKind::Symlink => self.lines.push(format!("[link] {}", relative.display())),
                EntryKind::File => {
                    let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                    self.lines.push(format!("[file] {} ({size} bytes)", relative.display()));
                }
            }
        }
        Ok(())
    }
}

pub async fn list_directory(args: ListDirectoryArgs, ctx: &ToolContext<'_>) -> Result<ToolOutput, ToolError> {
    let dir = resolve_dir(args.path.as_deref(), ctx)?;
    let max_depth = if args.recursive {
        args.max_depth.unwrap_or(DEFAULT_DEPTH).min(MAX_DEPTH)
    } else {
        1
    };

    let mut listing = Listing {
        root: dir.clone(),
        allowed: ctx.settings.dotfile_allowlist.clone(),
        max_depth,
        lines: Vec::new(),
        truncated: false,
    };
    let listing = tokio::task::spawn_blocking(move || {
        if listing.max_depth > 0 {
            let root = listing.root.clone();
            listing.collect(&root, 0)?;
        }
        Ok::<_, std::io::Error>(listing)
    })
    .await
    .map_err(|e| ToolError::read_failure(format!("Listing aborted: {e}")))?
    .map_err(|e| ToolError::read_failure(format!("Failed to list {}: {e}", dir.display())))?;

    let count = listing.lines.len();
    let mut content = if listing.lines.is_empty() {
        "(empty directory)".to_string()
    } else {
        listing.lines.join("\n")
    };
    if listing.truncated {
        content.push_str(&format!("\n... (truncated at {MAX_LIST_ENTRIES} entries)"));
    }

    Ok(ToolOutput::text(content).with_meta(json!({
        "path": ctx.display_path(&dir),
        "entries": count,
        "truncated": listing.truncated,
    })))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    File,
    Directory,
    Symlink,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeNode {
    pub name: String,
    pub path: String,
    pub kind: NodeKind,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeNode>,
}

/// Nodes under `dir` down to `depth` levels. Depth 0 yields nothing.
pub fn build_tree(root: &Path, dir: &Path, depth: usize, allowed: &[String]) -> std::io::Result<Vec<TreeNode>> {
    if depth == 0 {
        return Ok(Vec::new());
    }
    let mut nodes = Vec::new();
    for entry in visible_entries(dir, allowed)? {
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(&path).display().to_string();
        let name = entry.file_name().to_string_lossy().into_owned();
        let (kind, children) = match entry_kind(&entry) {
            // Unreadable subdirectories still appear, just without children.
            EntryKind::Dir => (
                NodeKind::Directory,
                build_tree(root, &path, depth - 1, allowed).unwrap_or_default(),
            ),
            EntryKind::Symlink => (NodeKind::Symlink, Vec::new()),
            EntryKind::File => (NodeKind::File, Vec::new()),
        };
        nodes.push(TreeNode {
            name,
            path: relative,
            kind,
            children,
        });
    }
    Ok(nodes)
}

fn render_tree(nodes: &[TreeNode], indent: usize, out: &mut String) {
    for node in nodes {
        out.push_str(&"  ".repeat(indent));
        out.push_str(&node.name);
        match node.kind {
            NodeKind::Directory => out.push('/'),
            NodeKind::Symlink => out.push('@'),
            NodeKind::File => {}
        }
        out.push('\n');
        render_tree(&node.children, indent + 1, out);
    }
}

pub async fn get_dir_tree(args: DirTreeArgs, ctx: &ToolContext<'_>) -> Result<ToolOutput, ToolError> {
    let dir = resolve_dir(args.path.as_deref(), ctx)?;
    let depth = args.max_depth.unwrap_or(DEFAULT_DEPTH).min(MAX_DEPTH);

    let root = dir.clone();
    let allowed = ctx.settings.dotfile_allowlist.clone();
    let nodes = tokio::task::spawn_blocking(move || build_tree(&root, &root, depth, &allowed))
        .await
        .map_err(|e| ToolError::read_failure(format!("Tree walk aborted: {e}")))?
        .map_err(|e| ToolError::read_failure(format!("Failed to read {}: {e}", dir.display())))?;

    let mut content = String::new();
    render_tree(&nodes, 0, &mut content);
    if content.is_empty() {
        content = "(no entries)".into();
    }

    Ok(ToolOutput::text(content).with_meta(json!({
        "path": ctx.display_path(&dir),
        "max_depth": depth,
        "nodes": nodes,
    })))
}
