//! Static tool catalog published to the model.

use serde_json::json;

use quill_core::types::{ApprovalType, ToolDefinition};

pub const TOOL_NAMES: &[&str] = &[
    "read_file",
    "list_directory",
    "get_dir_tree",
    "search_files",
    "edit_file",
    "write_file",
    "create_file_or_folder",
    "delete_file_or_folder",
    "run_command",
];

fn def(name: &str, description: &str, approval_type: ApprovalType, parameters: serde_json::Value) -> ToolDefinition {
    ToolDefinition {
        name: name.into(),
        description: description.into(),
        parameters,
        approval_type,
    }
}

/// Every built-in tool, in a stable order.
pub fn definitions() -> Vec<ToolDefinition> {
    vec![
        def(
            "read_file",
            "Read a file from the workspace. Returns the content with line numbers. Use start_line/end_line (1-indexed, inclusive) to read part of a large file.",
            ApprovalType::None,
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "File path, relative to the workspace or absolute"},
                    "start_line": {"type": "integer", "minimum": 1},
                    "end_line": {"type": "integer", "minimum": 1}
                },
                "required": ["path"]
            }),
        ),
        def(
            "list_directory",
            "List the entries of a directory. Hidden files and build/dependency directories are skipped.",
            ApprovalType::None,
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Directory to list (default: workspace root)"},
                    "recursive": {"type": "boolean", "description": "Descend into subdirectories (default: false)"},
                    "max_depth": {"type": "integer", "description": "Depth limit when recursive (default 3, max 5)"}
                }
            }),
        ),
        def(
            "get_dir_tree",
            "Return the directory tree under a path, to a bounded depth.",
            ApprovalType::None,
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "max_depth": {"type": "integer", "description": "Default 3, max 5"}
                }
            }),
        ),
        def(
            "search_files",
            "Search file contents line by line (case-insensitive). Optionally restrict to file names matching a wildcard like *.rs.",
            ApprovalType::None,
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Text or regular expression to find"},
                    "path": {"type": "string", "description": "Directory to search (default: workspace root)"},
                    "file_pattern": {"type": "string", "description": "File-name wildcard, e.g. *.ts"},
                    "is_regex": {"type": "boolean", "description": "Treat query as a regular expression"}
                },
                "required": ["query"]
            }),
        ),
        def(
            "edit_file",
            "Edit a file with one or more SEARCH/REPLACE blocks:\n<<<<<<< SEARCH\nexisting text\n=======\nreplacement text\n>>>>>>> REPLACE\nThe SEARCH text must match the file; include enough context to be unique.",
            ApprovalType::Edits,
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "search_replace_blocks": {"type": "string"}
                },
                "required": ["path", "search_replace_blocks"]
            }),
        ),
        def(
            "write_file",
            "Write the full content of a file, creating it and its parent directories if needed.",
            ApprovalType::Edits,
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "content": {"type": "string"}
                },
                "required": ["path", "content"]
            }),
        ),
        def(
            "create_file_or_folder",
            "Create a file (optionally with content) or, when the path ends with '/', a folder.",
            ApprovalType::Edits,
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "content": {"type": "string"}
                },
                "required": ["path"]
            }),
        ),
        def(
            "delete_file_or_folder",
            "Delete a file or folder. Non-empty folders require recursive=true.",
            ApprovalType::Dangerous,
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "recursive": {"type": "boolean"}
                },
                "required": ["path"]
            }),
        ),
        def(
            "run_command",
            "Run a shell command and return its exit code and combined output.",
            ApprovalType::Terminal,
            json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string"},
                    "cwd": {"type": "string", "description": "Working directory (default: workspace root)"},
                    "timeout": {"type": "integer", "description": "Timeout in seconds (default 120)"}
                },
                "required": ["command"]
            }),
        ),
    ]
}

pub fn find(name: &str) -> Option<ToolDefinition> {
    definitions().into_iter().find(|d| d.name == name)
}

/// Approval class of a tool; unknown tools are treated as dangerous.
pub fn approval_type(name: &str) -> ApprovalType {
    find(name).map_or(ApprovalType::Dangerous, |d| d.approval_type)
}
