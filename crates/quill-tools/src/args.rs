//! Typed argument shapes, one per tool.
//!
//! Model-supplied JSON is deserialized into a [`ToolArgs`] variant before any
//! tool runs; a missing or ill-typed field is reported as `invalid_arguments`
//! without touching the workspace.

use serde::Deserialize;
use serde_json::Value;

use crate::error::ToolError;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReadFileArgs {
    pub path: String,
    #[serde(default)]
    pub start_line: Option<usize>,
    #[serde(default)]
    pub end_line: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ListDirectoryArgs {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub max_depth: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DirTreeArgs {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub max_depth: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SearchFilesArgs {
    pub query: String,
    #[serde(default)]
    pub path: Option<String>,
    /// File-name wildcard such as `*.rs`.
    #[serde(default)]
    pub file_pattern: Option<String>,
    #[serde(default)]
    pub is_regex: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EditFileArgs {
    pub path: String,
    pub search_replace_blocks: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WriteFileArgs {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreateArgs {
    /// A trailing `/` creates a folder.
    pub path: String,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeleteArgs {
    pub path: String,
    #[serde(default)]
    pub recursive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RunCommandArgs {
    pub command: String,
    #[serde(default)]
    pub cwd: Option<String>,
    /// Seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
}

/// Arguments of one tool call, validated against the tool's shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolArgs {
    ReadFile(ReadFileArgs),
    ListDirectory(ListDirectoryArgs),
    GetDirTree(DirTreeArgs),
    SearchFiles(SearchFilesArgs),
    EditFile(EditFileArgs),
    WriteFile(WriteFileArgs),
    CreateFileOrFolder(CreateArgs),
    DeleteFileOrFolder(DeleteArgs),
    RunCommand(RunCommandArgs),
}

fn decode<T: serde::de::DeserializeOwned>(name: &str, args: &Value) -> Result<T, ToolError> {
    // Some models send `null` for tools without required parameters.
    let args = if args.is_null() {
        Value::Object(Default::default())
    } else {
        args.clone()
    };
    serde_json::from_value(args)
        .map_err(|e| ToolError::invalid_arguments(format!("Invalid arguments for {name}: {e}")))
}

impl ToolArgs {
    pub fn parse(name: &str, args: &Value) -> Result<Self, ToolError> {
        let parsed = match name {
            "read_file" => Self::ReadFile(decode(name, args)?),
            "list_directory" => Self::ListDirectory(decode(name, args)?),
            "get_dir_tree" => Self::GetDirTree(decode(name, args)?),
            "search_files" => Self::SearchFiles(decode(name, args)?),
            "edit_file" => Self::EditFile(decode(name, args)?),
            "write_file" => Self::WriteFile(decode(name, args)?),
            "create_file_or_folder" => Self::CreateFileOrFolder(decode(name, args)?),
            "delete_file_or_folder" => Self::DeleteFileOrFolder(decode(name, args)?),
            "run_command" => Self::RunCommand(decode(name, args)?),
            other => return Err(ToolError::unknown_tool(other)),
        };
        Ok(parsed)
    }

    pub fn tool_name(&self) -> &'static str {
        match self {
            Self::ReadFile(_) => "read_file",
            Self::ListDirectory(_) => "list_directory",
            Self::GetDirTree(_) => "get_dir_tree",
            Self::SearchFiles(_) => "search_files",
            Self::EditFile(_) => "edit_file",
            Self::WriteFile(_) => "write_file",
            Self::CreateFileOrFolder(_) => "create_file_or_folder",
            Self::DeleteFileOrFolder(_) => "delete_file_or_folder",
            Self::RunCommand(_) => "run_command",
        }
    }

    /// The primary path argument, if the tool takes one.
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::ReadFile(a) => Some(&a.path),
            Self::ListDirectory(a) => a.path.as_deref(),
            Self::GetDirTree(a) => a.path.as_deref(),
            Self::SearchFiles(a) => a.path.as_deref(),
            Self::EditFile(a) => Some(&a.path),
            Self::WriteFile(a) => Some(&a.path),
            Self::CreateFileOrFolder(a) => Some(&a.path),
            Self::DeleteFileOrFolder(a) => Some(&a.path),
            Self::RunCommand(a) => a.cwd.as_deref(),
        }
    }
}
