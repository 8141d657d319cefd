use std::fmt;

use serde::{Deserialize, Serialize};

/// Failure classes a tool can report back to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    NotFound,
    InvalidPath,
    WriteFailure,
    ZeroBlocksApplied,
    UnknownTool,
    InvalidArguments,
    ReadFailure,
    CommandFailed,
    Timeout,
}

impl ToolErrorKind {
    /// Stable code surfaced to callers and metrics.
    pub fn code(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::InvalidPath => "invalid_path",
            Self::WriteFailure => "write_failure",
            Self::ZeroBlocksApplied => "zero_blocks_applied",
            Self::UnknownTool => "unknown_tool",
            Self::InvalidArguments => "invalid_arguments",
            Self::ReadFailure => "read_failure",
            Self::CommandFailed => "command_failed",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub message: String,
}

impl ToolError {
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ToolErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::NotFound, message)
    }

    pub fn invalid_path(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::InvalidPath, message)
    }

    pub fn write_failure(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::WriteFailure, message)
    }

    pub fn read_failure(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::ReadFailure, message)
    }

    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::InvalidArguments, message)
    }

    pub fn unknown_tool(name: &str) -> Self {
        Self::new(ToolErrorKind::UnknownTool, format!("Unknown tool: {name}"))
    }
}

impl From<ToolError> for quill_core::error::QuillError {
    fn from(err: ToolError) -> Self {
        Self::Tool(format!("{}: {}", err.code(), err.message))
    }
}
