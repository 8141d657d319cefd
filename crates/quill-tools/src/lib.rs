//! Tool executor for the agent runtime.
//!
//! Every tool call goes through [`ToolExecutor::execute`], which validates the
//! arguments into a typed [`ToolArgs`] variant, runs the operation against the
//! workspace, and folds every outcome (including failures) into a
//! [`ToolExecutionResult`]. Nothing here returns `Err` to the caller.

pub mod args;
pub mod catalog;
pub mod delete;
pub mod edit_file;
pub mod error;
pub mod exec;
pub mod file_list;
pub mod path_guard;
pub mod read_file;
pub mod search_files;
pub mod write_file;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use quill_core::config::{Config, ToolsConfig};
use quill_core::types::{ToolCall, ToolDefinition};

pub use args::ToolArgs;
pub use error::{ToolError, ToolErrorKind};

/// Executor-wide settings, taken from the `tools` config section.
#[derive(Debug, Clone)]
pub struct ToolSettings {
    pub restrict_to_workspace: bool,
    pub command_timeout: Duration,
    pub max_output_bytes: usize,
    /// Dotfiles shown by listings in addition to the built-in allow-list.
    pub dotfile_allowlist: Vec<String>,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self::from(&ToolsConfig::default())
    }
}

impl From<&ToolsConfig> for ToolSettings {
    fn from(config: &ToolsConfig) -> Self {
        Self {
            restrict_to_workspace: config.restrict_to_workspace,
            command_timeout: Duration::from_secs(config.command_timeout_secs),
            max_output_bytes: config.max_output_bytes,
            dotfile_allowlist: config.dotfile_allowlist.clone(),
        }
    }
}

/// Context provided to a tool for one execution.
pub struct ToolContext<'a> {
    pub workspace: &'a Path,
    pub settings: &'a ToolSettings,
}

impl ToolContext<'_> {
    pub fn resolve(&self, raw: &str) -> Result<PathBuf, ToolError> {
        path_guard::validate_path(raw, self.workspace, self.settings.restrict_to_workspace)
    }

    pub fn resolve_for_write(&self, raw: &str) -> Result<PathBuf, ToolError> {
        path_guard::validate_write_path(raw, self.workspace, self.settings.restrict_to_workspace)
    }

    /// Path relative to the workspace for display, absolute if outside it.
    pub fn display_path(&self, path: &Path) -> String {
        let root = self.workspace.canonicalize().unwrap_or_else(|_| self.workspace.to_path_buf());
        path.strip_prefix(&root)
            .or_else(|_| path.strip_prefix(self.workspace))
            .unwrap_or(path)
            .display()
            .to_string()
    }
}

/// Output of a tool that ran. `failure` is set when the tool produced output
/// but still failed (a command exiting non-zero).
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub content: String,
    pub meta: Option<Value>,
    pub failure: Option<ToolError>,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// Uniform record of a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecutionResult {
    pub success: bool,
    pub result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl ToolExecutionResult {
    pub fn failed(error: ToolError) -> Self {
        Self {
            success: false,
            result: String::new(),
            error: Some(error),
            meta: None,
        }
    }

    pub fn error_code(&self) -> Option<&'static str> {
        self.error.as_ref().map(ToolError::code)
    }

    /// Text reported back to the model as the tool-result message.
    pub fn to_model_text(&self) -> String {
        match &self.error {
            None => self.result.clone(),
            Some(err) if self.result.is_empty() => format!("Error [{}]: {}", err.code(), err.message),
            Some(err) => format!("Error [{}]: {}\n{}", err.code(), err.message, self.result),
        }
    }

    /// Record this result on `call`, which must be `running` or `awaiting`.
    pub fn apply_to(&self, call: &mut ToolCall) -> quill_core::error::Result<()> {
        match &self.error {
            None => call.succeed(self.result.clone()),
            Some(err) => {
                let output = (!self.result.is_empty()).then(|| self.result.clone());
                call.fail(format!("{}: {}", err.code(), err.message), output)
            }
        }
    }
}

impl From<Result<ToolOutput, ToolError>> for ToolExecutionResult {
    fn from(outcome: Result<ToolOutput, ToolError>) -> Self {
        match outcome {
            Ok(output) => Self {
                success: output.failure.is_none(),
                result: output.content,
                error: output.failure,
                meta: output.meta,
            },
            Err(error) => Self::failed(error),
        }
    }
}

/// Dispatches tool calls to the built-in tools.
#[derive(Debug, Clone, Default)]
pub struct ToolExecutor {
    settings: ToolSettings,
}

impl ToolExecutor {
    pub fn new(settings: ToolSettings) -> Self {
        Self { settings }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(ToolSettings::from(&config.tools()))
    }

    pub fn settings(&self) -> &ToolSettings {
        &self.settings
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        catalog::definitions()
    }

    /// Execute `name` with raw JSON `args` against `workspace_root`.
    pub async fn execute(&self, name: &str, args: &Value, workspace_root: &Path) -> ToolExecutionResult {
        let started = Instant::now();
        let outcome = match ToolArgs::parse(name, args) {
            Ok(parsed) => self.dispatch(parsed, workspace_root).await,
            Err(err) => Err(err),
        };
        let result = ToolExecutionResult::from(outcome);

        let elapsed = started.elapsed();
        metrics::counter!("quill_tool_calls_total", "tool" => name.to_string()).increment(1);
        metrics::histogram!("quill_tool_duration_seconds", "tool" => name.to_string())
            .record(elapsed.as_secs_f64());
        match &result.error {
            None => debug!(tool = name, elapsed_ms = elapsed.as_millis() as u64, "Tool succeeded"),
            Some(err) => {
                warn!(tool = name, code = err.code(), error = %err, "Tool failed");
                metrics::counter!("quill_tool_errors_total", "tool" => name.to_string(), "code" => err.code())
                    .increment(1);
            }
        }
        result
    }

    /// Execute an already-validated argument set.
    pub async fn dispatch(&self, args: ToolArgs, workspace_root: &Path) -> Result<ToolOutput, ToolError> {
        let ctx = ToolContext {
            workspace: workspace_root,
            settings: &self.settings,
        };
        match args {
            ToolArgs::ReadFile(a) => read_file::read_file(a, &ctx).await,
            ToolArgs::ListDirectory(a) => file_list::list_directory(a, &ctx).await,
            ToolArgs::GetDirTree(a) => file_list::get_dir_tree(a, &ctx).await,
            ToolArgs::SearchFiles(a) => search_files::search_files(a, &ctx).await,
            ToolArgs::EditFile(a) => edit_file::edit_file(a, &ctx).await,
            ToolArgs::WriteFile(a) => write_file::write_file(a, &ctx).await,
            ToolArgs::CreateFileOrFolder(a) => write_file::create_file_or_folder(a, &ctx).await,
            ToolArgs::DeleteFileOrFolder(a) => delete::delete_file_or_folder(a, &ctx).await,
            ToolArgs::RunCommand(a) => exec::run_command(a, &ctx).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_unknown_tool_is_a_result_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = ToolExecutor::default().execute("teleport", &json!({}), dir.path()).await;
        assert!(!result.success);
        assert_eq!(result.error_code(), Some("unknown_tool"));
    }

    #[tokio::test]
    async fn test_invalid_arguments_never_touch_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let result = ToolExecutor::default()
            .execute("write_file", &json!({"path": "x.txt"}), dir.path())
            .await;
        assert_eq!(result.error_code(), Some("invalid_arguments"));
        assert!(!dir.path().join("x.txt").exists());
    }

    #[tokio::test]
    async fn test_write_then_read_through_executor() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ToolExecutor::default();
        let written = executor
            .execute("write_file", &json!({"path": "src/a.txt", "content": "one\ntwo"}), dir.path())
            .await;
        assert!(written.success, "{written:?}");

        let read = executor.execute("read_file", &json!({"path": "src/a.txt"}), dir.path()).await;
        assert!(read.success);
        assert!(read.result.contains("     2\ttwo"));
    }

    #[test]
    fn test_apply_failure_keeps_output() {
        let result = ToolExecutionResult {
            success: false,
            result: "partial".into(),
            error: Some(ToolError::new(ToolErrorKind::CommandFailed, "exit code 2")),
            meta: None,
        };
        let mut call = ToolCall::new("c1", "run_command", json!({}));
        call.start().unwrap();
        result.apply_to(&mut call).unwrap();
        assert_eq!(call.error.as_deref(), Some("command_failed: exit code 2"));
        assert_eq!(call.result.as_deref(), Some("partial"));
        assert!(result.to_model_text().starts_with("Error [command_failed]"));
    }

    #[test]
    fn test_settings_from_config() {
        let settings = ToolSettings::default();
        assert_eq!(settings.command_timeout, Duration::from_secs(120));
        assert!(settings.restrict_to_workspace);
    }
}
