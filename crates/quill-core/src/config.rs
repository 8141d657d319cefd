//! Configuration loading and validation.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::adapter::AdapterConfig;
use crate::error::QuillError;

/// Top-level Quill configuration, read from `~/.quill/config.json` (JSON5).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub models: Option<ModelsConfig>,

    /// Custom adapters; an entry whose id matches a built-in replaces it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adapters: Option<Vec<AdapterConfig>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression: Option<CompressionConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<SchedulerConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Provider id from `models.providers`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tool_loops: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,

    /// Extra instructions appended to the generated system prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Run a turn's read-only tool calls concurrently.
    #[serde(default)]
    pub parallel_read_only: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub providers: Option<Vec<ProviderConfig>>,
}

/// A configured model endpoint: which adapter speaks to it, and with what key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    /// Adapter id; defaults to the provider id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adapter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl ProviderConfig {
    /// Resolve the API key: check `api_key` field first, then `api_key_env` environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }

    pub fn adapter_id(&self) -> &str {
        self.adapter.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Tail-truncation limit for command output.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    /// Extra dotfiles shown by directory listings.
    #[serde(default)]
    pub dotfile_allowlist: Vec<String>,

    /// Reject resolved paths outside the workspace, absolute ones included.
    /// Turn off to let absolute paths through as given.
    #[serde(default = "default_true")]
    pub restrict_to_workspace: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout(),
            max_output_bytes: default_max_output_bytes(),
            dotfile_allowlist: Vec::new(),
            restrict_to_workspace: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_command_timeout() -> u64 {
    120
}

fn default_max_output_bytes() -> usize {
    50_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// Context budget in characters.
    #[serde(default = "default_budget_chars")]
    pub budget_chars: usize,

    #[serde(default = "default_keep_recent_turns")]
    pub keep_recent_turns: usize,

    /// Refine summaries with a model call.
    #[serde(default)]
    pub llm_summary: bool,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            budget_chars: default_budget_chars(),
            keep_recent_turns: default_keep_recent_turns(),
            llm_summary: false,
        }
    }
}

fn default_budget_chars() -> usize {
    400_000
}

fn default_keep_recent_turns() -> usize {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Skip tasks whose dependencies failed instead of leaving them blocked.
    #[serde(default = "default_true")]
    pub auto_skip: bool,

    #[serde(default)]
    pub max_retries: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            auto_skip: true,
            max_retries: 0,
        }
    }
}

fn default_max_concurrency() -> usize {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_max")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_retry_max(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

fn default_retry_max() -> u32 {
    2
}

fn default_base_delay_ms() -> u64 {
    500
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Tool names that never prompt.
    #[serde(default)]
    pub auto_approve: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "quill_providers=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

static ENV_VAR_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\$\{([^}]+)\}").expect("static regex"));

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    ENV_VAR_RE
        .replace_all(input, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    ///
    /// A missing file yields the default config.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    /// Parse config text (JSON5) after env substitution.
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        let substituted = substitute_env_vars(raw);
        json5::from_str(&substituted).map_err(|e| QuillError::Config(e.to_string()))
    }

    /// Default config file location.
    pub fn default_path() -> PathBuf {
        data_dir().join("config.json")
    }

    fn agent(&self) -> Option<&AgentConfig> {
        self.agent.as_ref()
    }

    /// Resolve the workspace directory, falling back to the current directory.
    pub fn workspace_dir(&self) -> PathBuf {
        self.agent()
            .and_then(|a| a.workspace.as_ref())
            .map(|w| PathBuf::from(shellexpand::tilde(w).as_ref()))
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }

    /// Model name: explicit agent setting, else the active provider's default.
    pub fn model(&self) -> Option<String> {
        self.agent()
            .and_then(|a| a.model.clone())
            .or_else(|| self.active_provider().and_then(|p| p.default_model.clone()))
    }

    pub fn max_tokens(&self) -> u32 {
        self.agent().and_then(|a| a.max_tokens).unwrap_or(4096)
    }

    pub fn max_tool_loops(&self) -> u32 {
        self.agent().and_then(|a| a.max_tool_loops).unwrap_or(25)
    }

    pub fn temperature(&self) -> Option<f64> {
        self.agent().and_then(|a| a.temperature)
    }

    pub fn parallel_read_only(&self) -> bool {
        self.agent().is_some_and(|a| a.parallel_read_only)
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.agent().and_then(|a| a.system_prompt.as_deref())
    }

    pub fn tools(&self) -> ToolsConfig {
        self.tools.clone().unwrap_or_default()
    }

    pub fn compression(&self) -> CompressionConfig {
        self.compression.clone().unwrap_or_default()
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        self.scheduler.clone().unwrap_or_default()
    }

    pub fn retry(&self) -> RetryConfig {
        self.retry.clone().unwrap_or_default()
    }

    pub fn auto_approve(&self) -> &[String] {
        self.approval
            .as_ref()
            .map(|a| a.auto_approve.as_slice())
            .unwrap_or_default()
    }

    pub fn custom_adapters(&self) -> &[AdapterConfig] {
        self.adapters.as_deref().unwrap_or_default()
    }

    fn providers(&self) -> &[ProviderConfig] {
        self.models
            .as_ref()
            .and_then(|m| m.providers.as_deref())
            .unwrap_or_default()
    }

    /// Find a provider config by id.
    pub fn provider(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers().iter().find(|p| p.id == id)
    }

    /// The provider named by `agent.provider`, or the first configured one.
    pub fn active_provider(&self) -> Option<&ProviderConfig> {
        match self.agent().and_then(|a| a.provider.as_deref()) {
            Some(id) => self.provider(id),
            None => self.providers().first(),
        }
    }

    /// Get a config value by dotted path (e.g. "agent.model", "scheduler.max_concurrency").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Validate config, returning (warnings, errors).
    ///
    /// `known_adapters` are ids available before custom adapters are added.
    pub fn validate(&self, known_adapters: &[&str]) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        let mut adapter_ids: HashSet<&str> = known_adapters.iter().copied().collect();
        let mut seen = HashSet::new();
        for adapter in self.custom_adapters() {
            if !seen.insert(adapter.id.as_str()) {
                errors.push(format!("Adapter '{}' is defined more than once", adapter.id));
            }
            if !adapter.request.body_template.is_object() {
                errors.push(format!(
                    "Adapter '{}' bodyTemplate must be a JSON object",
                    adapter.id
                ));
            }
            adapter_ids.insert(adapter.id.as_str());
        }

        for p in self.providers() {
            if !adapter_ids.contains(p.adapter_id()) {
                errors.push(format!(
                    "Provider '{}' references unknown adapter '{}'",
                    p.id,
                    p.adapter_id()
                ));
            }
            // local servers run without keys
            if p.adapter_id() != "ollama" && p.resolve_api_key().is_none() {
                warnings.push(format!("Provider '{}' has no API key configured", p.id));
            }
        }

        if let Some(id) = self.agent().and_then(|a| a.provider.as_deref()) {
            if self.provider(id).is_none() {
                errors.push(format!("agent.provider '{id}' is not in models.providers"));
            }
        }

        if self.scheduler().max_concurrency == 0 {
            errors.push("scheduler.max_concurrency cannot be 0".to_string());
        }

        let compression = self.compression();
        if compression.budget_chars == 0 {
            errors.push("compression.budget_chars cannot be 0".to_string());
        }
        if compression.keep_recent_turns == 0 {
            warnings.push("compression.keep_recent_turns is 0; every turn may be compacted".into());
        }

        if let Some(logging) = &self.logging {
            if !matches!(logging.format.as_str(), "plain" | "json") {
                warnings.push(format!(
                    "Unknown logging.format '{}', using plain",
                    logging.format
                ));
            }
        }

        let workspace = self.workspace_dir();
        if !workspace.is_dir() {
            warnings.push(format!(
                "Workspace directory does not exist: {}",
                workspace.display()
            ));
        }

        (warnings, errors)
    }
}

/// Base directory for Quill data: `~/.quill/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".quill")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_substitution() {
        // SAFETY: test-only, unique variable name
        unsafe { std::env::set_var("TEST_QUILL_KEY", "sk-test-123") };
        let input = r#"{"key": "${TEST_QUILL_KEY}", "other": "plain"}"#;
        let result = substitute_env_vars(input);
        assert!(result.contains("sk-test-123"));
        assert!(result.contains("plain"));
        unsafe { std::env::remove_var("TEST_QUILL_KEY") };
    }

    #[test]
    fn test_env_var_missing() {
        let input = r#"{"key": "${NONEXISTENT_VAR_QUILL_TEST}"}"#;
        let result = substitute_env_vars(input);
        assert_eq!(result, r#"{"key": ""}"#);
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.max_tokens(), 4096);
        assert_eq!(config.max_tool_loops(), 25);
        assert_eq!(config.scheduler().max_concurrency, 3);
        assert!(config.scheduler().auto_skip);
        assert_eq!(config.tools().command_timeout_secs, 120);
        assert!(config.model().is_none());
        assert!(!config.parallel_read_only());
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("nope.json")).unwrap();
        assert!(config.agent.is_none());
    }

    #[test]
    fn test_load_json5_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                // comments are allowed
                agent: { provider: "local", max_tool_loops: 8 },
                models: { providers: [
                    { id: "cloud", default_model: "gpt-4o" },
                    { id: "local", adapter: "ollama", default_model: "qwen2.5-coder" },
                ]},
                compression: { budget_chars: 1000 },
            }"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.max_tool_loops(), 8);
        assert_eq!(config.model().as_deref(), Some("qwen2.5-coder"));
        assert_eq!(config.active_provider().unwrap().adapter_id(), "ollama");
        assert_eq!(config.provider("cloud").unwrap().adapter_id(), "cloud");
        assert_eq!(config.compression().budget_chars, 1000);
        assert_eq!(config.compression().keep_recent_turns, 4);
        assert!(config.tools().restrict_to_workspace);
    }

    #[test]
    fn test_workspace_restriction_opt_out() {
        let config = Config::parse(r#"{ tools: { restrict_to_workspace: false } }"#).unwrap();
        let tools = config.tools();
        assert!(!tools.restrict_to_workspace);
        assert_eq!(tools.command_timeout_secs, 120);
    }

    #[test]
    fn test_invalid_config_is_config_error() {
        let err = Config::parse("{ agent: ").unwrap_err();
        assert!(matches!(err, QuillError::Config(_)));
    }

    #[test]
    fn test_provider_resolve_api_key() {
        // SAFETY: test-only, unique variable name
        unsafe { std::env::set_var("TEST_QUILL_API_KEY", "from-env") };
        let provider = ProviderConfig {
            id: "test".into(),
            adapter: None,
            api_key_env: Some("TEST_QUILL_API_KEY".into()),
            api_key: None,
            base_url: None,
            default_model: None,
        };
        assert_eq!(provider.resolve_api_key(), Some("from-env".into()));

        let provider2 = ProviderConfig {
            api_key: Some("direct-key".into()),
            ..provider
        };
        // Direct key takes priority
        assert_eq!(provider2.resolve_api_key(), Some("direct-key".into()));
        unsafe { std::env::remove_var("TEST_QUILL_API_KEY") };
    }

    #[test]
    fn test_logging_config_defaults() {
        let config = Config::parse(r#"{ "logging": {} }"#).unwrap();
        let logging = config.logging.expect("logging should be present");
        assert_eq!(logging.format, "plain");
        assert!(logging.level.is_none());
        assert_eq!(logging.output, "stderr");
        assert!(logging.filters.is_empty());
    }

    #[test]
    fn test_logging_config_filters() {
        let config = Config::parse(
            r#"{ "logging": { "format": "json", "filters": ["quill_providers=debug", "quill_agent=trace"] } }"#,
        )
        .unwrap();
        let logging = config.logging.expect("logging should be present");
        assert_eq!(logging.format, "json");
        assert_eq!(logging.filters, vec!["quill_providers=debug", "quill_agent=trace"]);
    }

    #[test]
    fn test_validate_missing_api_key_warns() {
        let config = Config::parse(r#"{ models: { providers: [{ id: "openai" }] } }"#).unwrap();
        let (warnings, errors) = config.validate(&["openai"]);
        assert!(
            warnings.iter().any(|w| w.contains("openai") && w.contains("API key")),
            "expected a missing-key warning, got: {warnings:?}"
        );
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    }

    #[test]
    fn test_validate_unknown_adapter_errors() {
        let config = Config::parse(
            r#"{ agent: { provider: "missing" }, models: { providers: [{ id: "x", adapter: "nope", api_key: "k" }] }, scheduler: { max_concurrency: 0 } }"#,
        )
        .unwrap();
        let (_warnings, errors) = config.validate(&["openai"]);
        assert!(errors.iter().any(|e| e.contains("unknown adapter 'nope'")));
        assert!(errors.iter().any(|e| e.contains("agent.provider 'missing'")));
        assert!(errors.iter().any(|e| e.contains("max_concurrency")));
    }

    #[test]
    fn test_get_path() {
        let config = Config::parse(r#"{ scheduler: { max_concurrency: 5 } }"#).unwrap();
        assert_eq!(
            config.get_path("scheduler.max_concurrency"),
            Some(serde_json::json!(5))
        );
        assert!(config.get_path("scheduler.nope").is_none());
    }
}
