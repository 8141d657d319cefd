use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use quill_core::adapter::AdapterConfig;
use quill_core::config::Config;

use crate::presets;
use crate::{ChatAdapter, GenericAdapter, RetryPolicy};

/// Adapter configs by id. Injected wherever adapters are resolved.
#[derive(Debug, Clone, Default)]
pub struct AdapterRegistry {
    configs: BTreeMap<String, AdapterConfig>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in preset.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for config in presets::builtin() {
            registry.register(config);
        }
        registry
    }

    /// Built-ins overlaid with the adapters declared in `config`.
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::with_builtin();
        for adapter in config.custom_adapters() {
            if registry.register(adapter.clone()).is_some() {
                debug!(adapter = %adapter.id, "Custom adapter overrides built-in");
            }
        }
        registry
    }

    /// Add or replace a config. Returns the replaced one.
    pub fn register(&mut self, config: AdapterConfig) -> Option<AdapterConfig> {
        self.configs.insert(config.id.clone(), config)
    }

    pub fn get(&self, id: &str) -> Option<&AdapterConfig> {
        self.configs.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.configs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    /// Instantiate the adapter for `id`.
    pub fn build(&self, id: &str, retry: RetryPolicy) -> Option<Arc<dyn ChatAdapter>> {
        let config = self.get(id)?.clone();
        Some(Arc::new(GenericAdapter::new(config).with_retry(retry)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry() {
        let registry = AdapterRegistry::with_builtin();
        assert_eq!(registry.len(), 6);
        assert!(registry.get("anthropic").is_some());
        assert!(registry.get("nope").is_none());
        let adapter = registry.build("gemini", RetryPolicy::none()).unwrap();
        assert_eq!(adapter.id(), "gemini");
    }

    #[test]
    fn test_config_adapters_override_and_add() {
        let mut custom = presets::openai();
        custom.request.base_url = "http://proxy.local".into();
        let mut extra = presets::ollama();
        extra.id = "lmstudio".into();

        let config = Config {
            adapters: Some(vec![custom, extra]),
            ..Config::default()
        };
        let registry = AdapterRegistry::from_config(&config);
        assert_eq!(registry.len(), 7);
        assert_eq!(registry.get("openai").unwrap().request.base_url, "http://proxy.local");
        assert!(registry.ids().any(|id| id == "lmstudio"));
    }
}
