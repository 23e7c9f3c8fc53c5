use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use thiserror::Error;
use tracing::warn;

use rho_ai::{
    AnthropicClient, AnthropicConfig, GeminiClient, GeminiConfig, MistralClient, MistralConfig,
    OpenAiClient, OpenAiConfig, Provider, RhoAiError,
};

use crate::config::{is_placeholder_key, Config};

static REGISTRY: OnceLock<Arc<ProviderRegistry>> = OnceLock::new();

#[derive(Debug, Error)]
pub enum ProviderInitError {
    #[error("{0}")]
    NoProviders(String),
    #[error("failed to construct {provider} client: {source}")]
    Client {
        provider: &'static str,
        source: RhoAiError,
    },
}

/// Maps model id to the adapter responsible for it. Built once from
/// configuration; read-only afterwards.
pub struct ProviderRegistry {
    model_to_provider: BTreeMap<String, Arc<dyn Provider>>,
    skipped: Vec<String>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("models", &self.model_to_provider.keys().collect::<Vec<_>>())
            .field("skipped", &self.skipped)
            .finish()
    }
}

/// Builds the process-wide registry exactly once. Later calls return the
/// already-built registry regardless of the config they pass.
pub fn init_provider_registry(config: &Config) -> Result<Arc<ProviderRegistry>, ProviderInitError> {
    if let Some(existing) = REGISTRY.get() {
        return Ok(existing.clone());
    }

    let built = Arc::new(ProviderRegistry::from_config(config)?);
    Ok(REGISTRY.get_or_init(|| built).clone())
}

impl ProviderRegistry {
    pub fn from_config(config: &Config) -> Result<Self, ProviderInitError> {
        let mut registry = Self {
            model_to_provider: BTreeMap::new(),
            skipped: Vec::new(),
        };

        registry.init_openai(config)?;
        registry.init_anthropic(config)?;
        registry.init_gemini(config)?;
        registry.init_mistral(config)?;
        registry.init_alibaba(config)?;

        if registry.model_to_provider.is_empty() {
            let mut message =
                String::from("No providers initialized. Please set at least one API key:\n");
            for reason in &registry.skipped {
                message.push_str("  - ");
                message.push_str(reason);
                message.push('\n');
            }
            return Err(ProviderInitError::NoProviders(message));
        }

        for reason in &registry.skipped {
            warn!("provider not initialized: {reason}");
        }

        Ok(registry)
    }

    /// Construction path for tests and embedding: a registry over explicit
    /// model/adapter pairs.
    pub fn with_providers(entries: Vec<(String, Arc<dyn Provider>)>) -> Self {
        Self {
            model_to_provider: entries.into_iter().collect(),
            skipped: Vec::new(),
        }
    }

    fn init_openai(&mut self, config: &Config) -> Result<(), ProviderInitError> {
        let Some(provider_config) = config.providers.get("openai") else {
            return Ok(());
        };

        if is_placeholder_key(&provider_config.key) {
            self.skipped
                .push("OpenAI: API key not set (OPENAI_API_KEY environment variable)".to_string());
            return Ok(());
        }

        let temperature = config.effective_temperature("openai");
        for model in &provider_config.models {
            let client = OpenAiClient::openai(OpenAiConfig::new(
                provider_config.key.clone(),
                vec![model.clone()],
                temperature,
                config.system.clone(),
            ))
            .map_err(|source| ProviderInitError::Client {
                provider: "openai",
                source,
            })?;
            self.model_to_provider
                .insert(model.clone(), Arc::new(client));
        }
        Ok(())
    }

    fn init_anthropic(&mut self, config: &Config) -> Result<(), ProviderInitError> {
        let Some(provider_config) = config.providers.get("anthropic") else {
            return Ok(());
        };

        if is_placeholder_key(&provider_config.key) {
            self.skipped.push(
                "Anthropic: API key not set (ANTHROPIC_API_KEY environment variable)".to_string(),
            );
            return Ok(());
        }

        let temperature = config.effective_temperature("anthropic");
        for model in &provider_config.models {
            let client = AnthropicClient::new(AnthropicConfig::new(
                provider_config.key.clone(),
                vec![model.clone()],
                temperature,
                config.system.clone(),
            ))
            .map_err(|source| ProviderInitError::Client {
                provider: "anthropic",
                source,
            })?;
            self.model_to_provider
                .insert(model.clone(), Arc::new(client));
        }
        Ok(())
    }

    fn init_gemini(&mut self, config: &Config) -> Result<(), ProviderInitError> {
        let Some(provider_config) = config.providers.get("gemini") else {
            return Ok(());
        };

        if is_placeholder_key(&provider_config.key) {
            self.skipped
                .push("Gemini: API key not set (GEMINI_API_KEY environment variable)".to_string());
            return Ok(());
        }

        let temperature = config.effective_temperature("gemini");
        for model in &provider_config.models {
            let client = GeminiClient::new(GeminiConfig::new(
                provider_config.key.clone(),
                vec![model.clone()],
                temperature,
                config.system.clone(),
            ))
            .map_err(|source| ProviderInitError::Client {
                provider: "gemini",
                source,
            })?;
            self.model_to_provider
                .insert(model.clone(), Arc::new(client));
        }
        Ok(())
    }

    fn init_mistral(&mut self, config: &Config) -> Result<(), ProviderInitError> {
        let Some(provider_config) = config.providers.get("mistral") else {
            return Ok(());
        };

        if is_placeholder_key(&provider_config.key) {
            self.skipped.push(
                "Mistral: API key not set (MISTRAL_API_KEY environment variable)".to_string(),
            );
            return Ok(());
        }

        let temperature = config.effective_temperature("mistral");
        for model in &provider_config.models {
            let client = MistralClient::new(MistralConfig::new(
                provider_config.key.clone(),
                vec![model.clone()],
                temperature,
                config.system.clone(),
            ))
            .map_err(|source| ProviderInitError::Client {
                provider: "mistral",
                source,
            })?;
            self.model_to_provider
                .insert(model.clone(), Arc::new(client));
        }
        Ok(())
    }

    fn init_alibaba(&mut self, config: &Config) -> Result<(), ProviderInitError> {
        let Some(provider_config) = config.providers.get("alibaba") else {
            return Ok(());
        };

        if is_placeholder_key(&provider_config.key) {
            self.skipped.push(
                "Alibaba: API key not set (ALIBABA_API_KEY environment variable)".to_string(),
            );
            return Ok(());
        }

        let temperature = config.effective_temperature("alibaba");
        for model in &provider_config.models {
            let client = OpenAiClient::alibaba(OpenAiConfig::new(
                provider_config.key.clone(),
                vec![model.clone()],
                temperature,
                config.system.clone(),
            ))
            .map_err(|source| ProviderInitError::Client {
                provider: "alibaba",
                source,
            })?;
            self.model_to_provider
                .insert(model.clone(), Arc::new(client));
        }
        Ok(())
    }

    pub fn provider_for(&self, model: &str) -> Option<Arc<dyn Provider>> {
        self.model_to_provider.get(model).cloned()
    }

    /// Deterministic: the lexicographically smallest registered model id.
    pub fn first_model(&self) -> Option<String> {
        self.model_to_provider.keys().next().cloned()
    }

    pub fn models(&self) -> Vec<String> {
        self.model_to_provider.keys().cloned().collect()
    }

    /// Configured providers mapped to the subset of their models that
    /// actually registered.
    pub fn models_by_provider(&self, config: &Config) -> BTreeMap<String, Vec<String>> {
        let mut by_provider = BTreeMap::new();
        for (name, provider_config) in &config.providers {
            let available: Vec<String> = provider_config
                .models
                .iter()
                .filter(|model| self.model_to_provider.contains_key(*model))
                .cloned()
                .collect();
            if !available.is_empty() {
                by_provider.insert(name.clone(), available);
            }
        }
        by_provider
    }

    pub fn initialized_providers(&self, config: &Config) -> BTreeMap<String, bool> {
        let mut status = BTreeMap::new();
        for (name, provider_config) in &config.providers {
            let initialized = provider_config
                .models
                .iter()
                .any(|model| self.model_to_provider.contains_key(model));
            status.insert(name.clone(), initialized);
        }
        status
    }

    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Config;

    use super::{ProviderInitError, ProviderRegistry};

    fn config_with_keys(openai_key: &str, anthropic_key: &str) -> Config {
        let yaml = format!(
            r#"
name: rho
providers:
  openai:
    models: [gpt-4o, o1-mini]
    key: "{openai_key}"
  anthropic:
    models: [claude-3-5-sonnet-20240620]
    key: "{anthropic_key}"
"#
        );
        Config::from_yaml(&yaml).expect("config should parse")
    }

    #[test]
    fn registers_models_for_providers_with_real_keys() {
        let config = config_with_keys("sk-openai", "sk-anthropic");
        let registry = ProviderRegistry::from_config(&config).expect("registry should build");

        assert_eq!(registry.models().len(), 3);
        assert_eq!(
            registry
                .provider_for("gpt-4o")
                .expect("gpt-4o registered")
                .name(),
            "openai"
        );
        assert_eq!(
            registry
                .provider_for("claude-3-5-sonnet-20240620")
                .expect("claude registered")
                .name(),
            "anthropic"
        );
        assert!(registry.provider_for("unknown-model").is_none());
        assert!(registry.skipped().is_empty());
    }

    #[test]
    fn skips_placeholder_keys_and_records_reasons() {
        let config = config_with_keys("${OPENAI_API_KEY}", "sk-anthropic");
        let registry = ProviderRegistry::from_config(&config).expect("registry should build");

        assert_eq!(registry.models().len(), 1);
        assert_eq!(registry.skipped().len(), 1);
        assert!(registry.skipped()[0].contains("OpenAI"));

        let status = registry.initialized_providers(&config);
        assert_eq!(status.get("openai"), Some(&false));
        assert_eq!(status.get("anthropic"), Some(&true));
    }

    #[test]
    fn fails_with_consolidated_message_when_nothing_initializes() {
        let config = config_with_keys("${OPENAI_API_KEY}", "");
        let error = ProviderRegistry::from_config(&config)
            .expect_err("empty registry must fail initialization");

        let ProviderInitError::NoProviders(message) = error else {
            panic!("expected NoProviders error");
        };
        assert!(message.contains("OpenAI"));
        assert!(message.contains("Anthropic"));
    }

    #[test]
    fn first_model_is_lexicographically_deterministic() {
        let config = config_with_keys("sk-openai", "sk-anthropic");
        let registry = ProviderRegistry::from_config(&config).expect("registry should build");
        assert_eq!(
            registry.first_model().as_deref(),
            Some("claude-3-5-sonnet-20240620")
        );
    }

    #[test]
    fn models_by_provider_only_lists_registered_models() {
        let config = config_with_keys("${OPENAI_API_KEY}", "sk-anthropic");
        let registry = ProviderRegistry::from_config(&config).expect("registry should build");

        let by_provider = registry.models_by_provider(&config);
        assert!(!by_provider.contains_key("openai"));
        assert_eq!(
            by_provider.get("anthropic"),
            Some(&vec!["claude-3-5-sonnet-20240620".to_string()])
        );
    }
}
