use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use rho_agent_core::{Config, ProviderRegistry, RuntimeState, ToolRegistry};

/// Shared state handed to the built-in tools: the runtime flags, the provider
/// registry, the configured provider model lists, and (after registration
/// completes) a summary of the full tool catalog.
pub struct ToolContext {
    state: Arc<RuntimeState>,
    providers: Arc<ProviderRegistry>,
    models_by_provider: BTreeMap<String, Vec<String>>,
    catalog: OnceLock<Vec<ToolSummary>>,
}

#[derive(Debug, Clone)]
pub struct ToolSummary {
    pub name: String,
    pub description: String,
    pub toolbox: String,
}

impl ToolContext {
    pub fn new(
        state: Arc<RuntimeState>,
        providers: Arc<ProviderRegistry>,
        config: &Config,
    ) -> Arc<Self> {
        let models_by_provider = config
            .providers
            .iter()
            .map(|(name, provider)| (name.clone(), provider.models.clone()))
            .collect();

        Arc::new(Self {
            state,
            providers,
            models_by_provider,
            catalog: OnceLock::new(),
        })
    }

    pub fn state(&self) -> &RuntimeState {
        &self.state
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Configured model list for a provider key, used for alias switching.
    pub fn configured_models(&self, provider: &str) -> Option<&[String]> {
        self.models_by_provider
            .get(provider)
            .map(|models| models.as_slice())
    }

    /// One-shot: records the registered tool catalog once the registry is
    /// fully built. Later calls are ignored.
    pub fn install_catalog(&self, registry: &ToolRegistry) {
        let summaries = registry
            .toolboxes()
            .iter()
            .flat_map(|toolbox| {
                toolbox.tools().iter().map(|tool| ToolSummary {
                    name: tool.manifest().name.clone(),
                    description: tool.manifest().description.clone(),
                    toolbox: toolbox.name().to_string(),
                })
            })
            .collect();
        let _ = self.catalog.set(summaries);
    }

    pub fn catalog(&self) -> &[ToolSummary] {
        self.catalog.get().map(Vec::as_slice).unwrap_or_default()
    }
}
