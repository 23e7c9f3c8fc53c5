use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

pub const RECOGNIZED_PROVIDERS: &[&str] = &["openai", "anthropic", "gemini", "mistral", "alibaba"];

const CONFIG_FILE_NAME: &str = "rho.yaml";
const HOME_CONFIG_FILE_NAME: &str = ".rho.yaml";
const HOME_ENV_FILE_NAME: &str = ".rho.env";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("config name is required")]
    MissingName,
    #[error("at least one provider must be configured")]
    NoProviders,
    #[error("provider {0} must have at least one model")]
    EmptyModelList(String),
    #[error("default_model {0} does not exist in any provider model list")]
    UnknownDefaultModel(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub name: String,
    #[serde(default)]
    pub system: String,
    #[serde(default)]
    pub default_model: String,
    #[serde(default)]
    pub default_temperature: f64,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub output: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub key: String,
}

impl Config {
    /// Loads configuration, populating the environment from `.env` files
    /// first so `${NAME}` placeholders can resolve.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        load_env_files();

        let path = match path {
            Some(path) => path.to_path_buf(),
            None => default_config_path(),
        };

        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;

        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let mut config: Config = serde_yaml::from_str(raw)?;

        config.system = expand_env(&config.system);
        for provider in config.providers.values_mut() {
            provider.key = expand_env(&provider.key);
        }

        for name in config.providers.keys() {
            if !RECOGNIZED_PROVIDERS.contains(&name.as_str()) {
                warn!(provider = %name, "ignoring unrecognized provider in config");
            }
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::MissingName);
        }

        if self.providers.is_empty() {
            return Err(ConfigError::NoProviders);
        }

        for (name, provider) in &self.providers {
            if provider.models.is_empty() {
                return Err(ConfigError::EmptyModelList(name.clone()));
            }
        }

        if !self.default_model.is_empty() {
            let known = self
                .providers
                .values()
                .any(|provider| provider.models.iter().any(|m| m == &self.default_model));
            if !known {
                return Err(ConfigError::UnknownDefaultModel(self.default_model.clone()));
            }
        }

        Ok(())
    }

    /// Provider-specific temperature when set, otherwise the global default.
    pub fn effective_temperature(&self, provider_name: &str) -> f64 {
        self.providers
            .get(provider_name)
            .and_then(|provider| provider.temperature)
            .unwrap_or(self.default_temperature)
    }
}

fn default_config_path() -> PathBuf {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return local;
    }

    match std::env::var_os("HOME") {
        Some(home) => Path::new(&home).join(HOME_CONFIG_FILE_NAME),
        None => local,
    }
}

fn load_env_files() {
    if dotenvy::from_path(".env").is_ok() {
        return;
    }

    if let Some(home) = std::env::var_os("HOME") {
        let _ = dotenvy::from_path(Path::new(&home).join(HOME_ENV_FILE_NAME));
    }
}

/// Expands `${NAME}` placeholders from the process environment. Placeholders
/// whose variable is unset stay literal so key validation can flag them.
pub fn expand_env(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match std::env::var(name) {
                    Ok(value) => output.push_str(&value),
                    Err(_) => {
                        output.push_str("${");
                        output.push_str(name);
                        output.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                output.push_str(&rest[start..]);
                return output;
            }
        }
    }

    output.push_str(rest);
    output
}

/// True when a provider key is unusable: empty, or still an unexpanded
/// `${NAME}` placeholder.
pub fn is_placeholder_key(key: &str) -> bool {
    let key = key.trim();
    key.is_empty() || (key.starts_with("${") && key.ends_with('}'))
}
