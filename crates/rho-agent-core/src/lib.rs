mod config;
mod orchestrator;
mod providers;
mod registry;
mod schema;
mod state;

pub use config::{
    expand_env, is_placeholder_key, Config, ConfigError, ProviderConfig, ToolsConfig,
    RECOGNIZED_PROVIDERS,
};
pub use orchestrator::{Orchestrator, TurnResult};
pub use providers::{init_provider_registry, ProviderInitError, ProviderRegistry};
pub use registry::{
    RegistryError, Tool, ToolManifest, ToolOutcome, ToolRegistry, Toolbox, CORE_TOOLBOX,
};
pub use schema::{schema_accepts, validate_manifest, SchemaError};
pub use state::RuntimeState;
