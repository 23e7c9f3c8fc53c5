use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use rho_ai::ToolSpec;

use crate::schema::{validate_manifest, SchemaError};

pub const CORE_TOOLBOX: &str = "core";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to parse tool manifest: {0}")]
    ManifestParse(#[from] serde_json::Error),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("toolbox '{0}' is already registered")]
    DuplicateToolbox(String),
    #[error("tool '{0}' is already registered")]
    DuplicateTool(String),
}

/// The embedded JSON document that is the authoritative source for a tool's
/// name, description and input schema.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolManifest {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    #[serde(default)]
    pub examples: Vec<Value>,
}

impl ToolManifest {
    pub fn parse(raw: &str) -> Result<Self, RegistryError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }
}

/// Outcome of one tool execution. Executors fold every failure into
/// `is_error=true`; nothing escapes the tool loop except cancellation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn manifest(&self) -> &ToolManifest;

    /// Runs the tool on raw decoded input. Input arrives verbatim from the
    /// model; rejecting malformed input is the executor's job.
    async fn execute(&self, input: Value, cancel: &CancellationToken) -> ToolOutcome;
}

/// A named group of related tools.
pub struct Toolbox {
    name: String,
    description: String,
    tools: Vec<Arc<dyn Tool>>,
}

impl Toolbox {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            tools: Vec::new(),
        }
    }

    pub fn add_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.push(Arc::new(tool));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn tools(&self) -> &[Arc<dyn Tool>] {
        &self.tools
    }
}

/// Process-wide tool catalog. Registration happens once at startup; lookups
/// afterwards are read-only and safe to share.
#[derive(Default)]
pub struct ToolRegistry {
    toolboxes: Vec<Toolbox>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a toolbox, enforcing name uniqueness and validating every
    /// tool's manifest schema. Violations abort startup.
    pub fn register(&mut self, toolbox: Toolbox) -> Result<(), RegistryError> {
        if self.toolboxes.iter().any(|tb| tb.name() == toolbox.name()) {
            return Err(RegistryError::DuplicateToolbox(toolbox.name().to_string()));
        }

        for tool in toolbox.tools() {
            let manifest = tool.manifest();
            if self.get(&manifest.name).is_some()
                || toolbox
                    .tools()
                    .iter()
                    .filter(|other| other.manifest().name == manifest.name)
                    .count()
                    > 1
            {
                return Err(RegistryError::DuplicateTool(manifest.name.clone()));
            }

            validate_manifest(&manifest.name, &manifest.description, &manifest.input_schema)?;
        }

        self.toolboxes.push(toolbox);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.toolboxes
            .iter()
            .flat_map(|tb| tb.tools().iter())
            .find(|tool| tool.manifest().name == name)
            .cloned()
    }

    pub fn all_specs(&self) -> Vec<ToolSpec> {
        self.toolboxes
            .iter()
            .flat_map(|tb| tb.tools().iter())
            .map(|tool| tool.manifest().spec())
            .collect()
    }

    /// Specs of the core toolbox only. These stay exposed to the model even
    /// when general tools are disabled.
    pub fn core_specs(&self) -> Vec<ToolSpec> {
        self.toolboxes
            .iter()
            .filter(|tb| tb.name() == CORE_TOOLBOX)
            .flat_map(|tb| tb.tools().iter())
            .map(|tool| tool.manifest().spec())
            .collect()
    }

    pub fn toolboxes(&self) -> &[Toolbox] {
        &self.toolboxes
    }
}
