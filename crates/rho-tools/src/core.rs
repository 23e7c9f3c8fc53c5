use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use rho_agent_core::{Tool, ToolManifest, ToolOutcome, Toolbox, CORE_TOOLBOX};

use crate::context::ToolContext;

const LIST_TOOLS_MANIFEST: &str = include_str!("manifests/list_tools.json");
const GET_MODEL_VERSION_MANIFEST: &str = include_str!("manifests/get_model_version.json");
const CONTROL_STATE_MANIFEST: &str = include_str!("manifests/control_state.json");

/// The core toolbox stays exposed to the model even when general tools are
/// off, so runtime state can be inspected and toggled in-band.
pub fn core_toolbox(ctx: Arc<ToolContext>) -> Toolbox {
    Toolbox::new(CORE_TOOLBOX, "Runtime introspection and control")
        .add_tool(ListToolsTool::new(ctx.clone()))
        .add_tool(GetModelVersionTool::new(ctx.clone()))
        .add_tool(ControlStateTool::new(ctx))
}

pub struct ListToolsTool {
    manifest: ToolManifest,
    ctx: Arc<ToolContext>,
}

impl ListToolsTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self {
            manifest: ToolManifest::parse(LIST_TOOLS_MANIFEST).expect("embedded manifest is valid"),
            ctx,
        }
    }
}

#[async_trait]
impl Tool for ListToolsTool {
    fn manifest(&self) -> &ToolManifest {
        &self.manifest
    }

    async fn execute(&self, _input: Value, _cancel: &CancellationToken) -> ToolOutcome {
        let catalog = self.ctx.catalog();
        if catalog.is_empty() {
            return ToolOutcome::ok("No tools registered");
        }

        let mut out = String::new();
        for tool in catalog {
            out.push_str(&format!("- {}: {}\n", tool.name, tool.description));
        }
        ToolOutcome::ok(out)
    }
}

pub struct GetModelVersionTool {
    manifest: ToolManifest,
    ctx: Arc<ToolContext>,
}

impl GetModelVersionTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self {
            manifest: ToolManifest::parse(GET_MODEL_VERSION_MANIFEST)
                .expect("embedded manifest is valid"),
            ctx,
        }
    }
}

#[async_trait]
impl Tool for GetModelVersionTool {
    fn manifest(&self) -> &ToolManifest {
        &self.manifest
    }

    async fn execute(&self, _input: Value, _cancel: &CancellationToken) -> ToolOutcome {
        let model = self.ctx.state().current_model();
        if model.is_empty() {
            return ToolOutcome::ok("unknown");
        }
        ToolOutcome::ok(model)
    }
}

pub struct ControlStateTool {
    manifest: ToolManifest,
    ctx: Arc<ToolContext>,
}

impl ControlStateTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self {
            manifest: ToolManifest::parse(CONTROL_STATE_MANIFEST)
                .expect("embedded manifest is valid"),
            ctx,
        }
    }

    fn non_core_tool_names(&self) -> Vec<String> {
        self.ctx
            .catalog()
            .iter()
            .filter(|tool| tool.toolbox != CORE_TOOLBOX)
            .map(|tool| tool.name.clone())
            .collect()
    }

    fn toggle_tools(&self, value: Option<&str>) -> ToolOutcome {
        let current = self.ctx.state().tools_enabled();
        let target = match parse_toggle_value(value) {
            Ok(Some(explicit)) => explicit,
            Ok(None) => !current,
            Err(bad) => return ToolOutcome::error(format!("invalid toggle value '{bad}'")),
        };

        if current == target {
            return ToolOutcome::ok(format!("Tools already {}", state_str(current)));
        }

        self.ctx.state().set_tools_enabled(target);
        ToolOutcome::ok(format!(
            "Tools turned {}. Available tools: {}",
            state_str(target),
            self.non_core_tool_names().join(", ")
        ))
    }

    fn toggle_speech(&self, value: Option<&str>) -> ToolOutcome {
        let current = self.ctx.state().speech_enabled();
        let target = match parse_toggle_value(value) {
            Ok(Some(explicit)) => explicit,
            Ok(None) => !current,
            Err(bad) => return ToolOutcome::error(format!("invalid toggle value '{bad}'")),
        };

        if current == target {
            return ToolOutcome::ok(format!("Speech-to-text already {}", state_str(current)));
        }

        self.ctx.state().set_speech_enabled(target);
        ToolOutcome::ok(format!("Speech-to-text turned {}", state_str(target)))
    }

    fn switch_model(&self, value: Option<&str>) -> ToolOutcome {
        let target = value.unwrap_or("").trim();
        if target.is_empty() {
            return ToolOutcome::error("value must specify model or provider");
        }

        if self.ctx.providers().provider_for(target).is_some() {
            self.ctx.state().set_current_model(target);
            return ToolOutcome::ok(format!("Switched to model {target}"));
        }

        let alias = target.to_ascii_lowercase();
        match self.ctx.configured_models(&alias).and_then(|models| models.first()) {
            Some(model) => {
                self.ctx.state().set_current_model(model.clone());
                ToolOutcome::ok(format!("Switched to provider {target} (model {model})"))
            }
            None => ToolOutcome::error(format!("unknown provider or no models for {target}")),
        }
    }
}

#[async_trait]
impl Tool for ControlStateTool {
    fn manifest(&self) -> &ToolManifest {
        &self.manifest
    }

    async fn execute(&self, input: Value, _cancel: &CancellationToken) -> ToolOutcome {
        #[derive(Deserialize)]
        struct ControlStateInput {
            action: String,
            #[serde(default)]
            value: Option<String>,
        }

        let input: ControlStateInput = match serde_json::from_value(input) {
            Ok(input) => input,
            Err(error) => return ToolOutcome::error(format!("invalid input: {error}")),
        };

        let value = input.value.as_deref();
        match input.action.trim().to_ascii_lowercase().as_str() {
            "toggle_tools" => self.toggle_tools(value),
            "toggle_speech" => self.toggle_speech(value),
            "switch_model" => self.switch_model(value),
            _ => ToolOutcome::error("unknown action"),
        }
    }
}

/// Explicit on/off vocabulary for toggle actions. `None` input means "flip".
fn parse_toggle_value(value: Option<&str>) -> Result<Option<bool>, String> {
    let Some(value) = value else {
        return Ok(None);
    };
    let normalized = value.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "" => Ok(None),
        "on" | "enable" | "true" | "1" => Ok(Some(true)),
        "off" | "disable" | "false" | "0" => Ok(Some(false)),
        _ => Err(normalized),
    }
}

fn state_str(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use rho_agent_core::{
        Config, ProviderRegistry, RuntimeState, Tool, ToolRegistry,
    };
    use rho_ai::{ChatMessage, ChatTurn, Provider, RhoAiError, ToolSpec};

    use crate::context::ToolContext;
    use crate::core::core_toolbox;

    struct NullProvider;

    #[async_trait]
    impl Provider for NullProvider {
        fn name(&self) -> &'static str {
            "null"
        }

        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _tools: &[ToolSpec],
        ) -> Result<ChatTurn, RhoAiError> {
            Ok(ChatTurn::default())
        }

        async fn stream_chat(
            &self,
            _model: &str,
            _messages: &[ChatMessage],
            _temperature: f64,
        ) -> Result<mpsc::Receiver<String>, RhoAiError> {
            let (_sender, receiver) = mpsc::channel(1);
            Ok(receiver)
        }
    }

    fn test_context(tools_enabled: bool) -> (Arc<ToolContext>, Arc<RuntimeState>) {
        let config = Config::from_yaml(
            r#"
name: rho
providers:
  openai:
    models: [gpt-4o, o1-mini]
    key: k
  anthropic:
    models: [claude-3-5-sonnet-20240620]
    key: k
"#,
        )
        .expect("config should parse");

        let state = Arc::new(RuntimeState::new("gpt-4o", tools_enabled, false));
        let providers = Arc::new(ProviderRegistry::with_providers(vec![
            ("gpt-4o".to_string(), Arc::new(NullProvider) as _),
            (
                "claude-3-5-sonnet-20240620".to_string(),
                Arc::new(NullProvider) as _,
            ),
        ]));

        let ctx = ToolContext::new(state.clone(), providers, &config);

        let mut registry = ToolRegistry::new();
        registry
            .register(core_toolbox(ctx.clone()))
            .expect("core toolbox registers");
        ctx.install_catalog(&registry);

        (ctx, state)
    }

    async fn run(ctx: &Arc<ToolContext>, name: &str, input: Value) -> rho_agent_core::ToolOutcome {
        let toolbox = core_toolbox(ctx.clone());
        let tool = toolbox
            .tools()
            .iter()
            .find(|tool| tool.manifest().name == name)
            .expect("tool exists")
            .clone();
        tool.execute(input, &CancellationToken::new()).await
    }

    #[tokio::test]
    async fn list_tools_reports_the_catalog() {
        let (ctx, _state) = test_context(true);
        let outcome = run(&ctx, "list_tools", json!({})).await;
        assert!(!outcome.is_error);
        assert!(outcome.content.contains("- control_state:"));
        assert!(outcome.content.contains("- get_model_version:"));
    }

    #[tokio::test]
    async fn get_model_version_reads_the_state_atom() {
        let (ctx, state) = test_context(true);
        let outcome = run(&ctx, "get_model_version", json!({})).await;
        assert_eq!(outcome.content, "gpt-4o");

        state.set_current_model("claude-3-5-sonnet-20240620");
        let outcome = run(&ctx, "get_model_version", json!({})).await;
        assert_eq!(outcome.content, "claude-3-5-sonnet-20240620");
    }

    #[tokio::test]
    async fn control_state_sets_tools_explicitly() {
        let (ctx, state) = test_context(false);

        let outcome = run(
            &ctx,
            "control_state",
            json!({"action": "toggle_tools", "value": "on"}),
        )
        .await;
        assert!(!outcome.is_error);
        assert!(state.tools_enabled());
        assert!(outcome.content.starts_with("Tools turned on"));

        // Setting the already-active value reports without flipping.
        let outcome = run(
            &ctx,
            "control_state",
            json!({"action": "toggle_tools", "value": "enable"}),
        )
        .await;
        assert_eq!(outcome.content, "Tools already on");
        assert!(state.tools_enabled());
    }

    #[tokio::test]
    async fn control_state_toggles_when_value_is_absent() {
        let (ctx, state) = test_context(false);

        run(&ctx, "control_state", json!({"action": "toggle_tools"})).await;
        assert!(state.tools_enabled());
        run(&ctx, "control_state", json!({"action": "toggle_tools"})).await;
        assert!(!state.tools_enabled());
    }

    #[tokio::test]
    async fn control_state_toggles_speech() {
        let (ctx, state) = test_context(true);

        let outcome = run(
            &ctx,
            "control_state",
            json!({"action": "toggle_speech", "value": "on"}),
        )
        .await;
        assert_eq!(outcome.content, "Speech-to-text turned on");
        assert!(state.speech_enabled());

        let outcome = run(
            &ctx,
            "control_state",
            json!({"action": "toggle_speech", "value": "off"}),
        )
        .await;
        assert_eq!(outcome.content, "Speech-to-text turned off");
        assert!(!state.speech_enabled());
    }

    #[tokio::test]
    async fn control_state_switches_to_an_exact_model() {
        let (ctx, state) = test_context(true);

        let outcome = run(
            &ctx,
            "control_state",
            json!({"action": "switch_model", "value": "claude-3-5-sonnet-20240620"}),
        )
        .await;
        assert!(!outcome.is_error);
        assert_eq!(state.current_model(), "claude-3-5-sonnet-20240620");
    }

    #[tokio::test]
    async fn control_state_switches_by_provider_alias() {
        let (ctx, state) = test_context(true);
        state.set_current_model("gpt-4o");

        let outcome = run(
            &ctx,
            "control_state",
            json!({"action": "switch_model", "value": "anthropic"}),
        )
        .await;
        assert!(!outcome.is_error);
        assert!(outcome
            .content
            .contains("Switched to provider anthropic (model claude-3-5-sonnet-20240620)"));
        assert_eq!(state.current_model(), "claude-3-5-sonnet-20240620");
    }

    #[tokio::test]
    async fn control_state_rejects_unknown_targets_and_actions() {
        let (ctx, state) = test_context(true);

        let outcome = run(
            &ctx,
            "control_state",
            json!({"action": "switch_model", "value": "nonexistent"}),
        )
        .await;
        assert!(outcome.is_error);
        assert_eq!(state.current_model(), "gpt-4o");

        let outcome = run(&ctx, "control_state", json!({"action": "switch_model"})).await;
        assert!(outcome.is_error);

        let outcome = run(&ctx, "control_state", json!({"action": "explode"})).await;
        assert!(outcome.is_error);
        assert_eq!(outcome.content, "unknown action");

        let outcome = run(&ctx, "control_state", json!({"bogus": true})).await;
        assert!(outcome.is_error);
        assert!(outcome.content.starts_with("invalid input"));
    }
}
