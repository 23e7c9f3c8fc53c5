use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use rho_ai::{ChatMessage, ToolResultMsg, ToolUse};

use crate::providers::ProviderRegistry;
use crate::registry::{ToolOutcome, ToolRegistry};
use crate::state::RuntimeState;

const MAX_CALL_LABEL_CHARS: usize = 60;
const MAX_TOOL_OUTPUT_LINES: usize = 40;
const MAX_TOOL_OUTPUT_CHARS: usize = 4000;
const CONTINUATION_INDENT: &str = "              ";

/// Outcome of one user turn. A turn emits exactly one completed output or
/// reports cancellation; it never emits partial results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnResult {
    Completed { text: String, is_error: bool },
    Cancelled,
}

impl TurnResult {
    fn text(text: String) -> Self {
        Self::Completed {
            text,
            is_error: false,
        }
    }

    fn error(message: impl std::fmt::Display) -> Self {
        Self::Completed {
            text: format!("Error: {message}"),
            is_error: true,
        }
    }
}

/// Drives one conversation: invokes the selected provider, executes returned
/// tool calls against the registry, feeds results back, and produces a single
/// consolidated assistant output per turn.
pub struct Orchestrator {
    conversation: Vec<ChatMessage>,
    providers: Arc<ProviderRegistry>,
    tools: Arc<ToolRegistry>,
    state: Arc<RuntimeState>,
    system_prompt: String,
}

impl Orchestrator {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        tools: Arc<ToolRegistry>,
        state: Arc<RuntimeState>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            conversation: Vec::new(),
            providers,
            tools,
            state,
            system_prompt: system_prompt.into(),
        }
    }

    pub fn conversation(&self) -> &[ChatMessage] {
        &self.conversation
    }

    pub async fn run_turn(&mut self, input: &str, cancel: &CancellationToken) -> TurnResult {
        let checkpoint = self.conversation.len();
        self.conversation.push(ChatMessage::user(input));

        // Resolved per turn so model switches take effect immediately.
        let model = self.state.current_model();
        let Some(provider) = self.providers.provider_for(&model) else {
            return TurnResult::error(format!("no provider registered for model {model}"));
        };

        // With tools disabled the core toolbox stays exposed, so the model
        // can still introspect state and re-enable tools in-band.
        let tool_specs = if self.state.tools_enabled() {
            self.tools.all_specs()
        } else {
            self.tools.core_specs()
        };

        let mut outgoing = Vec::with_capacity(self.conversation.len() + 1);
        outgoing.push(ChatMessage::system(self.system_prompt.clone()));
        outgoing.extend(self.conversation.iter().cloned());

        let turn = tokio::select! {
            result = provider.chat(&outgoing, &tool_specs) => result,
            _ = cancel.cancelled() => {
                self.conversation.truncate(checkpoint);
                return TurnResult::Cancelled;
            }
        };

        let turn = match turn {
            Ok(turn) => turn,
            Err(error) => return TurnResult::error(error),
        };

        if turn.tool_calls.is_empty() {
            let text = concat_contents(&turn.messages);
            self.conversation.extend(turn.messages);
            return TurnResult::text(text);
        }

        let mut results: Vec<ToolResultMsg> = Vec::with_capacity(turn.tool_calls.len());
        let mut used: Vec<String> = Vec::new();

        for call in &turn.tool_calls {
            if cancel.is_cancelled() {
                self.conversation.truncate(checkpoint);
                return TurnResult::Cancelled;
            }

            match self.tools.get(&call.name) {
                None => {
                    debug!(tool = %call.name, "model requested unknown tool");
                    results.push(ToolResultMsg {
                        id: call.id.clone(),
                        content: "tool not found".to_string(),
                        is_error: true,
                    });
                }
                Some(tool) => {
                    let outcome: ToolOutcome = tool.execute(call.input.clone(), cancel).await;
                    results.push(ToolResultMsg {
                        id: call.id.clone(),
                        content: outcome.content,
                        is_error: outcome.is_error,
                    });
                    used.push(format_call_label(call));
                }
            }
        }

        let mut augmented = outgoing;
        augmented.extend(turn.messages.iter().cloned());

        let follow_up = tokio::select! {
            result = provider.send_tool_result(&augmented, &results) => result,
            _ = cancel.cancelled() => {
                self.conversation.truncate(checkpoint);
                return TurnResult::Cancelled;
            }
        };

        let follow_up = match follow_up {
            Ok(follow_up) => follow_up,
            Err(error) => return TurnResult::error(error),
        };

        if !follow_up.tool_calls.is_empty() {
            // One level of tool calls per user turn; anything further is
            // dropped for this turn.
            debug!(
                count = follow_up.tool_calls.len(),
                "ignoring nested tool calls in follow-up response"
            );
        }

        let mut consolidated = format!("[Used tools: {}]", used.join(", "));
        if self.state.tools_output_visible() {
            consolidated.push('\n');
            consolidated.push_str(&format_tool_outputs(&results));
        }

        let follow_up_text = concat_contents(&follow_up.messages);
        let emitted = if follow_up_text.is_empty() {
            consolidated
        } else {
            format!("{consolidated}\n{follow_up_text}")
        };

        self.conversation.extend(turn.messages);
        for result in &results {
            self.conversation.push(ChatMessage::tool(result.content.clone()));
        }
        self.conversation.extend(follow_up.messages);

        TurnResult::text(emitted)
    }
}

fn concat_contents(messages: &[ChatMessage]) -> String {
    let mut text = String::new();
    for message in messages {
        if message.content.is_empty() {
            continue;
        }
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(&message.content);
    }
    text
}

/// `name({"k":"v"})` with the serialized input capped at 60 characters.
fn format_call_label(call: &ToolUse) -> String {
    match &call.input {
        Value::Object(map) if !map.is_empty() => {
            let serialized = Value::Object(map.clone()).to_string();
            format!(
                "{}({})",
                call.name,
                truncate_chars(&serialized, MAX_CALL_LABEL_CHARS)
            )
        }
        _ => call.name.clone(),
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max.saturating_sub(3)).collect();
    truncated.push_str("...");
    truncated
}

fn format_tool_outputs(results: &[ToolResultMsg]) -> String {
    let mut lines = Vec::new();
    for result in results {
        let prefix = if result.is_error {
            "(tool error) "
        } else {
            "(tool result) "
        };

        let trimmed = result.content.trim();
        if trimmed.is_empty() {
            lines.push(prefix.trim_end().to_string());
            continue;
        }

        for (index, line) in trimmed.lines().enumerate() {
            if index == 0 {
                lines.push(format!("{prefix}{line}"));
            } else {
                lines.push(format!("{CONTINUATION_INDENT}{line}"));
            }
        }
    }

    if lines.len() > MAX_TOOL_OUTPUT_LINES {
        let dropped = lines.len() - MAX_TOOL_OUTPUT_LINES;
        lines.truncate(MAX_TOOL_OUTPUT_LINES);
        lines.push(format!("... ({dropped} more lines truncated)"));
    }

    let mut combined = lines.join("\n");
    if combined.chars().count() > MAX_TOOL_OUTPUT_CHARS {
        combined = combined.chars().take(MAX_TOOL_OUTPUT_CHARS).collect();
        combined.push_str("\n... (output truncated)");
    }
    combined
}
