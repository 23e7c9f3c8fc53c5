use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// One entry of a conversation. Content is plain text; role is fixed at
/// creation and content is never mutated after append.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
        }
    }
}

/// Wire-facing tool definition handed to a backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// A tool invocation request extracted from a backend response. The input is
/// raw JSON forwarded verbatim to the executor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolUse {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// A local executor's reply to a tool call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolResultMsg {
    pub id: String,
    pub content: String,
    pub is_error: bool,
}

/// Result of one provider round-trip: zero or more assistant messages plus
/// zero or more tool invocation requests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatTurn {
    pub messages: Vec<ChatMessage>,
    pub tool_calls: Vec<ToolUse>,
}

#[derive(Debug, Error)]
pub enum RhoAiError {
    #[error("missing API key")]
    MissingApiKey,
    #[error("provider has no model configured")]
    NoModelConfigured,
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned non-success status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// The narrow capability set every backend adapter implements. Adapters are
/// flat implementations; wire-format differences stay behind this boundary.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<ChatTurn, RhoAiError>;

    /// Streams text deltas for plain conversation. Tool calls are never
    /// surfaced on this path; tool-calling turns go through `chat`.
    async fn stream_chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: f64,
    ) -> Result<mpsc::Receiver<String>, RhoAiError>;

    /// Forwards tool results and continues the conversation. Tool definitions
    /// are not re-sent, so tool recursion is capped at one level per turn.
    async fn send_tool_result(
        &self,
        messages: &[ChatMessage],
        results: &[ToolResultMsg],
    ) -> Result<ChatTurn, RhoAiError> {
        let augmented = append_tool_results(messages, results);
        self.chat(&augmented, &[]).await
    }
}

/// Appends tool results as tool-role messages so `chat` can translate them to
/// whatever the backend accepts for tool output.
pub fn append_tool_results(
    messages: &[ChatMessage],
    results: &[ToolResultMsg],
) -> Vec<ChatMessage> {
    let mut augmented = messages.to_vec();
    for result in results {
        augmented.push(ChatMessage::tool(result.content.clone()));
    }
    augmented
}

/// Resolves the effective system prompt: an in-conversation system message
/// wins over the adapter's configured default.
pub fn resolve_system_prompt(messages: &[ChatMessage], configured: &str) -> String {
    for message in messages {
        if message.role == Role::System && !message.content.is_empty() {
            return message.content.clone();
        }
    }
    configured.to_string()
}

#[cfg(test)]
mod tests {
    use super::{append_tool_results, resolve_system_prompt, ChatMessage, Role, ToolResultMsg};

    #[test]
    fn conversation_system_message_wins_over_configured_prompt() {
        let messages = vec![
            ChatMessage::system("from conversation"),
            ChatMessage::user("hi"),
        ];
        assert_eq!(
            resolve_system_prompt(&messages, "from config"),
            "from conversation"
        );
    }

    #[test]
    fn configured_prompt_applies_when_conversation_has_none() {
        let messages = vec![ChatMessage::user("hi")];
        assert_eq!(resolve_system_prompt(&messages, "from config"), "from config");
    }

    #[test]
    fn tool_results_append_as_tool_role_messages_in_order() {
        let messages = vec![ChatMessage::user("hi")];
        let results = vec![
            ToolResultMsg {
                id: "1".to_string(),
                content: "first".to_string(),
                is_error: false,
            },
            ToolResultMsg {
                id: "2".to_string(),
                content: "second".to_string(),
                is_error: true,
            },
        ];

        let augmented = append_tool_results(&messages, &results);
        assert_eq!(augmented.len(), 3);
        assert_eq!(augmented[1].role, Role::Tool);
        assert_eq!(augmented[1].content, "first");
        assert_eq!(augmented[2].content, "second");
    }
}
