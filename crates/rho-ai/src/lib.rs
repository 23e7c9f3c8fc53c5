mod anthropic;
mod gemini;
mod mistral;
mod openai;
mod retry;
mod types;

pub use anthropic::{AnthropicClient, AnthropicConfig, ANTHROPIC_API_BASE};
pub use gemini::{GeminiClient, GeminiConfig, GEMINI_API_BASE};
pub use mistral::{MistralClient, MistralConfig, MISTRAL_API_BASE};
pub use openai::{
    is_fixed_parameter_model, OpenAiClient, OpenAiConfig, ALIBABA_API_BASE, OPENAI_API_BASE,
};
pub use types::{
    append_tool_results, resolve_system_prompt, ChatMessage, ChatTurn, Provider, RhoAiError, Role,
    ToolResultMsg, ToolSpec, ToolUse,
};
