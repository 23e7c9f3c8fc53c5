use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::{
    retry::{
        is_retryable_http_error, new_request_id, next_backoff_ms, should_retry_status, MAX_RETRIES,
    },
    ChatMessage, ChatTurn, Provider, RhoAiError, Role, ToolSpec, ToolUse,
};

pub const MISTRAL_API_BASE: &str = "https://api.mistral.ai/v1";

const STREAM_CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct MistralConfig {
    pub api_base: String,
    pub api_key: String,
    pub request_timeout_ms: u64,
    pub models: Vec<String>,
    pub temperature: f64,
    pub system_prompt: String,
}

impl MistralConfig {
    pub fn new(
        api_key: impl Into<String>,
        models: Vec<String>,
        temperature: f64,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            api_base: MISTRAL_API_BASE.to_string(),
            api_key: api_key.into(),
            request_timeout_ms: 120_000,
            models,
            temperature,
            system_prompt: system_prompt.into(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

/// Mistral chat client. The wire shape is OpenAI-adjacent; responses that
/// carry no `tool_calls` simply yield none.
#[derive(Debug, Clone)]
pub struct MistralClient {
    client: reqwest::Client,
    config: MistralConfig,
}

impl MistralClient {
    pub fn new(config: MistralConfig) -> Result<Self, RhoAiError> {
        if config.api_key.trim().is_empty() {
            return Err(RhoAiError::MissingApiKey);
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let bearer = format!("Bearer {}", config.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&bearer)
                .map_err(|e| RhoAiError::InvalidResponse(format!("invalid API key header: {e}")))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_millis(
                config.request_timeout_ms.max(1),
            ))
            .build()?;

        Ok(Self { client, config })
    }

    fn chat_completions_url(&self) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            return base.to_string();
        }

        format!("{base}/chat/completions")
    }

    async fn post_with_retries(&self, body: &Value) -> Result<String, RhoAiError> {
        let url = self.chat_completions_url();

        for attempt in 0..=MAX_RETRIES {
            let request_id = new_request_id();
            let response = self
                .client
                .post(&url)
                .header("x-rho-request-id", request_id)
                .header("x-rho-retry-attempt", attempt.to_string())
                .json(body)
                .send()
                .await;

            match response {
                Ok(response) => {
                    let status = response.status();
                    let raw = response.text().await?;
                    if status.is_success() {
                        return Ok(raw);
                    }

                    if attempt < MAX_RETRIES && should_retry_status(status.as_u16()) {
                        sleep(std::time::Duration::from_millis(next_backoff_ms(attempt))).await;
                        continue;
                    }

                    return Err(RhoAiError::HttpStatus {
                        status: status.as_u16(),
                        body: raw,
                    });
                }
                Err(error) => {
                    if attempt < MAX_RETRIES && is_retryable_http_error(&error) {
                        sleep(std::time::Duration::from_millis(next_backoff_ms(attempt))).await;
                        continue;
                    }
                    return Err(RhoAiError::Http(error));
                }
            }
        }

        Err(RhoAiError::InvalidResponse(
            "request retry loop terminated unexpectedly".to_string(),
        ))
    }
}

#[async_trait]
impl Provider for MistralClient {
    fn name(&self) -> &'static str {
        "mistral"
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<ChatTurn, RhoAiError> {
        let model = self
            .config
            .models
            .first()
            .ok_or(RhoAiError::NoModelConfigured)?;

        let body = build_chat_request_body(
            model,
            messages,
            tools,
            &self.config.system_prompt,
            self.config.temperature,
            false,
        );
        let raw = self.post_with_retries(&body).await?;
        parse_chat_response(&raw)
    }

    async fn stream_chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: f64,
    ) -> Result<mpsc::Receiver<String>, RhoAiError> {
        let body = build_chat_request_body(
            model,
            messages,
            &[],
            &self.config.system_prompt,
            temperature,
            true,
        );

        let response = self
            .client
            .post(self.chat_completions_url())
            .header("x-rho-request-id", new_request_id())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await?;
            return Err(RhoAiError::HttpStatus {
                status: status.as_u16(),
                body: raw,
            });
        }

        let (sender, receiver) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut line_buffer = String::new();

            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(error) => {
                        let _ = sender.send(format!("Error: {error}")).await;
                        return;
                    }
                };

                line_buffer.push_str(&String::from_utf8_lossy(chunk.as_ref()));

                while let Some(pos) = line_buffer.find('\n') {
                    let line = line_buffer[..pos].trim_end_matches('\r').to_string();
                    line_buffer.drain(..=pos);

                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();
                    if data.is_empty() {
                        continue;
                    }
                    if data == "[DONE]" {
                        return;
                    }

                    if let Some(delta) = extract_stream_delta(data) {
                        if sender.send(delta).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        Ok(receiver)
    }
}

fn build_chat_request_body(
    model: &str,
    messages: &[ChatMessage],
    tools: &[ToolSpec],
    configured_system: &str,
    temperature: f64,
    stream: bool,
) -> Value {
    let mut serialized = Vec::new();
    let mut has_system_message = false;

    for message in messages {
        match message.role {
            Role::System => {
                has_system_message = true;
                serialized.push(json!({
                    "role": "system",
                    "content": message.content,
                }));
            }
            Role::User => serialized.push(json!({
                "role": "user",
                "content": message.content,
            })),
            Role::Assistant => serialized.push(json!({
                "role": "assistant",
                "content": message.content,
            })),
            Role::Tool => serialized.push(json!({
                "role": "user",
                "content": message.content,
            })),
        }
    }

    // The configured prompt only applies when the conversation carries no
    // system message of its own.
    if !has_system_message && !configured_system.is_empty() {
        serialized.insert(
            0,
            json!({
                "role": "system",
                "content": configured_system,
            }),
        );
    }

    let mut body = json!({
        "model": model,
        "messages": serialized,
        "temperature": temperature,
    });

    if !tools.is_empty() {
        body["tools"] = Value::Array(
            tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.input_schema,
                        }
                    })
                })
                .collect(),
        );
    }

    if stream {
        body["stream"] = json!(true);
    }

    body
}

fn parse_chat_response(raw: &str) -> Result<ChatTurn, RhoAiError> {
    let parsed: MistralChatResponse = serde_json::from_str(raw)?;

    let mut turn = ChatTurn::default();
    for choice in parsed.choices {
        if let Some(content) = choice.message.content {
            if !content.is_empty() {
                turn.messages.push(ChatMessage::assistant(content));
            }
        }

        for tool_call in choice.message.tool_calls.unwrap_or_default() {
            if tool_call.function.name.is_empty() {
                continue;
            }

            let input = match serde_json::from_str::<Value>(&tool_call.function.arguments) {
                Ok(value) => value,
                Err(_) => Value::String(tool_call.function.arguments),
            };

            turn.tool_calls.push(ToolUse {
                id: tool_call.id,
                name: tool_call.function.name,
                input,
            });
        }
    }

    Ok(turn)
}

fn extract_stream_delta(data: &str) -> Option<String> {
    let chunk: MistralStreamChunk = serde_json::from_str(data).ok()?;
    let choice = chunk.choices.into_iter().next()?;
    let content = choice.delta.content?;
    if content.is_empty() {
        return None;
    }
    Some(content)
}

#[derive(Debug, Deserialize)]
struct MistralChatResponse {
    choices: Vec<MistralChoice>,
}

#[derive(Debug, Deserialize)]
struct MistralChoice {
    message: MistralChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct MistralChoiceMessage {
    content: Option<String>,
    tool_calls: Option<Vec<MistralToolCall>>,
}

#[derive(Debug, Deserialize)]
struct MistralToolCall {
    id: String,
    function: MistralFunctionCall,
}

#[derive(Debug, Deserialize)]
struct MistralFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct MistralStreamChunk {
    choices: Vec<MistralStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct MistralStreamChoice {
    delta: MistralStreamDelta,
}

#[derive(Debug, Deserialize)]
struct MistralStreamDelta {
    content: Option<String>,
}
