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
    resolve_system_prompt, ChatMessage, ChatTurn, Provider, RhoAiError, Role, ToolSpec, ToolUse,
};

pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
pub const ALIBABA_API_BASE: &str = "https://dashscope-intl.aliyuncs.com/compatible-mode/v1";

const STREAM_CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_base: String,
    pub api_key: String,
    pub organization: Option<String>,
    pub request_timeout_ms: u64,
    pub models: Vec<String>,
    pub temperature: f64,
    pub system_prompt: String,
}

impl OpenAiConfig {
    pub fn new(
        api_key: impl Into<String>,
        models: Vec<String>,
        temperature: f64,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            api_base: OPENAI_API_BASE.to_string(),
            api_key: api_key.into(),
            organization: None,
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

/// Chat-completions client for OpenAI and OpenAI-compatible endpoints. The
/// Alibaba DashScope provider is this client pointed at the compatible-mode
/// base URL with its own provider name.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    config: OpenAiConfig,
    provider_name: &'static str,
}

impl OpenAiClient {
    pub fn openai(config: OpenAiConfig) -> Result<Self, RhoAiError> {
        Self::with_name("openai", config)
    }

    pub fn alibaba(mut config: OpenAiConfig) -> Result<Self, RhoAiError> {
        if config.api_base == OPENAI_API_BASE {
            config.api_base = ALIBABA_API_BASE.to_string();
        }
        Self::with_name("alibaba", config)
    }

    pub fn with_name(provider_name: &'static str, config: OpenAiConfig) -> Result<Self, RhoAiError> {
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

        if let Some(org) = &config.organization {
            headers.insert(
                "OpenAI-Organization",
                HeaderValue::from_str(org).map_err(|e| {
                    RhoAiError::InvalidResponse(format!("invalid organization header: {e}"))
                })?,
            );
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_millis(
                config.request_timeout_ms.max(1),
            ))
            .build()?;

        Ok(Self {
            client,
            config,
            provider_name,
        })
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
impl Provider for OpenAiClient {
    fn name(&self) -> &'static str {
        self.provider_name
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
        let url = self.chat_completions_url();

        let response = self
            .client
            .post(&url)
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
    let system = resolve_system_prompt(messages, configured_system);
    let mut serialized = Vec::new();

    if !system.is_empty() {
        serialized.push(json!({ "role": "system", "content": system }));
    }

    for message in messages {
        match message.role {
            Role::System => {}
            Role::User => serialized.push(json!({
                "role": "user",
                "content": message.content,
            })),
            Role::Assistant => serialized.push(json!({
                "role": "assistant",
                "content": message.content,
            })),
            // No distinct tool role on this path; tool output travels as
            // user text.
            Role::Tool => serialized.push(json!({
                "role": "user",
                "content": message.content,
            })),
        }
    }

    let mut body = json!({
        "model": model,
        "messages": serialized,
    });

    if !tools.is_empty() {
        body["tools"] = to_openai_tools(tools);
    }

    if !is_fixed_parameter_model(model) {
        body["temperature"] = json!(temperature);
    }

    if stream {
        body["stream"] = json!(true);
    }

    body
}

fn to_openai_tools(tools: &[ToolSpec]) -> Value {
    Value::Array(
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
    )
}

/// Reasoning models with fixed sampling parameters reject the temperature
/// field entirely.
pub fn is_fixed_parameter_model(model: &str) -> bool {
    let model = model.to_ascii_lowercase();
    model.starts_with("o1") || model.starts_with("o3")
}

fn parse_chat_response(raw: &str) -> Result<ChatTurn, RhoAiError> {
    let parsed: OpenAiChatResponse = serde_json::from_str(raw)?;

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
    let chunk: OpenAiStreamChunk = serde_json::from_str(data).ok()?;
    let choice = chunk.choices.into_iter().next()?;
    let content = choice.delta.content?;
    if content.is_empty() {
        return None;
    }
    Some(content)
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiToolCall {
    id: String,
    function: OpenAiFunctionCall,
}

#[derive(Debug, Deserialize)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    choices: Vec<OpenAiStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiStreamDelta,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamDelta {
    content: Option<String>,
}
