use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
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

pub const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1";

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 1024;
const STREAM_CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_base: String,
    pub api_key: String,
    pub request_timeout_ms: u64,
    pub models: Vec<String>,
    pub temperature: f64,
    pub system_prompt: String,
}

impl AnthropicConfig {
    pub fn new(
        api_key: impl Into<String>,
        models: Vec<String>,
        temperature: f64,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            api_base: ANTHROPIC_API_BASE.to_string(),
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

/// Messages-API client. The system prompt travels in the dedicated `system`
/// parameter, never inside the message array.
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    client: reqwest::Client,
    config: AnthropicConfig,
}

impl AnthropicClient {
    pub fn new(config: AnthropicConfig) -> Result<Self, RhoAiError> {
        if config.api_key.trim().is_empty() {
            return Err(RhoAiError::MissingApiKey);
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(config.api_key.trim())
                .map_err(|e| RhoAiError::InvalidResponse(format!("invalid API key header: {e}")))?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_millis(
                config.request_timeout_ms.max(1),
            ))
            .build()?;

        Ok(Self { client, config })
    }

    fn messages_url(&self) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        if base.ends_with("/messages") {
            return base.to_string();
        }

        format!("{base}/messages")
    }

    async fn post_with_retries(&self, body: &Value) -> Result<String, RhoAiError> {
        let url = self.messages_url();

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
impl Provider for AnthropicClient {
    fn name(&self) -> &'static str {
        "anthropic"
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

        let body = build_messages_request_body(
            model,
            messages,
            tools,
            &self.config.system_prompt,
            self.config.temperature,
            false,
        );
        let raw = self.post_with_retries(&body).await?;
        parse_messages_response(&raw)
    }

    async fn stream_chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: f64,
    ) -> Result<mpsc::Receiver<String>, RhoAiError> {
        let body = build_messages_request_body(
            model,
            messages,
            &[],
            &self.config.system_prompt,
            temperature,
            true,
        );

        let response = self
            .client
            .post(self.messages_url())
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
            let mut current_data = String::new();

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

                    if line.is_empty() {
                        match apply_stream_event(current_data.trim()) {
                            StreamEventAction::Emit(text) => {
                                if sender.send(text).await.is_err() {
                                    return;
                                }
                            }
                            StreamEventAction::Stop => return,
                            StreamEventAction::Error(message) => {
                                let _ = sender.send(format!("Error: {message}")).await;
                                return;
                            }
                            StreamEventAction::Skip => {}
                        }
                        current_data.clear();
                        continue;
                    }

                    if let Some(data) = line.strip_prefix("data:") {
                        if !current_data.is_empty() {
                            current_data.push('\n');
                        }
                        current_data.push_str(data.trim());
                    }
                }
            }
        });

        Ok(receiver)
    }
}

enum StreamEventAction {
    Emit(String),
    Stop,
    Error(String),
    Skip,
}

fn apply_stream_event(data: &str) -> StreamEventAction {
    if data.is_empty() {
        return StreamEventAction::Skip;
    }

    let Ok(payload) = serde_json::from_str::<Value>(data) else {
        return StreamEventAction::Skip;
    };

    match payload.get("type").and_then(Value::as_str).unwrap_or("") {
        "content_block_delta" => {
            let delta = payload.get("delta").cloned().unwrap_or_default();
            if delta.get("type").and_then(Value::as_str) == Some("text_delta") {
                if let Some(text) = delta.get("text").and_then(Value::as_str) {
                    if !text.is_empty() {
                        return StreamEventAction::Emit(text.to_string());
                    }
                }
            }
            StreamEventAction::Skip
        }
        "message_stop" => StreamEventAction::Stop,
        "error" => {
            let message = payload
                .get("error")
                .and_then(Value::as_object)
                .and_then(|error| error.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("stream returned error event");
            StreamEventAction::Error(message.to_string())
        }
        _ => StreamEventAction::Skip,
    }
}

fn build_messages_request_body(
    model: &str,
    messages: &[ChatMessage],
    tools: &[ToolSpec],
    configured_system: &str,
    temperature: f64,
    stream: bool,
) -> Value {
    let system = resolve_system_prompt(messages, configured_system);

    let serialized: Vec<Value> = messages
        .iter()
        .filter_map(|message| match message.role {
            Role::System => None,
            Role::User | Role::Tool => Some(json!({
                "role": "user",
                "content": [{ "type": "text", "text": message.content }],
            })),
            Role::Assistant => Some(json!({
                "role": "assistant",
                "content": [{ "type": "text", "text": message.content }],
            })),
        })
        .collect();

    let mut body = json!({
        "model": model,
        "max_tokens": DEFAULT_MAX_TOKENS,
        "messages": serialized,
        "temperature": temperature,
    });

    if !system.is_empty() {
        body["system"] = json!(system);
    }

    if !tools.is_empty() {
        body["tools"] = to_anthropic_tools(tools);
    }

    if stream {
        body["stream"] = json!(true);
    }

    body
}

/// The tool schema here requires an explicit object type; `properties` and
/// `required` carry through from the manifest when present.
fn to_anthropic_tools(tools: &[ToolSpec]) -> Value {
    Value::Array(
        tools
            .iter()
            .map(|tool| {
                let properties = tool
                    .input_schema
                    .get("properties")
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                let required = tool
                    .input_schema
                    .get("required")
                    .cloned()
                    .unwrap_or_else(|| json!([]));

                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "input_schema": {
                        "type": "object",
                        "properties": properties,
                        "required": required,
                    }
                })
            })
            .collect(),
    )
}

fn parse_messages_response(raw: &str) -> Result<ChatTurn, RhoAiError> {
    let parsed: AnthropicMessageResponse = serde_json::from_str(raw)?;

    let mut turn = ChatTurn::default();
    for block in parsed.content {
        match block {
            AnthropicContent::Text { text } => {
                if !text.is_empty() {
                    turn.messages.push(ChatMessage::assistant(text));
                }
            }
            AnthropicContent::ToolUse { id, name, input } => {
                turn.tool_calls.push(ToolUse { id, name, input });
            }
            AnthropicContent::Other => {}
        }
    }

    Ok(turn)
}

#[derive(Debug, Deserialize)]
struct AnthropicMessageResponse {
    content: Vec<AnthropicContent>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum AnthropicContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Other,
}
