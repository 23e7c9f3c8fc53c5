use async_trait::async_trait;
use futures_util::StreamExt;
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

pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

const STREAM_CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_base: String,
    pub api_key: String,
    pub request_timeout_ms: u64,
    pub models: Vec<String>,
    pub temperature: f64,
    pub system_prompt: String,
}

impl GeminiConfig {
    pub fn new(
        api_key: impl Into<String>,
        models: Vec<String>,
        temperature: f64,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            api_base: GEMINI_API_BASE.to_string(),
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

/// generateContent client. The system prompt becomes `systemInstruction` and
/// assistant turns use the wire role `model`. This backend announces tool
/// requests as free-form JSON inside text parts, so the adapter parses
/// rather than declares.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, RhoAiError> {
        if config.api_key.trim().is_empty() {
            return Err(RhoAiError::MissingApiKey);
        }

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(
                config.request_timeout_ms.max(1),
            ))
            .build()?;

        Ok(Self { client, config })
    }

    fn generate_content_url(&self, model: &str) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        format!("{base}/models/{model}:generateContent")
    }

    fn stream_generate_content_url(&self, model: &str) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        format!("{base}/models/{model}:streamGenerateContent")
    }

    async fn post_with_retries(&self, url: &str, body: &Value) -> Result<String, RhoAiError> {
        for attempt in 0..=MAX_RETRIES {
            let request_id = new_request_id();
            let response = self
                .client
                .post(url)
                .header("x-rho-request-id", request_id)
                .header("x-rho-retry-attempt", attempt.to_string())
                .query(&[("key", self.config.api_key.as_str())])
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
impl Provider for GeminiClient {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        _tools: &[ToolSpec],
    ) -> Result<ChatTurn, RhoAiError> {
        let model = self
            .config
            .models
            .first()
            .ok_or(RhoAiError::NoModelConfigured)?;

        let body = build_generate_content_body(
            messages,
            &self.config.system_prompt,
            self.config.temperature,
        );
        let url = self.generate_content_url(model);
        let raw = self.post_with_retries(&url, &body).await?;
        parse_generate_content_response(&raw)
    }

    async fn stream_chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: f64,
    ) -> Result<mpsc::Receiver<String>, RhoAiError> {
        let body = build_generate_content_body(messages, &self.config.system_prompt, temperature);
        let url = self.stream_generate_content_url(model);

        let response = self
            .client
            .post(&url)
            .header("x-rho-request-id", new_request_id())
            .query(&[("alt", "sse"), ("key", self.config.api_key.as_str())])
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

                    for text in extract_stream_texts(data) {
                        if sender.send(text).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        Ok(receiver)
    }
}

fn build_generate_content_body(
    messages: &[ChatMessage],
    configured_system: &str,
    temperature: f64,
) -> Value {
    let system = resolve_system_prompt(messages, configured_system);

    let contents: Vec<Value> = messages
        .iter()
        .filter_map(|message| match message.role {
            Role::System => None,
            Role::Assistant => Some(json!({
                "role": "model",
                "parts": [{ "text": message.content }],
            })),
            Role::User | Role::Tool => Some(json!({
                "role": "user",
                "parts": [{ "text": message.content }],
            })),
        })
        .collect();

    let mut body = json!({
        "contents": contents,
        "generationConfig": { "temperature": temperature },
    });

    if !system.is_empty() {
        body["systemInstruction"] = json!({
            "role": "system",
            "parts": [{ "text": system }],
        });
    }

    body
}

fn parse_generate_content_response(raw: &str) -> Result<ChatTurn, RhoAiError> {
    let parsed: GenerateContentResponse = serde_json::from_str(raw)?;
    let mut turn = ChatTurn::default();
    let mut call_index = 0;

    for candidate in parsed.candidates.unwrap_or_default() {
        let parts = candidate
            .content
            .and_then(|content| content.parts)
            .unwrap_or_default();

        for part in parts {
            if let Some(text) = part.text {
                if !text.is_empty() {
                    if let Some(call) = parse_embedded_tool_call(&text, &mut call_index) {
                        turn.tool_calls.push(call);
                    }
                    turn.messages.push(ChatMessage::assistant(text));
                }
            }

            if let Some(function_call) = part.function_call {
                call_index += 1;
                turn.tool_calls.push(ToolUse {
                    id: format!("gemini_call_{call_index}"),
                    name: function_call.name,
                    input: function_call.args.unwrap_or_else(|| json!({})),
                });
            }
        }
    }

    Ok(turn)
}

/// Best-effort recognition of a tool request serialized as JSON inside a text
/// part: an object with a non-empty `name` and optional `arguments`.
fn parse_embedded_tool_call(text: &str, call_index: &mut usize) -> Option<ToolUse> {
    #[derive(Deserialize)]
    struct EmbeddedCall {
        name: String,
        #[serde(default)]
        arguments: Value,
    }

    let parsed: EmbeddedCall = serde_json::from_str(text.trim()).ok()?;
    if parsed.name.is_empty() {
        return None;
    }

    *call_index += 1;
    let input = if parsed.arguments.is_null() {
        json!({})
    } else {
        parsed.arguments
    };

    Some(ToolUse {
        id: format!("gemini_call_{call_index}"),
        name: parsed.name,
        input,
    })
}

fn extract_stream_texts(data: &str) -> Vec<String> {
    let Ok(parsed) = serde_json::from_str::<GenerateContentResponse>(data) else {
        return Vec::new();
    };

    let mut texts = Vec::new();
    for candidate in parsed.candidates.unwrap_or_default() {
        let parts = candidate
            .content
            .and_then(|content| content.parts)
            .unwrap_or_default();
        for part in parts {
            if let Some(text) = part.text {
                if !text.is_empty() {
                    texts.push(text);
                }
            }
        }
    }
    texts
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<GenerateContentCandidate>>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentCandidate {
    content: Option<GenerateContentContent>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentContent {
    parts: Option<Vec<GenerateContentPart>>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentPart {
    text: Option<String>,
    #[serde(rename = "functionCall")]
    function_call: Option<GenerateContentFunctionCall>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentFunctionCall {
    name: String,
    args: Option<Value>,
}
