use httpmock::prelude::*;
use rho_ai::{
    AnthropicClient, AnthropicConfig, ChatMessage, GeminiClient, GeminiConfig, MistralClient,
    MistralConfig, OpenAiClient, OpenAiConfig, Provider, RhoAiError, ToolResultMsg, ToolSpec,
};
use serde_json::json;

fn read_file_tool() -> ToolSpec {
    ToolSpec {
        name: "read_file".to_string(),
        description: "Read a local text file".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"],
            "additionalProperties": false
        }),
    }
}

#[tokio::test]
async fn openai_client_sends_expected_http_request() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/chat/completions")
            .header("authorization", "Bearer test-openai-key")
            .header_exists("x-rho-request-id")
            .header("x-rho-retry-attempt", "0")
            .json_body_partial(
                json!({
                    "model": "gpt-4o",
                    "messages": [{"role": "system"}, {"role": "user"}],
                    "tools": [{"type": "function"}]
                })
                .to_string(),
            );

        then.status(200).json_body(json!({
            "choices": [{
                "message": { "content": "openai ok" },
                "finish_reason": "stop"
            }]
        }));
    });

    let client = OpenAiClient::openai(
        OpenAiConfig::new(
            "test-openai-key",
            vec!["gpt-4o".to_string()],
            0.0,
            "You are terse.",
        )
        .with_api_base(format!("{}/v1", server.base_url())),
    )
    .expect("openai client should build");

    let turn = client
        .chat(&[ChatMessage::user("hello")], &[read_file_tool()])
        .await
        .expect("chat should succeed");

    mock.assert();
    assert_eq!(turn.messages.len(), 1);
    assert_eq!(turn.messages[0].content, "openai ok");
    assert!(turn.tool_calls.is_empty());
}

#[tokio::test]
async fn openai_client_extracts_tool_calls() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/v1/chat/completions");
        then.status(200).json_body(json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {
                            "name": "read_file",
                            "arguments": "{\"path\":\"a.txt\"}"
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }));
    });

    let client = OpenAiClient::openai(
        OpenAiConfig::new("key", vec!["gpt-4o".to_string()], 0.0, "")
            .with_api_base(format!("{}/v1", server.base_url())),
    )
    .expect("openai client should build");

    let turn = client
        .chat(&[ChatMessage::user("read a.txt")], &[read_file_tool()])
        .await
        .expect("chat should succeed");

    assert!(turn.messages.is_empty());
    assert_eq!(turn.tool_calls.len(), 1);
    assert_eq!(turn.tool_calls[0].id, "call_1");
    assert_eq!(turn.tool_calls[0].input, json!({"path":"a.txt"}));
}

#[tokio::test]
async fn openai_client_retries_retryable_statuses() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST).path("/v1/chat/completions");
        then.status(503).body("overloaded");
    });

    let client = OpenAiClient::openai(
        OpenAiConfig::new("key", vec!["gpt-4o".to_string()], 0.0, "")
            .with_api_base(format!("{}/v1", server.base_url())),
    )
    .expect("openai client should build");

    let error = client
        .chat(&[ChatMessage::user("hello")], &[])
        .await
        .expect_err("exhausted retries must error");

    // initial attempt plus two retries
    assert_eq!(mock.hits(), 3);
    assert!(matches!(
        error,
        RhoAiError::HttpStatus { status: 503, .. }
    ));
}

#[tokio::test]
async fn openai_send_tool_result_forwards_results_without_tools() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/chat/completions")
            .json_body_partial(
                json!({
                    "messages": [
                        {"role": "user", "content": "read a.txt"},
                        {"role": "user", "content": "X"}
                    ]
                })
                .to_string(),
            );

        then.status(200).json_body(json!({
            "choices": [{
                "message": { "content": "file says X" },
                "finish_reason": "stop"
            }]
        }));
    });

    let client = OpenAiClient::openai(
        OpenAiConfig::new("key", vec!["gpt-4o".to_string()], 0.0, "")
            .with_api_base(format!("{}/v1", server.base_url())),
    )
    .expect("openai client should build");

    let turn = client
        .send_tool_result(
            &[ChatMessage::user("read a.txt")],
            &[ToolResultMsg {
                id: "call_1".to_string(),
                content: "X".to_string(),
                is_error: false,
            }],
        )
        .await
        .expect("follow-up should succeed");

    mock.assert();
    assert_eq!(turn.messages[0].content, "file says X");
}

#[tokio::test]
async fn openai_client_streams_text_deltas() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/v1/chat/completions");
        then.status(200)
            .header("content-type", "text/event-stream")
            .body(concat!(
                "data: {\"choices\":[{\"delta\":{\"content\":\"hel\"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
                "data: [DONE]\n\n",
            ));
    });

    let client = OpenAiClient::openai(
        OpenAiConfig::new("key", vec!["gpt-4o".to_string()], 0.0, "")
            .with_api_base(format!("{}/v1", server.base_url())),
    )
    .expect("openai client should build");

    let mut receiver = client
        .stream_chat("gpt-4o", &[ChatMessage::user("hello")], 0.0)
        .await
        .expect("stream should open");

    let mut collected = String::new();
    while let Some(chunk) = receiver.recv().await {
        collected.push_str(&chunk);
    }
    assert_eq!(collected, "hello");
}

#[tokio::test]
async fn alibaba_variant_reports_its_own_provider_name() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/compatible-mode/v1/chat/completions")
            .header("authorization", "Bearer test-alibaba-key");
        then.status(200).json_body(json!({
            "choices": [{
                "message": { "content": "qwen ok" },
                "finish_reason": "stop"
            }]
        }));
    });

    let client = OpenAiClient::alibaba(
        OpenAiConfig::new("test-alibaba-key", vec!["qwen-max".to_string()], 0.0, "")
            .with_api_base(format!("{}/compatible-mode/v1", server.base_url())),
    )
    .expect("alibaba client should build");

    assert_eq!(client.name(), "alibaba");

    let turn = client
        .chat(&[ChatMessage::user("hello")], &[])
        .await
        .expect("chat should succeed");

    mock.assert();
    assert_eq!(turn.messages[0].content, "qwen ok");
}

#[tokio::test]
async fn anthropic_client_sends_expected_http_request() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/messages")
            .header("x-api-key", "test-anthropic-key")
            .header("anthropic-version", "2023-06-01")
            .json_body_partial(
                json!({
                    "model": "claude-3-5-sonnet-20240620",
                    "system": "You are terse.",
                    "messages": [{"role": "user"}],
                    "tools": [{"name": "read_file"}]
                })
                .to_string(),
            );

        then.status(200).json_body(json!({
            "content": [
                {"type": "text", "text": "checking"},
                {"type": "tool_use", "id": "toolu_1", "name": "read_file", "input": {"path": "a.txt"}}
            ],
            "stop_reason": "tool_use"
        }));
    });

    let client = AnthropicClient::new(
        AnthropicConfig::new(
            "test-anthropic-key",
            vec!["claude-3-5-sonnet-20240620".to_string()],
            0.0,
            "You are terse.",
        )
        .with_api_base(format!("{}/v1", server.base_url())),
    )
    .expect("anthropic client should build");

    let turn = client
        .chat(&[ChatMessage::user("read a.txt")], &[read_file_tool()])
        .await
        .expect("chat should succeed");

    mock.assert();
    assert_eq!(turn.messages.len(), 1);
    assert_eq!(turn.tool_calls.len(), 1);
    assert_eq!(turn.tool_calls[0].id, "toolu_1");
}

#[tokio::test]
async fn anthropic_client_streams_until_message_stop() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/v1/messages");
        then.status(200)
            .header("content-type", "text/event-stream")
            .body(concat!(
                "event: content_block_delta\n",
                "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"hi \"}}\n\n",
                "event: content_block_delta\n",
                "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"there\"}}\n\n",
                "event: message_stop\n",
                "data: {\"type\":\"message_stop\"}\n\n",
            ));
    });

    let client = AnthropicClient::new(
        AnthropicConfig::new("key", vec!["claude-3-5-sonnet-20240620".to_string()], 0.0, "")
            .with_api_base(format!("{}/v1", server.base_url())),
    )
    .expect("anthropic client should build");

    let mut receiver = client
        .stream_chat(
            "claude-3-5-sonnet-20240620",
            &[ChatMessage::user("hello")],
            0.0,
        )
        .await
        .expect("stream should open");

    let mut collected = String::new();
    while let Some(chunk) = receiver.recv().await {
        collected.push_str(&chunk);
    }
    assert_eq!(collected, "hi there");
}

#[tokio::test]
async fn gemini_client_sends_expected_http_request() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1beta/models/gemini-pro:generateContent")
            .query_param("key", "test-gemini-key")
            .json_body_partial(
                json!({
                    "systemInstruction": { "parts": [{"text": "You are terse."}] },
                    "contents": [
                        {"role": "user"},
                        {"role": "model"}
                    ]
                })
                .to_string(),
            );

        then.status(200).json_body(json!({
            "candidates": [{
                "content": { "parts": [{"text": "gemini ok"}] },
                "finishReason": "STOP"
            }]
        }));
    });

    let client = GeminiClient::new(
        GeminiConfig::new(
            "test-gemini-key",
            vec!["gemini-pro".to_string()],
            0.0,
            "You are terse.",
        )
        .with_api_base(format!("{}/v1beta", server.base_url())),
    )
    .expect("gemini client should build");

    let turn = client
        .chat(
            &[
                ChatMessage::user("hello"),
                ChatMessage::assistant("hi"),
                ChatMessage::user("again"),
            ],
            &[],
        )
        .await
        .expect("chat should succeed");

    mock.assert();
    assert_eq!(turn.messages[0].content, "gemini ok");
}

#[tokio::test]
async fn gemini_client_parses_embedded_tool_call_json() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/v1beta/models/gemini-pro:generateContent");
        then.status(200).json_body(json!({
            "candidates": [{
                "content": { "parts": [
                    {"text": "{\"name\":\"bash\",\"arguments\":{\"script\":\"ls\"}}"}
                ]}
            }]
        }));
    });

    let client = GeminiClient::new(
        GeminiConfig::new("key", vec!["gemini-pro".to_string()], 0.0, "")
            .with_api_base(format!("{}/v1beta", server.base_url())),
    )
    .expect("gemini client should build");

    let turn = client
        .chat(&[ChatMessage::user("list files")], &[])
        .await
        .expect("chat should succeed");

    assert_eq!(turn.tool_calls.len(), 1);
    assert_eq!(turn.tool_calls[0].name, "bash");
}

#[tokio::test]
async fn mistral_client_sends_expected_http_request() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/chat/completions")
            .header("authorization", "Bearer test-mistral-key")
            .json_body_partial(
                json!({
                    "model": "mistral-large-latest",
                    "messages": [{"role": "system"}, {"role": "user"}]
                })
                .to_string(),
            );

        then.status(200).json_body(json!({
            "choices": [{
                "message": { "content": "mistral ok" },
                "finish_reason": "stop"
            }]
        }));
    });

    let client = MistralClient::new(
        MistralConfig::new(
            "test-mistral-key",
            vec!["mistral-large-latest".to_string()],
            0.2,
            "You are terse.",
        )
        .with_api_base(format!("{}/v1", server.base_url())),
    )
    .expect("mistral client should build");

    let turn = client
        .chat(&[ChatMessage::user("hello")], &[])
        .await
        .expect("chat should succeed");

    mock.assert();
    assert_eq!(turn.messages[0].content, "mistral ok");
    assert!(turn.tool_calls.is_empty());
}
