//! OpenAI-compatible chat completions backend.
//!
//! Works with any server implementing `/v1/chat/completions`:
//! - Ollama (`http://localhost:11434`)
//! - vLLM, llama.cpp server, MLX server, etc.

use super::sse::SseLineParser;
use super::{ChatMessage, ConversationEngine, ReplyStream, ToolReply, strip_think_tags};
use crate::config::LlmConfig;
use crate::error::{AssistantError, Result};
use crate::tools::{ToolCall, ToolDefinition, extract_tool_call_from_text, parse_arguments};
use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::{debug, info};

/// Conversation engine using an OpenAI-compatible HTTP API.
///
/// Replies stream via Server-Sent Events so the first sentence can be
/// synthesised before generation finishes.
pub struct OpenAiChat {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    temperature: f64,
    max_tokens: u32,
}

impl OpenAiChat {
    /// Create a client for the configured server.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| AssistantError::Llm(format!("cannot build HTTP client: {e}")))?;
        let endpoint = format!("{}/v1/chat/completions", api_base(&config.api_url));
        info!("chat backend configured: {endpoint} model={}", config.model);
        Ok(Self {
            client,
            endpoint,
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    async fn post(&self, body: &serde_json::Value) -> Result<reqwest::Response> {
        let mut req = self.client.post(&self.endpoint).json(body);
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| AssistantError::Llm(format!("request failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AssistantError::Llm(format!("HTTP {status}: {text}")));
        }
        Ok(resp)
    }
}

/// Strip a trailing `/v1` and slashes so callers may configure either form.
pub(crate) fn api_base(url: &str) -> &str {
    let url = url.trim_end_matches('/');
    url.strip_suffix("/v1").unwrap_or(url).trim_end_matches('/')
}

#[async_trait]
impl ConversationEngine for OpenAiChat {
    async fn stream_reply(&mut self, history: &[ChatMessage]) -> Result<ReplyStream> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": history,
            "stream": true,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        let resp = self.post(&body).await?;
        let mut bytes = Box::pin(resp.bytes_stream());

        let stream = async_stream::stream! {
            let mut parser = SseLineParser::new();
            'read: loop {
                let events = match bytes.next().await {
                    Some(Ok(chunk)) => parser.push(&chunk),
                    Some(Err(e)) => {
                        yield Err(AssistantError::Llm(format!("stream read error: {e}")));
                        break;
                    }
                    None => {
                        if let Some(event) = parser.flush()
                            && !event.is_done()
                        {
                            match parse_delta(&event.data) {
                                Ok(Some(text)) => yield Ok(text),
                                Ok(None) => {}
                                Err(e) => yield Err(e),
                            }
                        }
                        break;
                    }
                };
                for event in events {
                    if event.is_done() {
                        break 'read;
                    }
                    match parse_delta(&event.data) {
                        Ok(Some(text)) => yield Ok(text),
                        Ok(None) => {}
                        Err(e) => {
                            yield Err(e);
                            break 'read;
                        }
                    }
                }
            }
        };
        let stream: ReplyStream = Box::pin(stream);
        Ok(stream)
    }

    async fn request_tool_call(
        &mut self,
        history: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ToolReply> {
        let tools_json: Vec<serde_json::Value> = tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        let body = serde_json::json!({
            "model": self.model,
            "messages": history,
            "stream": false,
            "tools": tools_json,
            "temperature": self.temperature,
        });

        let resp = self.post(&body).await?;
        let value: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| AssistantError::Llm(format!("invalid response body: {e}")))?;
        parse_tool_response(&value)
    }
}

/// Extract the content delta from one streamed chunk.
fn parse_delta(data: &str) -> Result<Option<String>> {
    let chunk: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| AssistantError::Llm(format!("malformed stream chunk: {e}")))?;
    Ok(chunk["choices"][0]["delta"]["content"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_owned))
}

/// Interpret a non-streaming completion offered tools.
fn parse_tool_response(value: &serde_json::Value) -> Result<ToolReply> {
    let message = &value["choices"][0]["message"];
    if message.is_null() {
        return Err(AssistantError::Llm("response has no message".into()));
    }

    if let Some(function) = message["tool_calls"]
        .as_array()
        .and_then(|calls| calls.first())
        .map(|call| &call["function"])
        && let Some(name) = function["name"].as_str()
    {
        debug!(tool = name, "engine returned native tool call");
        return Ok(ToolReply::Call(ToolCall {
            name: name.to_owned(),
            arguments: parse_arguments(function["arguments"].clone()),
        }));
    }

    let content = strip_think_tags(message["content"].as_str().unwrap_or_default());
    if let Some(call) = extract_tool_call_from_text(&content) {
        debug!(tool = %call.name, "engine returned tool call as text");
        return Ok(ToolReply::Call(call));
    }
    Ok(ToolReply::Text(content.trim().to_owned()))
}
