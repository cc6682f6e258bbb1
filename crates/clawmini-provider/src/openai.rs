//! OpenAI-compatible chat client (OpenAI, DeepSeek, DashScope, Ollama).

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use clawmini_protocol::{CoreError, CoreResult, Message, ToolDefinition};
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::chat::{ChatDelta, ChatModel, ChatRequest, ChatStream};

pub struct OpenAiChatClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
}

impl OpenAiChatClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            api_key: None,
            model: model.into(),
            temperature: 0.2,
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|key| !key.is_empty());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self.client.post(format!("{}{path}", self.base_url));
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn open_stream(&self, request: ChatRequest) -> Result<reqwest::Response> {
        let body = WireRequest {
            model: &self.model,
            messages: to_wire_messages(&request.system_prompt, &request.messages),
            tools: to_wire_tools(&request.tools),
            temperature: self.temperature,
            stream: true,
        };
        let response = self
            .post("/chat/completions")
            .json(&body)
            .send()
            .await
            .context("chat request failed")?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("chat endpoint returned {status}: {text}");
        }
        Ok(response)
    }

    async fn complete_once(&self, prompt: &str) -> Result<String> {
        let body = WireRequest {
            model: &self.model,
            messages: vec![WireMessage {
                role: "user",
                content: Some(prompt.to_owned()),
                tool_call_id: None,
                tool_calls: None,
            }],
            tools: None,
            temperature: self.temperature,
            stream: false,
        };
        let response = self
            .post("/chat/completions")
            .json(&body)
            .send()
            .await
            .context("completion request failed")?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("completion endpoint returned {status}: {text}");
        }
        let parsed: CompletionResponse = response
            .json()
            .await
            .context("failed decoding completion response")?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default())
    }
}

#[async_trait]
impl ChatModel for OpenAiChatClient {
    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip(self, request), fields(model = %self.model, messages = request.messages.len()))]
    async fn stream(&self, request: ChatRequest) -> CoreResult<ChatStream> {
        let response = self
            .open_stream(request)
            .await
            .map_err(|error| CoreError::Provider(format!("{error:#}")))?;
        debug!("chat stream opened");

        let stream = async_stream::try_stream! {
            let mut bytes = response.bytes_stream();
            let mut decoder = SseDecoder::default();
            while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(|error| CoreError::Provider(format!("stream error: {error}")))?;
                for payload in decoder.push(&chunk) {
                    for delta in parse_chunk(&payload)? {
                        yield delta;
                    }
                }
            }
            for payload in decoder.finish() {
                for delta in parse_chunk(&payload)? {
                    yield delta;
                }
            }
        };
        Ok(Box::pin(stream))
    }

    #[instrument(skip(self, prompt), fields(model = %self.model, prompt_len = prompt.len()))]
    async fn complete(&self, prompt: &str) -> CoreResult<String> {
        self.complete_once(prompt)
            .await
            .map_err(|error| CoreError::Provider(format!("{error:#}")))
    }
}

/// Splits a server-sent-events byte stream into `data:` payloads.
///
/// Bytes are buffered until a full line arrives, so a multibyte character
/// split across network chunks is decoded intact.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Feed raw bytes; returns the payloads of every complete line.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(payload) = Self::payload(&String::from_utf8_lossy(&line)) {
                payloads.push(payload);
            }
        }
        payloads
    }

    /// Flush a trailing line that arrived without a newline.
    pub fn finish(&mut self) -> Vec<String> {
        let line = std::mem::take(&mut self.buffer);
        Self::payload(&String::from_utf8_lossy(&line))
            .into_iter()
            .collect()
    }

    fn payload(line: &str) -> Option<String> {
        let data = line.trim_end_matches(['\r', '\n']).strip_prefix("data:")?;
        let data = data.strip_prefix(' ').unwrap_or(data);
        if data.trim().is_empty() || data.trim() == "[DONE]" {
            return None;
        }
        Some(data.to_owned())
    }
}

fn parse_chunk(payload: &str) -> CoreResult<Vec<ChatDelta>> {
    let chunk: StreamChunk = serde_json::from_str(payload).map_err(|error| {
        CoreError::Provider(format!("malformed stream chunk: {error}"))
    })?;
    if let Some(error) = chunk.error {
        return Err(CoreError::Provider(error.to_string()));
    }

    let mut deltas = Vec::new();
    for choice in chunk.choices {
        if let Some(text) = choice.delta.content
            && !text.is_empty()
        {
            deltas.push(ChatDelta::Text(text));
        }
        for call in choice.delta.tool_calls.unwrap_or_default() {
            let (name, arguments) = match call.function {
                Some(function) => (function.name, function.arguments),
                None => (None, None),
            };
            deltas.push(ChatDelta::ToolCall {
                index: call.index,
                id: call.id,
                name,
                arguments,
            });
        }
    }
    Ok(deltas)
}

fn to_wire_messages(system_prompt: &str, messages: &[Message]) -> Vec<WireMessage> {
    let mut wire = Vec::with_capacity(messages.len() + 1);
    if !system_prompt.is_empty() {
        wire.push(WireMessage {
            role: "system",
            content: Some(system_prompt.to_owned()),
            tool_call_id: None,
            tool_calls: None,
        });
    }
    for message in messages {
        let entry = match message {
            Message::System { content } | Message::User { content } => WireMessage {
                role: message.role(),
                content: Some(content.clone()),
                tool_call_id: None,
                tool_calls: None,
            },
            Message::Assistant {
                content,
                tool_calls,
            } => WireMessage {
                role: "assistant",
                content: (!content.is_empty() || tool_calls.is_empty()).then(|| content.clone()),
                tool_call_id: None,
                tool_calls: (!tool_calls.is_empty()).then(|| {
                    tool_calls
                        .iter()
                        .map(|call| WireToolCall {
                            id: call.id.clone(),
                            kind: "function",
                            function: WireFunctionCall {
                                name: call.name.clone(),
                                arguments: call.arguments.to_string(),
                            },
                        })
                        .collect()
                }),
            },
            Message::Tool {
                content,
                tool_call_id,
                ..
            } => WireMessage {
                role: "tool",
                content: Some(content.clone()),
                tool_call_id: Some(tool_call_id.clone()),
                tool_calls: None,
            },
        };
        wire.push(entry);
    }
    wire
}

fn to_wire_tools(tools: &[ToolDefinition]) -> Option<Vec<Value>> {
    if tools.is_empty() {
        return None;
    }
    Some(
        tools
            .iter()
            .map(|tool| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    }
                })
            })
            .collect(),
    )
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Serialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Deserialize)]
struct StreamToolCall {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<StreamFunction>,
}

#[derive(Deserialize)]
struct StreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}
