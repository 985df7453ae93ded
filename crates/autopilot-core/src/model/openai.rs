//! OpenAI-compatible streaming chat completions backend.
//!
//! Posts `/chat/completions` with `stream: true` and decodes the server-sent
//! events into `GenerationEvent`s. Tool calls arrive in fragments keyed by
//! index; they are assembled and emitted once the choice finishes.

use super::traits::{
    ContextMessage, GenerationEvent, GenerationStream, LanguageModel, ModelRequest, ToolCall,
};
use crate::config::ModelSettings;
use crate::error::ModelError;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct OpenAiModel {
    client: reqwest::Client,
    settings: ModelSettings,
}

impl OpenAiModel {
    pub fn new(settings: ModelSettings) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, settings })
    }

    pub fn from_env() -> Result<Self, ModelError> {
        Self::new(ModelSettings::from_env())
    }

    fn request_body(&self, request: &ModelRequest) -> Value {
        let mut messages = vec![json!({ "role": "system", "content": request.system_prompt })];
        messages.extend(request.messages.iter().map(wire_message));

        let mut body = json!({
            "model": self.settings.model,
            "messages": messages,
            "stream": true,
            "max_tokens": self.settings.max_tokens,
            "temperature": self.settings.temperature,
        });
        if !request.tools.is_empty() {
            body["tools"] = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
        }
        body
    }
}

fn wire_message(message: &ContextMessage) -> Value {
    match message {
        ContextMessage::User { content } => json!({ "role": "user", "content": content }),
        ContextMessage::Assistant {
            content,
            tool_calls,
        } if !tool_calls.is_empty() => json!({
            "role": "assistant",
            "content": content,
            "tool_calls": tool_calls.iter().map(|c| json!({
                "id": c.call_id,
                "type": "function",
                "function": { "name": c.name, "arguments": c.arguments.to_string() },
            })).collect::<Vec<_>>(),
        }),
        ContextMessage::Assistant { content, .. } => {
            json!({ "role": "assistant", "content": content })
        }
        ContextMessage::Tool { call_id, content } => {
            json!({ "role": "tool", "tool_call_id": call_id, "content": content })
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    fn name(&self) -> &str {
        "openai"
    }

    async fn stream(&self, request: ModelRequest) -> Result<GenerationStream, ModelError> {
        let api_key = self
            .settings
            .api_key
            .as_deref()
            .ok_or_else(|| ModelError::NotConfigured("OPENAI_API_KEY is not set".to_string()))?;
        let url = format!("{}/chat/completions", self.settings.base_url);
        info!(
            target: "autopilot::model",
            model = %self.settings.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "starting generation"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&self.request_body(&request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(target: "autopilot::model", status = status.as_u16(), "generation rejected");
            return Err(ModelError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(ModelError::from))
            .boxed();
        Ok(decode_events(body))
    }
}

struct DecodeState {
    body: BoxStream<'static, Result<Vec<u8>, ModelError>>,
    sse: SseDecoder,
    assembler: ChunkAssembler,
    pending: VecDeque<Result<GenerationEvent, ModelError>>,
    finished: bool,
}

/// Turn a raw SSE byte stream into generation events. The stream ends after
/// `Done` or the first error.
pub(crate) fn decode_events(
    body: BoxStream<'static, Result<Vec<u8>, ModelError>>,
) -> GenerationStream {
    let state = DecodeState {
        body,
        sse: SseDecoder::default(),
        assembler: ChunkAssembler::default(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(event) = st.pending.pop_front() {
                if matches!(event, Ok(GenerationEvent::Done) | Err(_)) {
                    st.pending.clear();
                    st.finished = true;
                }
                return Some((event, st));
            }
            if st.finished {
                return None;
            }
            match st.body.next().await {
                Some(Ok(bytes)) => {
                    for data in st.sse.feed(&bytes) {
                        st.pending.extend(st.assembler.accept(&data));
                    }
                }
                Some(Err(e)) => st.pending.push_back(Err(e)),
                None => {
                    debug!(target: "autopilot::model", "stream closed without [DONE]");
                    st.pending.extend(st.assembler.finish().into_iter().map(Ok));
                    st.pending.push_back(Ok(GenerationEvent::Done));
                }
            }
        }
    })
    .boxed()
}

/// Splits a byte stream into SSE `data:` payloads.
#[derive(Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub(crate) fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();
            if let Some(data) = line.strip_prefix("data:") {
                out.push(data.trim_start().to_string());
            }
        }
        out
    }
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

#[derive(Deserialize)]
struct ToolCallDelta {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

/// Accumulates streamed chunks into generation events.
#[derive(Default)]
pub(crate) struct ChunkAssembler {
    calls: BTreeMap<usize, PartialCall>,
}

impl ChunkAssembler {
    pub(crate) fn accept(&mut self, data: &str) -> Vec<Result<GenerationEvent, ModelError>> {
        if data == "[DONE]" {
            let mut out: Vec<_> = self.finish().into_iter().map(Ok).collect();
            out.push(Ok(GenerationEvent::Done));
            return out;
        }

        let chunk: StreamChunk = match serde_json::from_str(data) {
            Ok(c) => c,
            Err(e) => return vec![Err(ModelError::Decode(format!("{}: {}", e, data)))],
        };

        let mut out = Vec::new();
        for choice in chunk.choices {
            if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                out.push(Ok(GenerationEvent::TextDelta(text)));
            }
            for delta in choice.delta.tool_calls {
                let call = self.calls.entry(delta.index).or_default();
                if let Some(id) = delta.id {
                    call.id = id;
                }
                if let Some(f) = delta.function {
                    if let Some(name) = f.name {
                        call.name.push_str(&name);
                    }
                    if let Some(args) = f.arguments {
                        call.arguments.push_str(&args);
                    }
                }
            }
            if choice.finish_reason.is_some() {
                out.extend(self.finish().into_iter().map(Ok));
            }
        }
        out
    }

    /// Emit every assembled call, in index order.
    pub(crate) fn finish(&mut self) -> Vec<GenerationEvent> {
        std::mem::take(&mut self.calls)
            .into_values()
            .map(|c| {
                let arguments = if c.arguments.trim().is_empty() {
                    json!({})
                } else {
                    serde_json::from_str(&c.arguments).unwrap_or(Value::String(c.arguments))
                };
                GenerationEvent::ToolCall(ToolCall::new(c.name, arguments, c.id))
            })
            .collect()
    }
}
