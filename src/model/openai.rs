//! OpenAI-compatible chat-completions client (OpenAI, Ollama, DeepSeek, Groq).
//!
//! Requests are always streamed. Server-sent events are decoded with
//! `eventsource-stream`; tool-call fragments are stitched together by
//! [`StreamAccumulator`] and emitted once the stream reports completion.
use std::collections::{BTreeMap, VecDeque};
use std::pin::Pin;

use anyhow::{Context, Result};
use async_trait::async_trait;
use eventsource_stream::{Event as SseEvent, EventStreamError, Eventsource};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ModelClient, ModelEvent, ModelRequest, ModelStream};
use crate::conversation::{ChatMessage, Role, ToolCallRequest, ToolSpec};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ApiToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ApiToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: &'static str,
    function: ApiFunctionCall,
}

#[derive(Debug, Serialize)]
struct ApiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: ApiFunctionDef,
}

#[derive(Debug, Serialize)]
struct ApiFunctionDef {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCall {
    index: Option<usize>,
    id: Option<String>,
    function: Option<StreamFunctionCall>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionCall {
    name: Option<String>,
    arguments: Option<String>,
}

fn to_api_message(message: &ChatMessage) -> ApiMessage {
    ApiMessage {
        role: message.role.as_str(),
        content: message.content.clone(),
        tool_calls: message
            .tool_calls
            .iter()
            .map(|call| ApiToolCall {
                id: call.id.clone(),
                call_type: "function",
                function: ApiFunctionCall {
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                },
            })
            .collect(),
        tool_call_id: match message.role {
            Role::Tool => message.tool_call_id.clone(),
            _ => None,
        },
    }
}

fn to_api_tool(tool: &ToolSpec) -> ApiTool {
    ApiTool {
        tool_type: "function",
        function: ApiFunctionDef {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.parameters.clone(),
        },
    }
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Folds streamed chunks into [`ModelEvent`]s.
#[derive(Debug, Default)]
pub(crate) struct StreamAccumulator {
    pending_calls: BTreeMap<usize, PartialToolCall>,
    finished: bool,
}

impl StreamAccumulator {
    pub(crate) fn ingest(&mut self, chunk: StreamChunk) -> Vec<ModelEvent> {
        let mut events = Vec::new();
        for choice in chunk.choices {
            if let Some(text) = choice.delta.content
                && !text.is_empty()
            {
                events.push(ModelEvent::TextDelta(text));
            }
            let fragments = choice.delta.tool_calls.unwrap_or_default();
            let base = self.pending_calls.len();
            for (position, fragment) in fragments.into_iter().enumerate() {
                // Servers that omit `index` send whole calls; each takes the next free slot.
                let index = fragment.index.unwrap_or(base + position);
                let call = self.pending_calls.entry(index).or_default();
                if let Some(id) = fragment.id {
                    call.id = id;
                }
                if let Some(function) = fragment.function {
                    if let Some(name) = function.name {
                        call.name.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        call.arguments.push_str(&arguments);
                    }
                }
            }
        }
        events
    }

    /// Emits the accumulated tool calls in index order. Idempotent.
    pub(crate) fn finish(&mut self) -> Vec<ModelEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        std::mem::take(&mut self.pending_calls)
            .into_iter()
            .map(|(index, call)| {
                let id = if call.id.is_empty() {
                    format!("call_{index}")
                } else {
                    call.id
                };
                let arguments = if call.arguments.trim().is_empty() {
                    "{}".to_string()
                } else {
                    call.arguments
                };
                ModelEvent::ToolCall(ToolCallRequest {
                    id,
                    name: call.name,
                    arguments,
                })
            })
            .collect()
    }
}

type SseStream =
    Pin<Box<dyn Stream<Item = Result<SseEvent, EventStreamError<reqwest::Error>>> + Send>>;

struct DecodeState {
    events: SseStream,
    accumulator: StreamAccumulator,
    pending: VecDeque<ModelEvent>,
    done: bool,
}

fn decode_stream(events: SseStream) -> ModelStream {
    let state = DecodeState {
        events,
        accumulator: StreamAccumulator::default(),
        pending: VecDeque::new(),
        done: false,
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((Ok(event), state));
            }
            if state.done {
                return None;
            }
            match state.events.next().await {
                Some(Ok(sse)) => {
                    let data = sse.data.trim();
                    if data.is_empty() {
                        continue;
                    }
                    if data == "[DONE]" {
                        let tail = state.accumulator.finish();
                        state.pending.extend(tail);
                        state.done = true;
                        continue;
                    }
                    match serde_json::from_str::<StreamChunk>(data) {
                        Ok(chunk) => {
                            let events = state.accumulator.ingest(chunk);
                            state.pending.extend(events);
                        }
                        Err(err) => {
                            state.done = true;
                            return Some((
                                Err(anyhow::anyhow!("malformed model stream chunk: {err}")),
                                state,
                            ));
                        }
                    }
                }
                Some(Err(err)) => {
                    state.done = true;
                    return Some((Err(anyhow::anyhow!("model stream failed: {err}")), state));
                }
                None => {
                    let tail = state.accumulator.finish();
                    state.pending.extend(tail);
                    state.done = true;
                }
            }
        }
    }))
}

pub struct OpenAiCompatibleClient {
    api_key: Option<String>,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiCompatibleClient {
    pub fn new(api_key: Option<String>, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            base_url: base_url.into(),
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ModelClient for OpenAiCompatibleClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn stream(&self, request: ModelRequest) -> Result<ModelStream> {
        let body = ApiRequest {
            model: &self.model,
            messages: request.messages.iter().map(to_api_message).collect(),
            tools: request.tools.iter().map(to_api_tool).collect(),
            stream: true,
        };

        let mut http = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let response = http
            .send()
            .await
            .with_context(|| format!("failed to reach model provider at {}", self.base_url))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "model provider returned HTTP {}: {}",
                status.as_u16(),
                text.trim()
            ));
        }

        tracing::debug!(model = %self.model, tools = body.tools.len(), "model stream opened");
        Ok(decode_stream(Box::pin(response.bytes_stream().eventsource())))
    }
}
