use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use futures::future::join_all;
use tokio::sync::mpsc::UnboundedSender;

use crate::conversation::{ChatMessage, ToolCallRequest, ToolSpec};
use crate::model::{ModelClient, ModelEvent, ModelRequest};

/// Incremental progress of a turn, folded by the console display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    TextDelta(String),
    DelegationStarted { agent: String, query: String },
    ToolCompleted { name: String },
    ToolFailed { name: String, error: String },
}

/// Where a turn reports its progress. Sending never blocks and a closed
/// receiver is ignored.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<UnboundedSender<TurnEvent>>,
}

impl EventSink {
    pub fn new(tx: UnboundedSender<TurnEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: TurnEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

/// Result of one tool call as the model will see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolReply {
    Success(String),
    /// Fed back to the model prefixed with `error:`; the turn continues.
    Failure(String),
}

/// The tools one agent may call.
///
/// `Err` from `dispatch` aborts the whole turn; recoverable problems are
/// reported as [`ToolReply::Failure`].
#[async_trait]
pub trait ToolDispatch: Send + Sync {
    fn tool_specs(&self) -> Vec<ToolSpec>;

    async fn dispatch(&self, call: &ToolCallRequest, sink: &EventSink) -> Result<ToolReply>;
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub reply: String,
    /// Every message the turn produced, starting with the user message.
    pub messages: Vec<ChatMessage>,
}

/// Reasoning loop shared by the controller and the specialists.
#[derive(Clone)]
pub struct AgentLoop {
    name: String,
    model: Arc<dyn ModelClient>,
    system_prompt: String,
    max_steps: usize,
}

impl AgentLoop {
    pub fn new(
        name: impl Into<String>,
        model: Arc<dyn ModelClient>,
        system_prompt: impl Into<String>,
        max_steps: usize,
    ) -> Self {
        Self {
            name: name.into(),
            model,
            system_prompt: system_prompt.into(),
            max_steps: max_steps.max(1),
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub async fn run(
        &self,
        history: &[ChatMessage],
        user_text: &str,
        tools: &dyn ToolDispatch,
        sink: &EventSink,
    ) -> Result<TurnOutcome> {
        let specs = tools.tool_specs();
        let mut turn = vec![ChatMessage::user(user_text)];

        for step in 1..=self.max_steps {
            let mut messages = Vec::with_capacity(1 + history.len() + turn.len());
            messages.push(ChatMessage::system(self.system_prompt.clone()));
            messages.extend(history.iter().cloned());
            messages.extend(turn.iter().cloned());

            let mut stream = self
                .model
                .stream(ModelRequest {
                    messages,
                    tools: specs.clone(),
                })
                .await?;

            let mut text = String::new();
            let mut calls = Vec::new();
            while let Some(event) = stream.next().await {
                match event? {
                    ModelEvent::TextDelta(delta) => {
                        text.push_str(&delta);
                        sink.emit(TurnEvent::TextDelta(delta));
                    }
                    ModelEvent::ToolCall(call) => calls.push(call),
                }
            }

            if calls.is_empty() {
                tracing::debug!(agent = %self.name, steps = step, "Reasoning finished");
                turn.push(ChatMessage::assistant(text.clone()));
                return Ok(TurnOutcome {
                    reply: text,
                    messages: turn,
                });
            }

            tracing::debug!(agent = %self.name, step, calls = calls.len(), "Dispatching tool calls");
            turn.push(ChatMessage::assistant_tool_calls(Some(text), calls.clone()));

            let results = join_all(
                calls
                    .iter()
                    .map(|call| async move { (call, tools.dispatch(call, sink).await) }),
            )
            .await;

            let mut fatal = None;
            for (call, result) in results {
                let content = match result {
                    Ok(ToolReply::Success(text)) => {
                        sink.emit(TurnEvent::ToolCompleted {
                            name: call.name.clone(),
                        });
                        text
                    }
                    Ok(ToolReply::Failure(message)) => {
                        tracing::warn!(agent = %self.name, tool = %call.name, error = %message, "Tool call failed");
                        sink.emit(TurnEvent::ToolFailed {
                            name: call.name.clone(),
                            error: message.clone(),
                        });
                        format!("error: {message}")
                    }
                    Err(err) => {
                        if fatal.is_none() {
                            fatal = Some(err);
                        }
                        continue;
                    }
                };
                turn.push(ChatMessage::tool_result(call.id.clone(), content));
            }
            if let Some(err) = fatal {
                return Err(err);
            }
        }

        Err(anyhow::anyhow!(
            "{} did not reach an answer within {} reasoning steps",
            self.name,
            self.max_steps
        ))
    }
}
