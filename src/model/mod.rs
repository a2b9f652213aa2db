//! Model inference boundary.
//!
//! The controller and every specialist talk to a language model through
//! [`ModelClient`]. A request carries the message log plus the tools the model
//! may call; the response is a lazy stream of [`ModelEvent`]s.
pub mod openai;

use std::pin::Pin;

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;

use crate::conversation::{ChatMessage, ToolCallRequest, ToolSpec};

pub use openai::OpenAiCompatibleClient;

#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelEvent {
    TextDelta(String),
    ToolCall(ToolCallRequest),
}

pub type ModelStream = Pin<Box<dyn Stream<Item = Result<ModelEvent>> + Send>>;

#[async_trait]
pub trait ModelClient: Send + Sync {
    fn model_name(&self) -> &str;

    async fn stream(&self, request: ModelRequest) -> Result<ModelStream>;
}
