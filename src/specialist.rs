use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::agent::{AgentLoop, EventSink, ToolDispatch, ToolReply};
use crate::conversation::{ToolCallRequest, ToolSpec};
use crate::lifecycle::OpenedServer;
use crate::mcp::ToolConnection;
use crate::model::ModelClient;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecialistOutput {
    pub text: String,
}

/// An agent that carries out one natural-language instruction on its own.
#[async_trait]
pub trait Specialist: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, instruction: &str) -> Result<SpecialistOutput>;
}

/// Specialist bound to one open tool server.
///
/// Every run starts from an empty history; only the role prompt and the
/// instruction reach the model.
pub struct SpecialistAgent {
    name: String,
    agent: AgentLoop,
    tools: ConnectionTools,
}

impl SpecialistAgent {
    pub fn new(server: &OpenedServer, model: Arc<dyn ModelClient>, max_steps: usize) -> Self {
        Self {
            name: server.planned.key.clone(),
            agent: AgentLoop::new(
                format!("{} agent", server.planned.key),
                model,
                server.planned.role_prompt.clone(),
                max_steps,
            ),
            tools: ConnectionTools {
                connection: Arc::clone(&server.connection),
                tools: server.tools.clone(),
            },
        }
    }
}

#[async_trait]
impl Specialist for SpecialistAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, instruction: &str) -> Result<SpecialistOutput> {
        let outcome = self
            .agent
            .run(&[], instruction, &self.tools, &EventSink::disabled())
            .await?;
        Ok(SpecialistOutput {
            text: outcome.reply,
        })
    }
}

struct ConnectionTools {
    connection: Arc<dyn ToolConnection>,
    tools: Vec<ToolSpec>,
}

#[async_trait]
impl ToolDispatch for ConnectionTools {
    fn tool_specs(&self) -> Vec<ToolSpec> {
        self.tools.clone()
    }

    async fn dispatch(&self, call: &ToolCallRequest, _sink: &EventSink) -> Result<ToolReply> {
        if !self.tools.iter().any(|tool| tool.name == call.name) {
            return Ok(ToolReply::Failure(format!(
                "tool '{}' is not provided by the {} server",
                call.name,
                self.connection.server_name()
            )));
        }

        let arguments = match parse_arguments(&call.arguments) {
            Ok(arguments) => arguments,
            Err(message) => return Ok(ToolReply::Failure(message)),
        };

        let output = self.connection.call_tool(&call.name, arguments).await?;
        tracing::debug!(
            server = %self.connection.server_name(),
            tool = %call.name,
            is_error = output.is_error,
            "Tool call returned"
        );
        if output.is_error {
            Ok(ToolReply::Failure(output.text))
        } else {
            Ok(ToolReply::Success(output.text))
        }
    }
}

fn parse_arguments(raw: &str) -> Result<Map<String, Value>, String> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("tool arguments must be a JSON object, got {other}")),
        Err(err) => Err(format!("tool arguments are not valid JSON: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_arguments_become_an_empty_object() {
        assert!(parse_arguments("  ").expect("blank parses").is_empty());
    }

    #[test]
    fn non_object_arguments_are_rejected() {
        let err = parse_arguments("[1, 2]").unwrap_err();
        assert!(err.contains("JSON object"));
        assert!(parse_arguments("{not json").is_err());
    }

    #[test]
    fn object_arguments_pass_through() {
        let args = parse_arguments(r#"{"timezone":"Australia/Sydney"}"#).expect("object parses");
        assert_eq!(args["timezone"], "Australia/Sydney");
    }
}
