use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::agent::{EventSink, ToolDispatch, ToolReply, TurnEvent};
use crate::conversation::{ToolCallRequest, ToolSpec};
use crate::specialist::Specialist;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DelegationInput {
    /// Complete, self-contained instruction for the specialist agent.
    pub query: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DelegationOutput {
    pub result: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DelegationError {
    #[error("no delegation tool named '{0}'")]
    UnknownTool(String),
    #[error("invalid arguments for {tool}: {message}")]
    InvalidInput { tool: String, message: String },
    #[error("{tool} needs a non-empty query")]
    EmptyQuery { tool: String },
    #[error("{agent} agent failed: {message}")]
    Specialist { agent: String, message: String },
    #[error("delegation tool '{0}' is registered twice")]
    Duplicate(String),
}

/// A callable that hands one query to one specialist.
pub struct DelegationTool {
    name: String,
    description: String,
    specialist: Arc<dyn Specialist>,
}

impl DelegationTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        specialist: Arc<dyn Specialist>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            specialist,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn agent(&self) -> &str {
        self.specialist.name()
    }

    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: input_schema(),
        }
    }

    pub fn parse_input(&self, raw: &str) -> Result<DelegationInput, DelegationError> {
        let input = serde_json::from_str::<DelegationInput>(raw).map_err(|err| {
            DelegationError::InvalidInput {
                tool: self.name.clone(),
                message: err.to_string(),
            }
        })?;
        if input.query.trim().is_empty() {
            return Err(DelegationError::EmptyQuery {
                tool: self.name.clone(),
            });
        }
        Ok(input)
    }

    pub async fn invoke(
        &self,
        input: DelegationInput,
    ) -> Result<DelegationOutput, DelegationError> {
        let agent = self.specialist.name().to_string();
        tracing::info!(tool = %self.name, agent = %agent, "Delegation requested");
        match self.specialist.run(&input.query).await {
            Ok(output) => {
                tracing::info!(tool = %self.name, agent = %agent, "Delegation completed");
                Ok(DelegationOutput {
                    result: output.text,
                })
            }
            Err(err) => Err(DelegationError::Specialist {
                agent,
                message: format!("{err:#}"),
            }),
        }
    }
}

/// JSON schema of [`DelegationInput`] as tool parameters.
pub fn input_schema() -> Value {
    let mut schema = serde_json::to_value(schemars::schema_for!(DelegationInput))
        .unwrap_or_else(|_| serde_json::json!({ "type": "object" }));
    if let Some(obj) = schema.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    schema
}

/// Fixed-at-startup map from tool name to delegation tool.
#[derive(Default)]
pub struct DelegationTable {
    tools: BTreeMap<String, DelegationTool>,
}

impl DelegationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tool: DelegationTool) -> Result<(), DelegationError> {
        if self.tools.contains_key(tool.name()) {
            return Err(DelegationError::Duplicate(tool.name().to_string()));
        }
        self.tools.insert(tool.name().to_string(), tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&DelegationTool> {
        self.tools.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn tools(&self) -> impl Iterator<Item = &DelegationTool> {
        self.tools.values()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolDispatch for DelegationTable {
    fn tool_specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(DelegationTool::spec).collect()
    }

    async fn dispatch(&self, call: &ToolCallRequest, sink: &EventSink) -> Result<ToolReply> {
        let Some(tool) = self.get(&call.name) else {
            return Ok(ToolReply::Failure(
                DelegationError::UnknownTool(call.name.clone()).to_string(),
            ));
        };
        let input = match tool.parse_input(&call.arguments) {
            Ok(input) => input,
            Err(err) => return Ok(ToolReply::Failure(err.to_string())),
        };

        sink.emit(TurnEvent::DelegationStarted {
            agent: tool.agent().to_string(),
            query: input.query.clone(),
        });

        match tool.invoke(input).await {
            Ok(output) => Ok(ToolReply::Success(serde_json::to_string(&output)?)),
            Err(err) => {
                tracing::warn!(tool = %call.name, call_id = %call.id, error = %err, "Delegation failed");
                Ok(ToolReply::Failure(err.to_string()))
            }
        }
    }
}
