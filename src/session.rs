use std::sync::Arc;

use anyhow::Result;
use chrono::Local;

use crate::agent::{EventSink, TurnOutcome};
use crate::config::RuntimeConfig;
use crate::controller::Controller;
use crate::conversation::ConversationState;
use crate::delegation::{DelegationTable, DelegationTool};
use crate::lifecycle::{ConnectionStack, StartupError};
use crate::mcp::Connector;
use crate::model::ModelClient;
use crate::registry::ToolServerRegistry;
use crate::specialist::SpecialistAgent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub model: String,
    pub specialists: Vec<String>,
    pub turns: usize,
    pub messages: usize,
}

/// One interactive session: the controller, the connections its
/// specialists use, and the conversation so far.
pub struct ControllerSession {
    controller: Controller,
    stack: ConnectionStack,
    history: ConversationState,
    model_name: String,
}

/// Plans the enabled tool servers, opens them, and wires a specialist and a
/// delegation tool to each. Planning failures return before any server is
/// contacted.
pub async fn assemble(
    cfg: &RuntimeConfig,
    registry: &ToolServerRegistry,
    connector: &dyn Connector,
    model: Arc<dyn ModelClient>,
) -> Result<ControllerSession, StartupError> {
    let plan = registry.plan(&cfg.capabilities, &cfg.servers)?;
    tracing::info!(
        servers = %plan.iter().map(|p| p.key.as_str()).collect::<Vec<_>>().join(","),
        "Tool servers planned"
    );

    let mut stack = ConnectionStack::open_all(connector, &plan).await?;

    let tools = stack
        .servers()
        .iter()
        .map(|server| {
            let specialist = SpecialistAgent::new(server, Arc::clone(&model), cfg.max_steps);
            DelegationTool::new(
                server.planned.tool_name.clone(),
                server.planned.description.clone(),
                Arc::new(specialist),
            )
        })
        .collect::<Vec<_>>();

    let mut table = DelegationTable::new();
    for tool in tools {
        if let Err(err) = table.insert(tool) {
            if let Err(close_err) = stack.close_all().await {
                tracing::warn!(error = %close_err, "Unwinding after startup failure was incomplete");
            }
            return Err(err.into());
        }
    }

    let model_name = model.model_name().to_string();
    let controller = Controller::new(model, table, cfg.max_steps, Local::now());
    Ok(ControllerSession {
        controller,
        stack,
        history: ConversationState::new(),
        model_name,
    })
}

impl ControllerSession {
    /// Runs one turn. History grows only when the turn succeeds.
    pub async fn handle(&mut self, user_text: &str, sink: &EventSink) -> Result<TurnOutcome> {
        let outcome = self
            .controller
            .handle(user_text, &self.history, sink)
            .await?;
        self.history.append_turn(outcome.messages.clone());
        Ok(outcome)
    }

    pub fn history(&self) -> &ConversationState {
        &self.history
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn delegation_names(&self) -> Vec<String> {
        self.controller
            .delegations()
            .names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            model: self.model_name.clone(),
            specialists: self
                .stack
                .servers()
                .iter()
                .map(|server| server.planned.key.clone())
                .collect(),
            turns: self.history.turns(),
            messages: self.history.len(),
        }
    }

    /// Closes every tool-server connection. Safe to call more than once.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.stack.close_all().await
    }
}
