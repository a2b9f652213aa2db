use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Local};

use crate::agent::{AgentLoop, EventSink, TurnOutcome};
use crate::conversation::ConversationState;
use crate::delegation::DelegationTable;
use crate::model::ModelClient;

/// The primary agent. It answers directly or delegates through its table.
pub struct Controller {
    agent: AgentLoop,
    delegations: DelegationTable,
}

impl Controller {
    pub fn new(
        model: Arc<dyn ModelClient>,
        delegations: DelegationTable,
        max_steps: usize,
        now: DateTime<Local>,
    ) -> Self {
        let prompt = controller_prompt(&delegations, now);
        Self {
            agent: AgentLoop::new("controller", model, prompt, max_steps),
            delegations,
        }
    }

    pub fn delegations(&self) -> &DelegationTable {
        &self.delegations
    }

    pub fn system_prompt(&self) -> &str {
        self.agent.system_prompt()
    }

    pub async fn handle(
        &self,
        user_text: &str,
        history: &ConversationState,
        sink: &EventSink,
    ) -> Result<TurnOutcome> {
        let outcome = self
            .agent
            .run(history.messages(), user_text, &self.delegations, sink)
            .await?;
        tracing::info!(
            messages = outcome.messages.len(),
            reply_chars = outcome.reply.chars().count(),
            "Turn completed"
        );
        Ok(outcome)
    }
}

pub fn controller_prompt(delegations: &DelegationTable, now: DateTime<Local>) -> String {
    let mut prompt = String::from(
        "You coordinate a team of specialist agents to answer the user's requests.\n\n",
    );
    prompt.push_str(&format!(
        "Current local date and time: {} ({})\n\n",
        now.format("%Y-%m-%d %H:%M:%S"),
        now.format("%A")
    ));

    if delegations.is_empty() {
        prompt.push_str("No specialist agents are available; answer from your own knowledge.\n");
    } else {
        prompt.push_str("Specialists you can delegate to:\n");
        for tool in delegations.tools() {
            let spec = tool.spec();
            prompt.push_str(&format!("- {}: {}\n", spec.name, spec.description));
        }
    }

    prompt.push_str(
        "\nGuidelines:\n\
         - Delegate whenever a request needs live data, files or actions a specialist provides.\n\
         - Give each specialist a complete instruction; it cannot see this conversation.\n\
         - Independent sub-tasks may be delegated in the same step.\n\
         - If a specialist reports an error, explain what failed and suggest an alternative.\n\
         - Combine the specialists' results into one clear answer and say which agent supplied what.\n\
         - Use the current date above for words like today, recent or this week.\n",
    );
    prompt
}
