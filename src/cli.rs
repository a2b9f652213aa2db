use clap::{Parser, ValueEnum};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Auto,
    Openai,
    Ollama,
    Deepseek,
    Groq,
}

const CLI_EXAMPLES: &str = "Examples:\n\
  agent-army\n\
  AGENT_ARMY_CAPABILITIES=time,search agent-army\n\
  LOCAL_FILE_DIR=$HOME/notes agent-army --model gpt-4.1\n\
  OPENAI_BASE_URL=http://localhost:11434/v1 agent-army --model llama3.2\n\
\n\
Capabilities are enabled by their configuration values:\n\
  time        always (TIME_LOCAL_TIMEZONE, default Australia/Sydney)\n\
  search      BRAVE_API_KEY\n\
  filesystem  LOCAL_FILE_DIR\n\
  crawl       CRAWL4AI_RAG_URL\n\
  airtable    AIRTABLE_API_KEY\n\
  github      GITHUB_TOKEN\n\
  slack       SLACK_BOT_TOKEN + SLACK_TEAM_ID\n\
  firecrawl   FIRECRAWL_API_KEY\n\
\n\
In chat, type exit, quit, bye or goodbye to leave; /help lists local commands.";

/// Every setting is optional and env-backed; running with no flags is the
/// normal way to start.
#[derive(Debug, Clone, Parser)]
#[command(name = "agent-army")]
#[command(about = "Primary agent that delegates to MCP-backed specialist agents")]
#[command(after_long_help = CLI_EXAMPLES)]
pub struct Cli {
    #[arg(long, env = "AGENT_ARMY_PROVIDER", value_enum, default_value_t = Provider::Auto)]
    pub provider: Provider,

    #[arg(long, env = "AGENT_ARMY_MODEL")]
    pub model: Option<String>,

    /// Comma-separated capability keys; unset enables every configured one.
    #[arg(long, env = "AGENT_ARMY_CAPABILITIES", value_delimiter = ',')]
    pub capabilities: Option<Vec<String>>,

    #[arg(long, env = "AGENT_ARMY_MAX_STEPS")]
    pub max_steps: Option<usize>,

    #[arg(long, env = "AGENT_ARMY_TOOL_TIMEOUT_SECS")]
    pub tool_timeout_secs: Option<u64>,

    #[arg(long, env = "AGENT_ARMY_CONFIG", default_value = ".agent-army/config.toml")]
    pub config_path: String,

    #[arg(long, env = "RUST_LOG", default_value = "warn")]
    pub log_filter: String,
}
