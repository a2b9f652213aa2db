use std::collections::{BTreeMap, HashMap, HashSet};

use thiserror::Error;

use crate::config::McpServerConfig;

pub const DEFAULT_TIMEZONE: &str = "Australia/Sydney";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Time,
    Search,
    Filesystem,
    CrawlRag,
    Airtable,
    Github,
    Slack,
    Firecrawl,
}

impl Capability {
    pub const ALL: [Capability; 8] = [
        Capability::Time,
        Capability::Search,
        Capability::Filesystem,
        Capability::CrawlRag,
        Capability::Airtable,
        Capability::Github,
        Capability::Slack,
        Capability::Firecrawl,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Capability::Time => "time",
            Capability::Search => "search",
            Capability::Filesystem => "filesystem",
            Capability::CrawlRag => "crawl",
            Capability::Airtable => "airtable",
            Capability::Github => "github",
            Capability::Slack => "slack",
            Capability::Firecrawl => "firecrawl",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        let key = key.trim();
        Self::ALL
            .into_iter()
            .find(|cap| cap.key().eq_ignore_ascii_case(key))
    }

    pub fn label(self) -> &'static str {
        match self {
            Capability::Time => "Time",
            Capability::Search => "Brave Search",
            Capability::Filesystem => "Filesystem",
            Capability::CrawlRag => "Crawl4AI RAG",
            Capability::Airtable => "Airtable",
            Capability::Github => "GitHub",
            Capability::Slack => "Slack",
            Capability::Firecrawl => "Firecrawl",
        }
    }

    pub fn tool_name(self) -> String {
        delegation_tool_name(self.key())
    }

    /// Values that must be present for the capability to start. The first
    /// entry is the trigger used by automatic selection.
    pub fn required_values(self) -> &'static [&'static str] {
        match self {
            Capability::Time => &[],
            Capability::Search => &["BRAVE_API_KEY"],
            Capability::Filesystem => &["LOCAL_FILE_DIR"],
            Capability::CrawlRag => &["CRAWL4AI_RAG_URL"],
            Capability::Airtable => &["AIRTABLE_API_KEY"],
            Capability::Github => &["GITHUB_TOKEN"],
            Capability::Slack => &["SLACK_BOT_TOKEN", "SLACK_TEAM_ID"],
            Capability::Firecrawl => &["FIRECRAWL_API_KEY"],
        }
    }

    /// Shown to the controller model as the delegation tool's description.
    pub fn description(self) -> &'static str {
        match self {
            Capability::Time => {
                "Ask the time agent for the current time, timezone conversions or date arithmetic. \
                 Pass a complete instruction as `query`."
            }
            Capability::Search => {
                "Ask the web search agent to research a topic, check facts or find recent news. \
                 Pass a complete instruction as `query`."
            }
            Capability::Filesystem => {
                "Ask the filesystem agent to list, read, write or organise files in the \
                 configured local directory. Pass a complete instruction as `query`."
            }
            Capability::CrawlRag => {
                "Ask the crawl agent to crawl web pages into the knowledge base or answer \
                 questions from already crawled content. Pass a complete instruction as `query`."
            }
            Capability::Airtable => {
                "Ask the Airtable agent to read, create or update records in Airtable bases. \
                 Pass a complete instruction as `query`."
            }
            Capability::Github => {
                "Ask the GitHub agent about repositories, issues, pull requests and files on GitHub. \
                 Pass a complete instruction as `query`."
            }
            Capability::Slack => {
                "Ask the Slack agent to read channels or post messages in the Slack workspace. \
                 Pass a complete instruction as `query`."
            }
            Capability::Firecrawl => {
                "Ask the Firecrawl agent to scrape or extract structured data from websites. \
                 Pass a complete instruction as `query`."
            }
        }
    }

    pub fn role_prompt(self) -> &'static str {
        match self {
            Capability::Time => {
                "You are the time specialist. Use your tools to answer questions about the current \
                 time, time zones, conversions between them and date arithmetic. Always state the \
                 timezone you answer in and keep results precise."
            }
            Capability::Search => {
                "You are the web search specialist. Search the web with your tools, prefer recent \
                 and authoritative sources, and answer with a short summary followed by the source \
                 links you relied on."
            }
            Capability::Filesystem => {
                "You are the filesystem specialist. Use your tools to inspect and manage files in \
                 the directories you were given access to. Report paths exactly and never claim a \
                 file changed unless a tool confirmed it."
            }
            Capability::CrawlRag => {
                "You are the crawl and retrieval specialist. Crawl pages into the knowledge base \
                 when asked and answer questions by querying the stored content. Cite the URLs the \
                 answer came from."
            }
            Capability::Airtable => {
                "You are the Airtable specialist. Use your tools to find bases and tables and to \
                 read or change records. Describe every change you made."
            }
            Capability::Github => {
                "You are the GitHub specialist. Use your tools to look up repositories, issues, pull \
                 requests and file contents. Include links to what you found."
            }
            Capability::Slack => {
                "You are the Slack specialist. Use your tools to read channels and threads or post \
                 messages. Confirm the channel before posting anything."
            }
            Capability::Firecrawl => {
                "You are the Firecrawl specialist. Use your tools to scrape pages and extract the \
                 requested data. Return the extracted content in a clean, readable form."
            }
        }
    }
}

pub fn delegation_tool_name(key: &str) -> String {
    format!("use_{}_agent", key.to_ascii_lowercase().replace('-', "_"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilitySelection {
    /// Enable every capability whose trigger value is present.
    Auto,
    /// Enable exactly the listed keys, built-in or custom; each built-in
    /// one must be fully configured.
    Explicit(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerKind {
    Launch {
        command: String,
        args: Vec<String>,
        env: BTreeMap<String, String>,
    },
    Endpoint {
        url: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolServerSpec {
    pub capability: String,
    pub kind: ServerKind,
}

impl ToolServerSpec {
    /// Human-readable target for logs; never includes env values.
    pub fn describe(&self) -> String {
        match &self.kind {
            ServerKind::Launch { command, args, .. } => {
                if args.is_empty() {
                    command.clone()
                } else {
                    format!("{} {}", command, args.join(" "))
                }
            }
            ServerKind::Endpoint { url } => url.clone(),
        }
    }
}

/// One enabled, fully resolved entry of the startup plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedServer {
    pub key: String,
    pub label: String,
    pub tool_name: String,
    pub description: String,
    pub role_prompt: String,
    pub spec: ToolServerSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error(
        "unknown capability '{0}'. Known capabilities: time, search, filesystem, crawl, airtable, github, slack, firecrawl"
    )]
    UnknownCapability(String),
    #[error("more than one tool server is registered as '{0}'")]
    DuplicateServer(String),
    #[error("{capability} is enabled but {missing} is not set")]
    NotConfigured { capability: String, missing: String },
}

/// Maps capability names to tool-server specs using a snapshot of
/// configuration values. Building specs never touches the network or
/// spawns anything.
#[derive(Debug, Clone, Default)]
pub struct ToolServerRegistry {
    values: HashMap<String, String>,
}

impl ToolServerRegistry {
    pub fn from_env() -> Self {
        Self::new(std::env::vars().collect())
    }

    pub fn new(values: HashMap<String, String>) -> Self {
        Self { values }
    }

    fn value(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn require(&self, capability: Capability, key: &str) -> Result<String, RegistryError> {
        self.value(key)
            .map(str::to_string)
            .ok_or_else(|| RegistryError::NotConfigured {
                capability: capability.key().to_string(),
                missing: key.to_string(),
            })
    }

    pub fn resolve(&self, capability: Capability) -> Result<ToolServerSpec, RegistryError> {
        let kind = match capability {
            Capability::Time => {
                let tz = self
                    .value("TIME_LOCAL_TIMEZONE")
                    .unwrap_or(DEFAULT_TIMEZONE);
                launch(
                    "uvx",
                    &["mcp-server-time", &format!("--local-timezone={tz}")],
                    [],
                )
            }
            Capability::Search => {
                let key = self.require(capability, "BRAVE_API_KEY")?;
                launch(
                    "npx",
                    &["-y", "@modelcontextprotocol/server-brave-search"],
                    [("BRAVE_API_KEY", key)],
                )
            }
            Capability::Filesystem => {
                let dir = self.require(capability, "LOCAL_FILE_DIR")?;
                launch(
                    "npx",
                    &["-y", "@modelcontextprotocol/server-filesystem", &dir],
                    [],
                )
            }
            Capability::CrawlRag => ServerKind::Endpoint {
                url: self.require(capability, "CRAWL4AI_RAG_URL")?,
            },
            Capability::Airtable => {
                let key = self.require(capability, "AIRTABLE_API_KEY")?;
                launch(
                    "npx",
                    &["-y", "airtable-mcp-server"],
                    [("AIRTABLE_API_KEY", key)],
                )
            }
            Capability::Github => {
                let token = self.require(capability, "GITHUB_TOKEN")?;
                launch(
                    "npx",
                    &["-y", "@modelcontextprotocol/server-github"],
                    [("GITHUB_PERSONAL_ACCESS_TOKEN", token)],
                )
            }
            Capability::Slack => {
                let token = self.require(capability, "SLACK_BOT_TOKEN")?;
                let team = self.require(capability, "SLACK_TEAM_ID")?;
                launch(
                    "npx",
                    &["-y", "@modelcontextprotocol/server-slack"],
                    [("SLACK_BOT_TOKEN", token), ("SLACK_TEAM_ID", team)],
                )
            }
            Capability::Firecrawl => {
                let key = self.require(capability, "FIRECRAWL_API_KEY")?;
                launch(
                    "npx",
                    &["-y", "firecrawl-mcp"],
                    [("FIRECRAWL_API_KEY", key)],
                )
            }
        };

        Ok(ToolServerSpec {
            capability: capability.label().to_string(),
            kind,
        })
    }

    /// Builds the ordered startup plan: built-in capabilities first, then the
    /// enabled custom servers in file order. An explicit selection also
    /// filters custom servers by name.
    pub fn plan(
        &self,
        selection: &CapabilitySelection,
        custom: &[McpServerConfig],
    ) -> Result<Vec<PlannedServer>, RegistryError> {
        let custom_names = custom
            .iter()
            .map(|server| server.name.trim().to_ascii_lowercase())
            .collect::<HashSet<_>>();

        let mut listed = None;
        let capabilities = match selection {
            CapabilitySelection::Auto => Capability::ALL
                .into_iter()
                .filter(|cap| match cap.required_values().first() {
                    Some(trigger) => self.value(trigger).is_some(),
                    None => true,
                })
                .collect::<Vec<_>>(),
            CapabilitySelection::Explicit(keys) => {
                let mut seen = HashSet::new();
                let mut caps = Vec::new();
                for key in keys {
                    let normalized = key.trim().to_ascii_lowercase();
                    if !seen.insert(normalized.clone()) {
                        return Err(RegistryError::DuplicateServer(normalized));
                    }
                    match Capability::from_key(&normalized) {
                        Some(cap) => caps.push(cap),
                        None if custom_names.contains(&normalized) => {}
                        None => return Err(RegistryError::UnknownCapability(key.clone())),
                    }
                }
                listed = Some(seen);
                caps
            }
        };

        let mut plan = Vec::new();
        let mut tool_names = HashSet::new();
        for cap in capabilities {
            let spec = self.resolve(cap)?;
            let tool_name = cap.tool_name();
            tool_names.insert(tool_name.clone());
            plan.push(PlannedServer {
                key: cap.key().to_string(),
                label: cap.label().to_string(),
                tool_name,
                description: cap.description().to_string(),
                role_prompt: cap.role_prompt().to_string(),
                spec,
            });
        }

        let selected = |server: &&McpServerConfig| {
            server.is_enabled()
                && listed
                    .as_ref()
                    .is_none_or(|names| names.contains(&server.name.trim().to_ascii_lowercase()))
        };
        for server in custom.iter().filter(selected) {
            let planned = self.plan_custom(server)?;
            if Capability::from_key(&planned.key).is_some()
                || !tool_names.insert(planned.tool_name.clone())
            {
                return Err(RegistryError::DuplicateServer(planned.key));
            }
            plan.push(planned);
        }

        Ok(plan)
    }

    fn plan_custom(&self, server: &McpServerConfig) -> Result<PlannedServer, RegistryError> {
        let key = server.name.trim().to_ascii_lowercase();
        let expand = |value: &str| {
            expand_vars(value, &self.values).map_err(|missing| RegistryError::NotConfigured {
                capability: key.clone(),
                missing,
            })
        };

        let kind = match (&server.command, &server.url) {
            (Some(command), _) => ServerKind::Launch {
                command: expand(command)?,
                args: server
                    .args
                    .iter()
                    .map(|arg| expand(arg))
                    .collect::<Result<Vec<_>, _>>()?,
                env: server
                    .env
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), expand(v)?)))
                    .collect::<Result<BTreeMap<_, _>, RegistryError>>()?,
            },
            (None, Some(url)) => ServerKind::Endpoint { url: expand(url)? },
            (None, None) => {
                return Err(RegistryError::NotConfigured {
                    capability: key,
                    missing: "command or url".to_string(),
                });
            }
        };

        let label = server.name.trim().to_string();
        Ok(PlannedServer {
            tool_name: delegation_tool_name(&key),
            description: server.description.clone().unwrap_or_else(|| {
                format!(
                    "Ask the {label} agent to handle a task with the {label} tool server. \
                     Pass a complete instruction as `query`."
                )
            }),
            role_prompt: server.role.clone().unwrap_or_else(|| {
                format!(
                    "You are the {label} specialist. Use the tools of the {label} server to carry \
                     out the instruction and report the results concisely."
                )
            }),
            spec: ToolServerSpec {
                capability: label.clone(),
                kind,
            },
            label,
            key,
        })
    }
}

fn launch<const N: usize>(
    command: &str,
    args: &[&str],
    env: [(&str, String); N],
) -> ServerKind {
    ServerKind::Launch {
        command: command.to_string(),
        args: args.iter().map(|a| a.to_string()).collect(),
        env: env
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
    }
}

/// Replaces `${NAME}` references; returns the first missing name.
fn expand_vars(value: &str, values: &HashMap<String, String>) -> Result<String, String> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start + 2..].find('}') else {
            break;
        };
        let name = &rest[start + 2..start + 2 + len];
        let resolved = values
            .get(name)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| name.to_string())?;
        out.push_str(&rest[..start]);
        out.push_str(resolved);
        rest = &rest[start + 3 + len..];
    }
    out.push_str(rest);
    Ok(out)
}
