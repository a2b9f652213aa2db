use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::cli::{Cli, Provider};
use crate::registry::CapabilitySelection;

pub const DEFAULT_MAX_STEPS: usize = 12;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub config_path: String,
    pub provider: Provider,
    pub model: Option<String>,
    pub capabilities: CapabilitySelection,
    pub max_steps: usize,
    pub tool_timeout: Option<Duration>,
    pub servers: Vec<McpServerConfig>,
}

/// Optional TOML file layered under flags and environment values.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub provider: Option<Provider>,
    pub model: Option<String>,
    pub capabilities: Option<Vec<String>>,
    pub max_steps: Option<usize>,
    pub tool_timeout_secs: Option<u64>,
    #[serde(default)]
    pub servers: Vec<McpServerConfig>,
}

/// A user-declared tool server with its own specialist.
///
/// Exactly one of `command` or `url` must be set. `env` values may reference
/// process variables as `${NAME}`; they are expanded when the plan is built.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct McpServerConfig {
    pub name: String,
    pub description: Option<String>,
    pub role: Option<String>,
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub url: Option<String>,
    pub enabled: Option<bool>,
}

impl McpServerConfig {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}

pub fn load_config_file(config_path: &str) -> Result<ConfigFile> {
    let path = Path::new(config_path);
    if !path.exists() {
        return Ok(ConfigFile::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at '{}'", path.display()))?;
    toml::from_str::<ConfigFile>(&content).with_context(|| {
        format!(
            "invalid configuration in '{}'. Check field names and server entries.",
            path.display()
        )
    })
}

pub fn resolve_runtime_config(cli: &Cli, file: ConfigFile) -> Result<RuntimeConfig> {
    let provider = if cli.provider != Provider::Auto {
        cli.provider
    } else {
        file.provider.unwrap_or(Provider::Auto)
    };

    let capability_keys = cli
        .capabilities
        .clone()
        .or(file.capabilities)
        .map(|keys| {
            keys.into_iter()
                .map(|key| key.trim().to_ascii_lowercase())
                .filter(|key| !key.is_empty())
                .collect::<Vec<String>>()
        });
    let capabilities = match capability_keys {
        Some(keys) if !keys.is_empty() => CapabilitySelection::Explicit(keys),
        _ => CapabilitySelection::Auto,
    };

    let max_steps = cli
        .max_steps
        .or(file.max_steps)
        .unwrap_or(DEFAULT_MAX_STEPS);
    if max_steps == 0 {
        return Err(anyhow::anyhow!(
            "max_steps must be at least 1 (AGENT_ARMY_MAX_STEPS)"
        ));
    }

    let tool_timeout = cli
        .tool_timeout_secs
        .or(file.tool_timeout_secs)
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs);

    for server in &file.servers {
        validate_server_entry(server)?;
    }

    Ok(RuntimeConfig {
        config_path: cli.config_path.clone(),
        provider,
        model: cli
            .model
            .clone()
            .or(file.model)
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty()),
        capabilities,
        max_steps,
        tool_timeout,
        servers: file.servers,
    })
}

fn validate_server_entry(server: &McpServerConfig) -> Result<()> {
    let name = server.name.trim();
    if name.is_empty() {
        return Err(anyhow::anyhow!("server entries in the config file need a name"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(anyhow::anyhow!(
            "server name '{}' may only contain ASCII letters, digits, '-' and '_'",
            name
        ));
    }
    match (&server.command, &server.url) {
        (Some(_), None) | (None, Some(_)) => Ok(()),
        (Some(_), Some(_)) => Err(anyhow::anyhow!(
            "server '{}' sets both command and url; choose one",
            name
        )),
        (None, None) => Err(anyhow::anyhow!(
            "server '{}' needs either a command or a url",
            name
        )),
    }
}
