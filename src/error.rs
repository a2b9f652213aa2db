use crate::delegation::DelegationError;
use crate::lifecycle::StartupError;
use crate::registry::RegistryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Config,
    Connection,
    Provider,
    Turn,
    Internal,
}

impl ErrorCategory {
    pub fn code(self) -> &'static str {
        match self {
            ErrorCategory::Config => "CONFIG",
            ErrorCategory::Connection => "CONNECTION",
            ErrorCategory::Provider => "PROVIDER",
            ErrorCategory::Turn => "TURN",
            ErrorCategory::Internal => "INTERNAL",
        }
    }

    pub fn hint(self) -> &'static str {
        match self {
            ErrorCategory::Config => {
                "Set the values named above in the environment or .env, or narrow AGENT_ARMY_CAPABILITIES."
            }
            ErrorCategory::Connection => {
                "Check that uvx/npx are installed and endpoint URLs are reachable; retry with RUST_LOG=info."
            }
            ErrorCategory::Provider => {
                "Set provider credentials (for example OPENAI_API_KEY) or point OPENAI_BASE_URL at a compatible server."
            }
            ErrorCategory::Turn => "Rephrase the request or raise AGENT_ARMY_MAX_STEPS.",
            ErrorCategory::Internal => {
                "Retry with RUST_LOG=debug. If it persists, capture logs and open an issue."
            }
        }
    }
}

pub fn categorize_error(err: &anyhow::Error) -> ErrorCategory {
    if let Some(startup) = err.downcast_ref::<StartupError>() {
        return match startup {
            StartupError::Registry(_) => ErrorCategory::Config,
            StartupError::Connection { .. } => ErrorCategory::Connection,
            StartupError::Delegation(_) => ErrorCategory::Config,
        };
    }
    if err.downcast_ref::<RegistryError>().is_some() {
        return ErrorCategory::Config;
    }
    if err.downcast_ref::<DelegationError>().is_some() {
        return ErrorCategory::Turn;
    }

    let msg = format!("{err:#}").to_ascii_lowercase();

    if msg.contains("api_key")
        || msg.contains("no provider could be auto-detected")
        || msg.contains("model provider")
        || msg.contains("provider")
    {
        return ErrorCategory::Provider;
    }

    if msg.contains("config")
        || msg.contains("max_steps")
        || msg.contains("invalid value")
        || msg.contains("is not set")
    {
        return ErrorCategory::Config;
    }

    if msg.contains("tool server") || msg.contains("mcp") || msg.contains("handshake") {
        return ErrorCategory::Connection;
    }

    if msg.contains("reasoning steps") {
        return ErrorCategory::Turn;
    }

    ErrorCategory::Internal
}

pub fn format_cli_error(err: &anyhow::Error) -> String {
    let category = categorize_error(err);
    format!(
        "[{}] {}\nHint: {}",
        category.code(),
        redact_sensitive_text(&format!("{err:#}")),
        category.hint()
    )
}

/// Masks bearer tokens and `sk-` style keys that may be echoed back by a
/// provider or a tool server.
pub fn redact_sensitive_text(text: &str) -> String {
    let mut out = Vec::new();
    let mut redact_next = false;
    for word in text.split(' ') {
        if redact_next && !word.is_empty() {
            out.push("[REDACTED]".to_string());
            redact_next = false;
            continue;
        }
        if word.eq_ignore_ascii_case("bearer") {
            redact_next = true;
            out.push(word.to_string());
        } else if looks_like_secret_key(word) {
            out.push("[REDACTED]".to_string());
        } else {
            out.push(word.to_string());
        }
    }
    out.join(" ")
}

fn looks_like_secret_key(word: &str) -> bool {
    let token = word.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '-' && c != '_');
    ["sk-", "ghp_", "xoxb-", "fc-"]
        .iter()
        .any(|prefix| token.starts_with(prefix) && token.len() > prefix.len() + 8)
}
