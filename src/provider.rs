use std::sync::Arc;

use anyhow::{Context, Result};

use crate::cli::Provider;
use crate::config::RuntimeConfig;
use crate::model::openai::DEFAULT_OPENAI_BASE_URL;
use crate::model::{ModelClient, OpenAiCompatibleClient};

pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";

/// Builds the model client every agent in the session shares.
pub fn resolve_model(cfg: &RuntimeConfig) -> Result<(Arc<dyn ModelClient>, Provider, String)> {
    let provider = match cfg.provider {
        Provider::Auto => detect_provider().context(
            "no provider could be auto-detected. Set OPENAI_API_KEY (optionally with \
             OPENAI_BASE_URL), DEEPSEEK_API_KEY, GROQ_API_KEY, or OLLAMA_HOST",
        )?,
        p => p,
    };

    let (api_key, base_url, default_model) = match provider {
        Provider::Openai => {
            let base_url = env_value("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string());
            let api_key = env_value("OPENAI_API_KEY");
            // A custom base URL usually points at a local OpenAI-compatible
            // server that does not check keys.
            if api_key.is_none() && base_url == DEFAULT_OPENAI_BASE_URL {
                return Err(anyhow::anyhow!(
                    "OPENAI_API_KEY is required for OpenAI provider"
                ));
            }
            (api_key, base_url, DEFAULT_MODEL)
        }
        Provider::Deepseek => {
            let api_key = env_value("DEEPSEEK_API_KEY")
                .context("DEEPSEEK_API_KEY is required for DeepSeek provider")?;
            (Some(api_key), "https://api.deepseek.com/v1".to_string(), "deepseek-chat")
        }
        Provider::Groq => {
            let api_key = env_value("GROQ_API_KEY")
                .context("GROQ_API_KEY is required for Groq provider")?;
            (
                Some(api_key),
                "https://api.groq.com/openai/v1".to_string(),
                "llama-3.3-70b-versatile",
            )
        }
        Provider::Ollama => {
            let host = env_value("OLLAMA_HOST")
                .unwrap_or_else(|| "http://localhost:11434".to_string());
            (None, format!("{}/v1", host.trim_end_matches('/')), "llama3.2")
        }
        Provider::Auto => {
            return Err(anyhow::anyhow!("provider auto-detection returned 'auto'"));
        }
    };

    let model_name = cfg
        .model
        .clone()
        .unwrap_or_else(|| default_model.to_string());
    validate_model_for_provider(provider, &model_name)?;

    let client = OpenAiCompatibleClient::new(api_key, base_url, model_name.clone());
    Ok((Arc::new(client), provider, model_name))
}

pub fn validate_model_for_provider(provider: Provider, model_name: &str) -> Result<()> {
    if model_name.trim().is_empty() {
        return Err(anyhow::anyhow!(
            "model name cannot be empty for provider '{:?}'",
            provider
        ));
    }
    let is_valid = match provider {
        Provider::Deepseek => model_name.starts_with("deepseek"),
        Provider::Openai | Provider::Groq | Provider::Ollama | Provider::Auto => true,
    };

    if is_valid {
        return Ok(());
    }

    Err(anyhow::anyhow!(
        "model '{}' is not compatible with provider '{:?}'",
        model_name,
        provider
    ))
}

pub fn detect_provider() -> Option<Provider> {
    if env_present("OPENAI_API_KEY") || env_present("OPENAI_BASE_URL") {
        return Some(Provider::Openai);
    }
    if env_present("DEEPSEEK_API_KEY") {
        return Some(Provider::Deepseek);
    }
    if env_present("GROQ_API_KEY") {
        return Some(Provider::Groq);
    }
    if env_present("OLLAMA_HOST") {
        return Some(Provider::Ollama);
    }
    None
}

pub fn env_present(key: &str) -> bool {
    env_value(key).is_some()
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deepseek_rejects_foreign_model_names() {
        assert!(validate_model_for_provider(Provider::Deepseek, "deepseek-chat").is_ok());
        let err = validate_model_for_provider(Provider::Deepseek, "gpt-4.1").unwrap_err();
        assert!(err.to_string().contains("not compatible"));
    }

    #[test]
    fn empty_model_name_is_rejected() {
        assert!(validate_model_for_provider(Provider::Openai, "  ").is_err());
    }
}
