use anyhow::Context as _;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::agents::llm::{DisabledGenerator, OpenRouterGenerator, TextGenerator};

const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";
const DEFAULT_LLM_TIMEOUT_SECS: u64 = 15;
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_DATA_DIR: &str = "data";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Process-wide settings, read once at startup and handed to each component.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub openrouter_api_key: Option<String>,
    pub llm_model: String,
    pub llm_timeout: Duration,
    pub data_dir: PathBuf,
    pub port: u16,
    pub log_format: LogFormat,
}

impl ServiceConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup so parsing can be tested
    /// without touching the process environment.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let openrouter_api_key = lookup("OPENROUTER_API_KEY")
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        let llm_model = lookup("LLM_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let llm_timeout_secs: u64 =
            parse_or(&lookup, "LLM_TIMEOUT_SECS", DEFAULT_LLM_TIMEOUT_SECS)?;
        let port: u16 = parse_or(&lookup, "PORT", DEFAULT_PORT)?;

        let data_dir = lookup("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

        let log_format = match lookup("LOG_FORMAT").as_deref() {
            Some("pretty") => LogFormat::Pretty,
            _ => LogFormat::Json,
        };

        Ok(Self {
            openrouter_api_key,
            llm_model,
            llm_timeout: Duration::from_secs(llm_timeout_secs),
            data_dir,
            port,
            log_format,
        })
    }

    /// The generation client every agent shares. Without a key, every call
    /// takes its scripted fallback.
    pub fn text_generator(&self) -> Arc<dyn TextGenerator> {
        match &self.openrouter_api_key {
            Some(api_key) => Arc::new(OpenRouterGenerator::new(
                api_key,
                self.llm_model.clone(),
                self.llm_timeout,
            )),
            None => {
                warn!("OPENROUTER_API_KEY not set, replies will use scripted fallbacks");
                Arc::new(DisabledGenerator)
            }
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = ServiceConfig::from_lookup(lookup_from(&[])).unwrap();
        assert!(config.openrouter_api_key.is_none());
        assert_eq!(config.llm_model, DEFAULT_MODEL);
        assert_eq!(config.llm_timeout, Duration::from_secs(15));
        assert_eq!(config.port, 3000);
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn explicit_values_override_defaults() {
        let config = ServiceConfig::from_lookup(lookup_from(&[
            ("OPENROUTER_API_KEY", " sk-test "),
            ("LLM_TIMEOUT_SECS", "3"),
            ("PORT", "8000"),
            ("DATA_DIR", "/tmp/roadside"),
            ("LOG_FORMAT", "pretty"),
        ]))
        .unwrap();
        assert_eq!(config.openrouter_api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.llm_timeout, Duration::from_secs(3));
        assert_eq!(config.port, 8000);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/roadside"));
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        let config =
            ServiceConfig::from_lookup(lookup_from(&[("OPENROUTER_API_KEY", "  ")])).unwrap();
        assert!(config.openrouter_api_key.is_none());
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err = ServiceConfig::from_lookup(lookup_from(&[("PORT", "eighty")])).unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }
}
