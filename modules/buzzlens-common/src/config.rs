use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::info;

use crate::error::BuzzError;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Generator
    pub openai_api_key: String,
    pub openai_api_base: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub retry_budget: u32,
    pub timeout: Duration,

    // Analysis
    pub topic: String,
    pub min_reply_len: usize,
    pub classify_concurrency: usize,
    pub tagging_concurrency: usize,
    pub merge_concurrency: usize,
    pub distribute_concurrency: usize,

    // Storage
    pub data_dir: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, BuzzError> {
        Ok(Self {
            openai_api_key: required_env("OPENAI_API_KEY")?,
            openai_api_base: env::var("OPENAI_API_BASE").ok().filter(|v| !v.is_empty()),
            model: env::var("BUZZLENS_MODEL").unwrap_or_else(|_| "gpt-4.1-mini".to_string()),
            temperature: parsed_env("BUZZLENS_TEMPERATURE", 0.8)?,
            retry_budget: parsed_env("BUZZLENS_RETRY_BUDGET", 3)?,
            timeout: Duration::from_secs(parsed_env("BUZZLENS_TIMEOUT_SECS", 300)?),
            topic: env::var("BUZZLENS_TOPIC").unwrap_or_else(|_| "hotels".to_string()),
            min_reply_len: parsed_env("BUZZLENS_MIN_REPLY_LEN", 10)?,
            classify_concurrency: parsed_env("BUZZLENS_CLASSIFY_CONCURRENCY", 200)?,
            tagging_concurrency: parsed_env("BUZZLENS_TAGGING_CONCURRENCY", 500)?,
            merge_concurrency: parsed_env("BUZZLENS_MERGE_CONCURRENCY", 20)?,
            distribute_concurrency: parsed_env("BUZZLENS_DISTRIBUTE_CONCURRENCY", 200)?,
            data_dir: env::var("BUZZLENS_DATA_DIR").unwrap_or_else(|_| "data".to_string()),
        })
    }

    /// Log the effective configuration with the API key masked.
    pub fn log_redacted(&self) {
        info!(
            openai_api_key = %redact(&self.openai_api_key),
            openai_api_base = self.openai_api_base.as_deref().unwrap_or("(default)"),
            model = self.model.as_str(),
            temperature = self.temperature,
            retry_budget = self.retry_budget,
            timeout_secs = self.timeout.as_secs(),
            topic = self.topic.as_str(),
            min_reply_len = self.min_reply_len,
            classify_concurrency = self.classify_concurrency,
            tagging_concurrency = self.tagging_concurrency,
            merge_concurrency = self.merge_concurrency,
            distribute_concurrency = self.distribute_concurrency,
            data_dir = self.data_dir.as_str(),
            "Configuration loaded"
        );
    }
}

fn required_env(key: &str) -> Result<String, BuzzError> {
    env::var(key).map_err(|_| BuzzError::Config(format!("{key} environment variable is required")))
}

fn parsed_env<T: FromStr>(key: &str, default: T) -> Result<T, BuzzError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| BuzzError::Config(format!("{key} has an invalid value: {raw:?}"))),
        Err(_) => Ok(default),
    }
}

fn redact(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    if secret.chars().count() <= 8 {
        "****".to_string()
    } else {
        format!("{visible}****")
    }
}
