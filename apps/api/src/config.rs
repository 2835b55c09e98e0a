use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::llm_client::LlmSettings;
use crate::plan::TripLimits;

const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";
const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub gemini_api_base: String,
    pub llm_timeout_secs: u64,
    pub max_trip_days: u32,
    pub default_trip_days: u32,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let config = Config {
            gemini_api_key: require_env("GEMINI_API_KEY")?,
            gemini_model: optional_env("GEMINI_MODEL", DEFAULT_GEMINI_MODEL),
            gemini_api_base: optional_env("GEMINI_API_BASE", DEFAULT_GEMINI_API_BASE)
                .trim_end_matches('/')
                .to_string(),
            llm_timeout_secs: parse_env("LLM_TIMEOUT_SECS", 120)?,
            max_trip_days: parse_env("MAX_TRIP_DAYS", 14)?,
            default_trip_days: parse_env("DEFAULT_TRIP_DAYS", 3)?,
            port: parse_env("PORT", 8080)?,
            rust_log: optional_env("RUST_LOG", "info"),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.gemini_api_key.trim().is_empty() {
            bail!("GEMINI_API_KEY must not be empty");
        }
        if self.max_trip_days == 0 {
            bail!("MAX_TRIP_DAYS must be at least 1");
        }
        if self.default_trip_days == 0 || self.default_trip_days > self.max_trip_days {
            bail!(
                "DEFAULT_TRIP_DAYS must be between 1 and MAX_TRIP_DAYS ({})",
                self.max_trip_days
            );
        }
        if !self.gemini_api_base.starts_with("http://")
            && !self.gemini_api_base.starts_with("https://")
        {
            bail!("GEMINI_API_BASE must be an http(s) URL");
        }
        Ok(())
    }

    pub fn llm_settings(&self) -> LlmSettings {
        LlmSettings {
            api_key: self.gemini_api_key.clone(),
            model: self.gemini_model.clone(),
            api_base: self.gemini_api_base.clone(),
            timeout: Duration::from_secs(self.llm_timeout_secs),
            retry_base_delay: Duration::from_secs(1),
        }
    }

    pub fn trip_limits(&self) -> TripLimits {
        TripLimits {
            max_trip_days: self.max_trip_days,
            default_trip_days: self.default_trip_days,
        }
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| anyhow::anyhow!("{key} must be a valid number, got '{raw}'")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
impl Config {
    /// Defaults with a fake key, pointed at `api_base`.
    pub fn for_tests(api_base: &str) -> Self {
        Config {
            gemini_api_key: "test-key".to_string(),
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            gemini_api_base: api_base.to_string(),
            llm_timeout_secs: 120,
            max_trip_days: 14,
            default_trip_days: 3,
            port: 8080,
            rust_log: "info".to_string(),
        }
    }
}
