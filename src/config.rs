use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const ENV_BASE_URL: &str = "ASKCHAT_BASE_URL";
const ENV_TIMEOUT_SECS: &str = "ASKCHAT_TIMEOUT_SECS";
const ENV_MAX_HISTORY: &str = "ASKCHAT_MAX_HISTORY";
const ENV_SEARCH: &str = "ASKCHAT_SEARCH";

// Client settings. Precedence: defaults, then the JSON file, then environment variables.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub max_history: usize,
    pub search_enabled: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".to_string(),
            // Long generations are slow; 30 minutes.
            request_timeout_secs: 1800,
            max_history: 50,
            search_enabled: false,
        }
    }
}

impl ClientConfig {
    /// Loads the optional JSON file, then applies the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        base.with_overrides(|key| std::env::var(key).ok())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        log::debug!("Reading client config from {}", path.display());
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file '{}'", path.display()))?;
        config.validate()
    }

    /// Applies overrides from `lookup`, which maps a variable name to its value.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(url) = lookup(ENV_BASE_URL) {
            log::debug!("Base URL overridden by {}", ENV_BASE_URL);
            self.base_url = url;
        }
        if let Some(raw) = lookup(ENV_TIMEOUT_SECS) {
            self.request_timeout_secs = raw.trim().parse().with_context(|| {
                format!("Invalid value '{}' for environment variable '{}'", raw, ENV_TIMEOUT_SECS)
            })?;
        }
        if let Some(raw) = lookup(ENV_MAX_HISTORY) {
            self.max_history = raw.trim().parse().with_context(|| {
                format!("Invalid value '{}' for environment variable '{}'", raw, ENV_MAX_HISTORY)
            })?;
        }
        if let Some(raw) = lookup(ENV_SEARCH) {
            self.search_enabled = parse_flag(&raw).with_context(|| {
                format!("Invalid value '{}' for environment variable '{}'", raw, ENV_SEARCH)
            })?;
        }
        self.validate()
    }

    fn validate(self) -> Result<Self> {
        if self.base_url.trim().is_empty() {
            anyhow::bail!("Base URL cannot be empty");
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("Request timeout must be at least one second");
        }
        if self.max_history == 0 {
            anyhow::bail!("History size must be at least one entry");
        }
        Ok(self)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parse_flag(raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => Err(anyhow::anyhow!("Expected a boolean, got '{}'", other)),
    }
}
