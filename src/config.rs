use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub channels: HashMap<String, TelegramConfig>,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
}

/// Settings of one Telegram channel (`[channels.<name>]`)
#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    /// Bot token. Only checked when a request is about to be made.
    #[serde(default)]
    pub api_token: Option<String>,
    /// Long-polling timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u32,
    /// Maximum number of updates per poll
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub allowed_updates: Vec<String>,
    /// Consecutive failed polls before the loop gives up
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
    /// Pause after a failed poll
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Deadline for outbound sends. Unset means sends may block indefinitely.
    #[serde(default)]
    pub send_timeout_secs: Option<u64>,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_token: None,
            timeout: default_timeout(),
            limit: default_limit(),
            allowed_updates: Vec::new(),
            max_failures: default_max_failures(),
            retry_delay_ms: default_retry_delay_ms(),
            api_base_url: default_api_base_url(),
            send_timeout_secs: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SessionsConfig {
    /// SQLite file for sessions. Sessions stay in memory when unset.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebhookConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Externally reachable base URL, used when registering the webhook
    #[serde(default)]
    pub public_url: Option<String>,
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            public_url: None,
            path_prefix: default_path_prefix(),
        }
    }
}

fn default_timeout() -> u32 {
    30
}

fn default_limit() -> u32 {
    100
}

fn default_max_failures() -> u32 {
    5
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_api_base_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_path_prefix() -> String {
    "/telegram-webhook".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    pub fn channel(&self, name: &str) -> Result<&TelegramConfig> {
        self.channels
            .get(name)
            .with_context(|| format!("No [channels.{}] section in config", name))
    }

    /// Full webhook URL for a channel: `{public_url}{path_prefix}/{channel}/{token}`
    pub fn webhook_url(&self, channel: &str) -> Result<String> {
        let public_url = self
            .webhook
            .public_url
            .as_deref()
            .context("webhook.public_url is not configured")?;
        let token = self
            .channel(channel)?
            .api_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .with_context(|| format!("No api_token configured for {} channel", channel))?;

        Ok(format!(
            "{}{}/{}/{}",
            public_url.trim_end_matches('/'),
            self.webhook.path_prefix,
            channel,
            token
        ))
    }
}
