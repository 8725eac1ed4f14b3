//! Configuration management for threadcode.
//!
//! The bot reads an optional JSON file, then applies environment overrides.
//!
//! # Configuration Priority
//!
//! 1. Environment variables
//! 2. Config file values (`$THREADCODE_CONFIG`, or `~/.threadcode/config.json`)
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `DISCORD_BOT_TOKEN` → discord.bot_token (required)
//! - `OPENCODE_BASE_URL` → opencode.base_url
//! - `THREADCODE_LOG_LEVEL` → observability.log_level
//! - `THREADCODE_LOG_FORMAT` → observability.log_format

use crate::error::{Error, Result, ResultExt};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "THREADCODE_CONFIG";

/// Default opencode server endpoint.
pub const DEFAULT_OPENCODE_URL: &str = "http://localhost:4096";

/// Default Discord REST API base.
pub const DEFAULT_DISCORD_API: &str = "https://discord.com/api/v10";

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".threadcode"),
        |dirs| dirs.home_dir().join(".threadcode"),
    )
}

/// Get the configuration file path.
///
/// `$THREADCODE_CONFIG` wins over the default location; `~` is expanded.
pub fn config_path() -> PathBuf {
    match std::env::var(CONFIG_PATH_ENV) {
        Ok(p) if !p.trim().is_empty() => PathBuf::from(shellexpand::tilde(p.trim()).into_owned()),
        _ => config_dir().join("config.json"),
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Discord connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    /// Bot authentication token
    #[serde(default)]
    pub bot_token: String,

    /// REST API base URL
    #[serde(default = "default_discord_api")]
    pub api_base: String,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base: default_discord_api(),
        }
    }
}

/// opencode server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpencodeConfig {
    /// Base URL of the opencode HTTP server
    #[serde(default = "default_opencode_url", alias = "endpoint")]
    pub base_url: String,

    /// TCP connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for OpencodeConfig {
    fn default() -> Self {
        Self {
            base_url: default_opencode_url(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub discord: DiscordConfig,

    #[serde(default)]
    pub opencode: OpencodeConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the default path, falling back to defaults.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .context(format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides, then validate.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("DISCORD_BOT_TOKEN") {
            self.discord.bot_token = token;
        }
        if let Some(url) = lookup("OPENCODE_BASE_URL").filter(|u| !u.trim().is_empty()) {
            self.opencode.base_url = url;
        }
        if let Some(level) = lookup("THREADCODE_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Some(format) = lookup("THREADCODE_LOG_FORMAT") {
            self.observability.log_format = format;
        }
    }

    /// Check required settings.
    pub fn validate(&self) -> Result<()> {
        if self.discord.bot_token.trim().is_empty() {
            return Err(Error::Config(
                "DISCORD_BOT_TOKEN environment variable is required".into(),
            ));
        }
        if !self.opencode.base_url.starts_with("http://")
            && !self.opencode.base_url.starts_with("https://")
        {
            return Err(Error::Config(format!(
                "opencode base URL must be http(s): {}",
                self.opencode.base_url
            )));
        }
        Ok(())
    }
}

fn default_discord_api() -> String {
    DEFAULT_DISCORD_API.into()
}
fn default_opencode_url() -> String {
    DEFAULT_OPENCODE_URL.into()
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "pretty".into()
}
