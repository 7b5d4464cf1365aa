//! Configuration file parser for ~/.config/theresa/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde, though we log a warning when the file
//! contains potential typos. Secrets may also come from the environment,
//! which takes precedence over the file.
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::chat::{Banter, ChatRouter, CommandTable};
use crate::feed::{PollerConfig, DEFAULT_FEED_URL};
use crate::irc::{Endpoint, SessionConfig};
use crate::twitter::client::DEFAULT_API_BASE;
use crate::twitter::StatusLookup;

/// Environment variable overriding `nickserv_password`.
pub const NICKSERV_PASSWORD_ENV: &str = "THERESA_NICKSERV_PASSWORD";
/// Environment variable overriding `twitter_bearer_token`.
pub const TWITTER_BEARER_TOKEN_ENV: &str = "TWITTER_BEARER_TOKEN";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid config value for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level bot configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Secrets are masked in the `Debug` output.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// IRC server hostname.
    pub server: String,
    pub port: u16,
    pub nickname: String,
    pub username: String,
    pub realname: String,
    /// Channel to join and announce in. Must start with `#`.
    pub channel: String,
    /// NickServ password, sent after registration when set.
    pub nickserv_password: Option<String>,
    /// Single character that marks a chat line as a command.
    pub command_prefix: String,

    pub feed_url: String,
    pub poll_interval_secs: u64,

    /// Seconds between liveness PINGs.
    pub ping_interval_secs: u64,
    /// Unanswered PINGs tolerated before the connection is dropped.
    pub max_outstanding_pings: u32,

    pub twitter_api_base: String,
    pub twitter_bearer_token: Option<String>,

    /// Whether the buttify joke is enabled.
    pub banter: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: "irc.esper.net".to_string(),
            port: 6667,
            nickname: "theresa".to_string(),
            username: "theresa".to_string(),
            realname: "theresa".to_string(),
            channel: "#theresa".to_string(),
            nickserv_password: None,
            command_prefix: ",".to_string(),
            feed_url: DEFAULT_FEED_URL.to_string(),
            poll_interval_secs: 120,
            ping_interval_secs: 60,
            max_outstanding_pings: 5,
            twitter_api_base: DEFAULT_API_BASE.to_string(),
            twitter_bearer_token: None,
            banter: true,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("nickname", &self.nickname)
            .field("username", &self.username)
            .field("realname", &self.realname)
            .field("channel", &self.channel)
            .field(
                "nickserv_password",
                &self.nickserv_password.as_ref().map(|_| "[REDACTED]"),
            )
            .field("command_prefix", &self.command_prefix)
            .field("feed_url", &self.feed_url)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("ping_interval_secs", &self.ping_interval_secs)
            .field("max_outstanding_pings", &self.max_outstanding_pings)
            .field("twitter_api_base", &self.twitter_api_base)
            .field(
                "twitter_bearer_token",
                &self.twitter_bearer_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("banter", &self.banter)
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 15] = [
        "server",
        "port",
        "nickname",
        "username",
        "realname",
        "channel",
        "nickserv_password",
        "command_prefix",
        "feed_url",
        "poll_interval_secs",
        "ping_interval_secs",
        "max_outstanding_pings",
        "twitter_api_base",
        "twitter_bearer_token",
        "banter",
    ];

    /// `~/.config/theresa/config.toml`, if `HOME` is set.
    pub fn default_path() -> Option<PathBuf> {
        let home = std::env::var_os("HOME")?;
        Some(
            PathBuf::from(home)
                .join(".config")
                .join("theresa")
                .join("config.toml"),
        )
    }

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    ///
    /// Environment overrides are not applied here; see [`Config::apply_env`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            server = %config.server,
            channel = %config.channel,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Let secrets from the process environment override the file.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let present = |key: &str| lookup(key).filter(|v| !v.is_empty());
        if let Some(password) = present(NICKSERV_PASSWORD_ENV) {
            tracing::debug!(var = NICKSERV_PASSWORD_ENV, "NickServ password taken from environment");
            self.nickserv_password = Some(password);
        }
        if let Some(token) = present(TWITTER_BEARER_TOKEN_ENV) {
            tracing::debug!(var = TWITTER_BEARER_TOKEN_ENV, "Bearer token taken from environment");
            self.twitter_bearer_token = Some(token);
        }
    }

    /// Reject values the bot cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
            ConfigError::Invalid {
                key,
                reason: reason.into(),
            }
        }

        if self.server.trim().is_empty() {
            return Err(invalid("server", "must not be empty"));
        }
        if self.port == 0 {
            return Err(invalid("port", "must not be zero"));
        }
        if self.nickname.trim().is_empty() || self.nickname.contains(char::is_whitespace) {
            return Err(invalid("nickname", "must be a single non-empty word"));
        }
        if !self.channel.starts_with('#') || self.channel.contains(char::is_whitespace) {
            return Err(invalid("channel", "must start with '#' and contain no spaces"));
        }
        if self.command_prefix.chars().count() != 1 {
            return Err(invalid("command_prefix", "must be exactly one character"));
        }
        if self.poll_interval_secs == 0 {
            return Err(invalid("poll_interval_secs", "must be greater than zero"));
        }
        if self.ping_interval_secs == 0 {
            return Err(invalid("ping_interval_secs", "must be greater than zero"));
        }
        url::Url::parse(&self.feed_url).map_err(|e| invalid("feed_url", e.to_string()))?;
        url::Url::parse(&self.twitter_api_base)
            .map_err(|e| invalid("twitter_api_base", e.to_string()))?;
        Ok(())
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.server.clone(),
            port: self.port,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        let mut session = SessionConfig::new(self.nickname.as_str(), self.channel.as_str());
        session.username = self.username.clone();
        session.realname = self.realname.clone();
        session.nickserv_password = self.nickserv_password.clone().map(SecretString::from);
        session.ping_interval = Duration::from_secs(self.ping_interval_secs);
        session.max_outstanding_pings = self.max_outstanding_pings;
        session
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            feed_url: self.feed_url.clone(),
            interval: Duration::from_secs(self.poll_interval_secs),
            ..PollerConfig::default()
        }
    }

    pub fn bearer_token(&self) -> Option<SecretString> {
        self.twitter_bearer_token.clone().map(SecretString::from)
    }

    /// The chat router with the standard command table.
    pub fn chat_router(&self, lookup: Arc<dyn StatusLookup>) -> ChatRouter {
        let prefix = self.command_prefix.chars().next().unwrap_or(',');
        ChatRouter::new(prefix, CommandTable::standard(Arc::clone(&lookup)), lookup)
            .with_banter(self.banter.then(Banter::default))
    }
}

// ============================================================================
// Tests
// ============================================================================
