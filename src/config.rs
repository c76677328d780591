//! Configuration and settings management
//!
//! Loads settings from environment variables and defines tuning constants.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Fatal configuration problems detected at startup
#[derive(Debug, Error)]
pub enum SettingsError {
    /// No bot credentials were supplied at all
    #[error("no bot credentials configured")]
    NoCredentialsConfigured,
    /// A required setting is missing or empty
    #[error("missing required setting: {0}")]
    Missing(&'static str),
}

/// How inbound and outbound traffic is spread across bot tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BotMode {
    /// Only the main token is used, for ingress and responses alike
    SingleToken,
    /// One bot face: main token receives updates, all tokens send responses
    #[default]
    SingleInterface,
    /// Classic sharding: each token owns its own slice of users end to end
    MultiBot,
}

/// A bot token. Opaque secret; `Debug` and logs only ever see a prefix.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wrap a raw token string
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Full secret, for constructing a transport client
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// First few characters, safe for logging
    #[must_use]
    pub fn preview(&self) -> String {
        let head: String = self.0.chars().take(10).collect();
        format!("{head}...")
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Credential({})", self.preview())
    }
}

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Main bot token: receives all webhooks in single-interface mode
    pub bot_token_main: String,

    /// Comma/space-separated backup tokens used for outbound load balancing
    #[serde(rename = "backup_bot_tokens")]
    pub backup_bot_tokens_str: Option<String>,

    /// Traffic distribution mode
    #[serde(default)]
    pub bot_mode: BotMode,

    /// Comma/space-separated user IDs allowed to run admin commands
    #[serde(rename = "admin_users")]
    pub admin_users_str: Option<String>,

    /// Channel users must join before searching, e.g. `@results_channel`
    pub required_channel: Option<String>,

    /// Base URL of the student directory REST endpoint
    pub directory_url: Option<String>,
    /// API key for the student directory
    pub directory_api_key: Option<String>,

    /// Base URL of the external result-lookup service
    #[serde(default = "default_result_api_base_url")]
    pub result_api_base_url: String,

    /// R2 Storage access key ID
    pub r2_access_key_id: Option<String>,
    /// R2 Storage secret access key
    pub r2_secret_access_key: Option<String>,
    /// R2 Storage endpoint URL
    pub r2_endpoint_url: Option<String>,
    /// R2 Storage bucket name
    pub r2_bucket_name: Option<String>,

    /// Searches allowed per user per minute
    #[serde(default = "default_max_requests_per_minute")]
    pub max_requests_per_minute: u32,

    /// Maximum students shown per name-search page
    #[serde(default = "default_result_page_limit")]
    pub result_page_limit: usize,

    /// Concurrent sends per broadcast batch
    #[serde(default = "default_broadcast_batch_size")]
    pub broadcast_batch_size: usize,

    /// Pause between broadcast batches, milliseconds
    #[serde(default = "default_broadcast_batch_delay_ms")]
    pub broadcast_batch_delay_ms: u64,

    /// TTL for cached external lookup responses, seconds
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
}

const fn default_max_requests_per_minute() -> u32 {
    3
}

const fn default_result_page_limit() -> usize {
    5
}

const fn default_broadcast_batch_size() -> usize {
    30
}

const fn default_broadcast_batch_delay_ms() -> u64 {
    1000
}

const fn default_cache_ttl_seconds() -> u64 {
    3600
}

fn default_result_api_base_url() -> String {
    "https://serapi3.najah.iq".to_string()
}

fn parse_id_list(raw: Option<&String>) -> HashSet<i64> {
    raw.map(|s| {
        s.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
            .filter(|token| !token.is_empty())
            .filter_map(|id| id.parse::<i64>().ok())
            .collect()
    })
    .unwrap_or_default()
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("APP").separator("__"))
            // Environment::default() auto-converts UPPER_SNAKE_CASE to snake_case;
            // ignore_empty treats empty env vars as unset
            .add_source(Environment::default().ignore_empty(true))
            .build()?;

        s.try_deserialize()
    }

    /// All usable tokens: the main one first, then the non-empty backups.
    ///
    /// The ordering matters — index 0 is the primary credential everywhere.
    #[must_use]
    pub fn active_tokens(&self) -> Vec<Credential> {
        let mut tokens = Vec::new();
        if !self.bot_token_main.trim().is_empty() {
            tokens.push(Credential::new(self.bot_token_main.trim()));
        }
        if let Some(raw) = &self.backup_bot_tokens_str {
            tokens.extend(
                raw.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
                    .filter(|t| !t.is_empty())
                    .map(Credential::new),
            );
        }
        tokens
    }

    /// User IDs allowed to run `/broadcast` and `/stats`
    #[must_use]
    pub fn admin_users(&self) -> HashSet<i64> {
        parse_id_list(self.admin_users_str.as_ref())
    }
}

/// Fixed rate-limit window length
pub const RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// Per-token sustained send ceiling of the Telegram API, messages/second
pub const TOKEN_CAPACITY_PER_SECOND: usize = 30;

// External result API retry tuning
/// Attempts against the result API before giving up
pub const RESULT_API_MAX_ATTEMPTS: usize = 3;
/// First retry delay for the result API
pub const RESULT_API_INITIAL_BACKOFF_MS: u64 = 1000;
/// Retry delay ceiling for the result API
pub const RESULT_API_MAX_BACKOFF_MS: u64 = 4000;
/// Request timeout for the result API
pub const RESULT_API_TIMEOUT_SECS: u64 = 30;

// Telegram send retry tuning (transient network errors only)
/// Attempts per outbound Telegram call
pub const TELEGRAM_API_MAX_ATTEMPTS: usize = 3;
/// First retry delay for Telegram calls
pub const TELEGRAM_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Retry delay ceiling for Telegram calls
pub const TELEGRAM_API_MAX_BACKOFF_MS: u64 = 4000;
