//! Configuration file parser for ~/.config/nufeed/config.toml.
//!
//! The config file is optional. A missing or empty file yields
//! `Config::default()`; unknown keys are accepted but logged as warnings.
use crate::feed::{
    ClientOptions, EngineOptions, FeedCredentials, FeedSource, SourceError, DEFAULT_PAGE_SIZE,
};
use crate::transport::{CacheContext, HttpTransportOptions};
use chrono::TimeDelta;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Feed used when neither the config file nor the command line names one.
pub const DEFAULT_SOURCE: &str = "https://www.nuget.org/api/v2/";

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

    #[error("Invalid feed source: {0}")]
    Source(#[from] SourceError),

    #[error("{0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level client configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be given.
/// The custom Debug impl masks `password`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Feed URL queried when `--source` is not given.
    pub source: String,

    /// Basic auth user name for the feed.
    pub username: Option<String>,

    /// Basic auth password. Ignored without `username`.
    pub password: Option<String>,

    /// How long a discovered service endpoint stays valid.
    pub endpoint_ttl_minutes: u64,

    /// Attempts per logical query, including the first.
    pub max_attempts: u32,

    /// Delay before the first retry, doubled for later ones.
    pub retry_delay_ms: u64,

    pub request_timeout_secs: u64,

    pub max_response_bytes: usize,

    /// Results requested per page by `list`.
    pub page_size: usize,

    /// Oldest cached HTTP response that may be reused.
    pub http_cache_minutes: u64,

    /// Responses kept in the in-memory cache. 0 disables it.
    pub http_cache_entries: usize,
}

impl Default for Config {
    fn default() -> Self {
        let transport = HttpTransportOptions::default();
        let engine = EngineOptions::default();
        Self {
            source: DEFAULT_SOURCE.to_string(),
            username: None,
            password: None,
            endpoint_ttl_minutes: 40,
            max_attempts: engine.max_attempts,
            retry_delay_ms: engine.retry_delay.as_millis() as u64,
            request_timeout_secs: transport.timeout.as_secs(),
            max_response_bytes: transport.max_response_bytes,
            page_size: DEFAULT_PAGE_SIZE,
            http_cache_minutes: engine.cache_context.max_age.as_secs() / 60,
            http_cache_entries: transport.cache_entries,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("source", &self.source)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("endpoint_ttl_minutes", &self.endpoint_ttl_minutes)
            .field("max_attempts", &self.max_attempts)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_response_bytes", &self.max_response_bytes)
            .field("page_size", &self.page_size)
            .field("http_cache_minutes", &self.http_cache_minutes)
            .field("http_cache_entries", &self.http_cache_entries)
            .finish()
    }
}

const KNOWN_KEYS: &[&str] = &[
    "source",
    "username",
    "password",
    "endpoint_ttl_minutes",
    "max_attempts",
    "retry_delay_ms",
    "request_timeout_secs",
    "max_response_bytes",
    "page_size",
    "http_cache_minutes",
    "http_cache_entries",
];

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Out-of-range values → `Err(ConfigError::Invalid)`
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

        Self::parse(&content)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            tracing::debug!("Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        config.validate()?;
        tracing::info!(source = %config.source, "Loaded configuration");
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        if self.page_size == 0 {
            return Err(ConfigError::Invalid("page_size must be at least 1".into()));
        }
        if self.endpoint_ttl_minutes > i64::MAX as u64 / 60_000 {
            return Err(ConfigError::Invalid("endpoint_ttl_minutes is too large".into()));
        }
        if self.http_cache_minutes > u64::MAX / 60 {
            return Err(ConfigError::Invalid("http_cache_minutes is too large".into()));
        }
        Ok(())
    }

    /// The configured feed, or `override_url` when given, with credentials
    /// attached if both a user name and a password are set.
    pub fn feed_source(&self, override_url: Option<&str>) -> Result<FeedSource, ConfigError> {
        let source = FeedSource::new(override_url.unwrap_or(&self.source))?;
        Ok(match (&self.username, &self.password) {
            (Some(user), Some(password)) => {
                source.with_credentials(FeedCredentials::new(user.as_str(), password.as_str()))
            }
            _ => source,
        })
    }

    pub fn transport_options(&self) -> HttpTransportOptions {
        HttpTransportOptions {
            timeout: Duration::from_secs(self.request_timeout_secs),
            max_response_bytes: self.max_response_bytes,
            cache_entries: self.http_cache_entries,
        }
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            endpoint_ttl: TimeDelta::minutes(self.endpoint_ttl_minutes as i64),
            engine: EngineOptions {
                max_attempts: self.max_attempts,
                retry_delay: Duration::from_millis(self.retry_delay_ms),
                cache_context: CacheContext {
                    max_age: Duration::from_secs(self.http_cache_minutes * 60),
                    no_cache: false,
                },
            },
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
