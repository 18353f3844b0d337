//! Configuration file parser for ~/.config/startpage/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are silently ignored by serde (with `deny_unknown_fields` off),
//! though we log a warning when the file contains potential typos.
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::feed::FetcherOptions;
use crate::storage::DEFAULT_THEME;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Missing keys fall back to `Default::default()`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Theme used until the user picks one (stored settings win).
    pub theme: String,

    /// How long a fetched feed snapshot is served from cache.
    pub cache_ttl_minutes: u64,

    /// Per-request timeout for feed fetches.
    pub fetch_timeout_secs: u64,

    /// Sources of one page fetched at the same time.
    pub max_concurrent_fetches: usize,

    /// Retries after 429/5xx responses or truncated bodies.
    pub max_retries: u32,

    /// First retry delay; doubles on every further attempt.
    pub retry_base_delay_ms: u64,

    /// Largest feed body accepted.
    pub max_feed_size_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            theme: DEFAULT_THEME.to_string(),
            cache_ttl_minutes: 30,
            fetch_timeout_secs: 30,
            max_concurrent_fetches: 10,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            max_feed_size_bytes: 10 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 7] = [
        "theme",
        "cache_ttl_minutes",
        "fetch_timeout_secs",
        "max_concurrent_fetches",
        "max_retries",
        "retry_base_delay_ms",
        "max_feed_size_bytes",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted (serde default behavior), logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading to avoid loading a corrupted giant file.
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
                // File deleted between metadata and read
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
            ttl_minutes = config.cache_ttl_minutes,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Freshness window for cached feed snapshots.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_minutes.saturating_mul(60))
    }

    /// Concurrency bound for one page's fetches (at least 1).
    pub fn fetch_concurrency(&self) -> usize {
        self.max_concurrent_fetches.max(1)
    }

    /// Network settings for [`crate::feed::FeedFetcher`].
    pub fn fetcher_options(&self) -> FetcherOptions {
        FetcherOptions {
            timeout: Duration::from_secs(self.fetch_timeout_secs.max(1)),
            max_retries: self.max_retries,
            retry_base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_feed_size: self.max_feed_size_bytes,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
