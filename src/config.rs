//! Configuration file parser for `newsroom.toml`.
//!
//! The config file is optional at the parsing level (a missing file yields
//! `Config::default()`), but [`Config::validate`] rejects a configuration
//! without feeds, so in practice the binary needs one.
//! Unknown keys are ignored by serde; we log a warning to surface typos.
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::feed::FeedSource;
use crate::scheduler::SchedulerConfig;
use crate::util::validate_feed_url;

/// Default config file, looked up in the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "newsroom.toml";

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

    /// Parsed fine but cannot be used to run the service.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
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
    /// SQLite database file, or `:memory:`.
    pub database_path: String,

    /// Seconds between the start of two ingestion cycles.
    pub processing_interval_secs: u64,

    /// Seconds a single feed may take within a cycle.
    pub feed_timeout_secs: u64,

    /// Entries returned by the news endpoint when no positive limit is given.
    pub default_news_limit: i64,

    /// Feeds processed at once. 0 = all feeds in parallel.
    pub max_concurrent_feeds: usize,

    /// Address the HTTP API binds to.
    pub listen_address: String,

    /// Default tracing filter; `RUST_LOG` takes precedence.
    pub log_level: String,

    pub feeds: Vec<FeedSource>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "newsroom.db".to_string(),
            processing_interval_secs: 180,
            feed_timeout_secs: 30,
            default_news_limit: 10,
            max_concurrent_feeds: 0,
            listen_address: "127.0.0.1:8080".to_string(),
            log_level: "info".to_string(),
            feeds: Vec::new(),
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 8] = [
        "database_path",
        "processing_interval_secs",
        "feed_timeout_secs",
        "default_news_limit",
        "max_concurrent_feeds",
        "listen_address",
        "log_level",
        "feeds",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    ///
    /// The result is not validated; call [`Config::validate`] before use.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading so a corrupted file can't exhaust memory
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
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        Self::from_toml(&content).inspect(|config| {
            tracing::info!(
                path = %path.display(),
                feeds = config.feeds.len(),
                "Loaded configuration"
            );
        })
    }

    /// Parse configuration from TOML text, warning about unknown keys.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }
        Ok(toml::from_str(content)?)
    }

    /// Checks everything needed to start ingesting.
    ///
    /// Requires at least one feed, a non-empty name and a valid http(s) URL
    /// for every feed, and positive interval, timeout and default limit.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.feeds.is_empty() {
            return Err(ConfigError::Invalid("no feeds configured".to_string()));
        }
        for (i, feed) in self.feeds.iter().enumerate() {
            if feed.name.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("feed #{} has an empty name", i + 1)));
            }
            validate_feed_url(&feed.url).map_err(|e| {
                ConfigError::Invalid(format!("feed {:?} has a bad url: {}", feed.name, e))
            })?;
        }
        if self.processing_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "processing_interval_secs must be positive".to_string(),
            ));
        }
        if self.feed_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "feed_timeout_secs must be positive".to_string(),
            ));
        }
        if self.default_news_limit <= 0 {
            return Err(ConfigError::Invalid(
                "default_news_limit must be positive".to_string(),
            ));
        }
        if self.database_path.trim().is_empty() {
            return Err(ConfigError::Invalid("database_path is empty".to_string()));
        }
        Ok(())
    }

    pub fn processing_interval(&self) -> Duration {
        Duration::from_secs(self.processing_interval_secs)
    }

    pub fn feed_timeout(&self) -> Duration {
        Duration::from_secs(self.feed_timeout_secs)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: self.processing_interval(),
            unit_timeout: self.feed_timeout(),
            max_concurrency: self.max_concurrent_feeds,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const VALID: &str = r#"
database_path = "/var/lib/newsroom/news.db"
processing_interval_secs = 300
feed_timeout_secs = 20
default_news_limit = 25
max_concurrent_feeds = 4
listen_address = "0.0.0.0:9000"
log_level = "debug"

[[feeds]]
name = "Lenta"
url = "https://lenta.ru/rss"

[[feeds]]
name = "Guardian"
url = "https://www.theguardian.com/world/rss"
"#;

    fn write_config(dir: &tempfile::TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("newsroom.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    fn with_feed() -> Config {
        Config {
            feeds: vec![FeedSource {
                name: "Example".to_string(),
                url: "https://example.com/rss".to_string(),
            }],
            ..Config::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.database_path, "newsroom.db");
        assert_eq!(config.processing_interval(), Duration::from_secs(180));
        assert_eq!(config.feed_timeout(), Duration::from_secs(30));
        assert_eq!(config.default_news_limit, 10);
        assert_eq!(config.max_concurrent_feeds, 0);
        assert_eq!(config.listen_address, "127.0.0.1:8080");
        assert!(config.feeds.is_empty());
    }

    #[test]
    fn test_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.processing_interval_secs, 180);
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "   \n  \n  ");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.default_news_limit, 10);
    }

    #[test]
    fn test_full_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, VALID);

        let config = Config::load(&path).unwrap();
        assert_eq!(config.database_path, "/var/lib/newsroom/news.db");
        assert_eq!(config.listen_address, "0.0.0.0:9000");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.feeds.len(), 2);
        assert_eq!(config.feeds[1].name, "Guardian");
        assert_eq!(
            config.scheduler_config(),
            SchedulerConfig {
                interval: Duration::from_secs(300),
                unit_timeout: Duration::from_secs(20),
                max_concurrency: 4,
            }
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let config = Config::from_toml("processing_interval_secs = 60\n").unwrap();
        assert_eq!(config.processing_interval_secs, 60);
        assert_eq!(config.feed_timeout_secs, 30);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "this is not [valid toml");

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let result = Config::from_toml("processing_interval_secs = \"soon\"\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let config = Config::from_toml("log_level = \"warn\"\ntotally_fake_key = 1\n").unwrap();
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_too_large_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, &"a".repeat(1_048_577));

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_validate_requires_feeds() {
        let err = Config::default().validate().unwrap_err();
        assert!(err.to_string().contains("no feeds"));
        assert!(with_feed().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_feed() {
        let mut config = with_feed();
        config.feeds[0].url = "ftp://example.com/rss".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = with_feed();
        config.feeds[0].name = "  ".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_non_positive_settings() {
        let mut config = with_feed();
        config.processing_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = with_feed();
        config.feed_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = with_feed();
        config.default_news_limit = -1;
        assert!(config.validate().is_err());
    }
}
