//! Configuration management for the novelcrawl engine
//!
//! This module handles loading and validating configuration from TOML files
//! and environment variables. One file describes the process-wide budget, the
//! database, logging and every crawled site.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::retry::RetryPolicy;

/// Placeholder substituted with the book id inside URL templates
pub const ID_PLACEHOLDER: &str = "{id}";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Process-wide number of concurrent outbound requests across all sites
    #[serde(default = "default_max_threads")]
    pub max_threads: usize,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Crawled sites keyed by site name
    #[serde(default)]
    pub sites: BTreeMap<String, SiteConfig>,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database path
    pub sqlite_path: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

/// Per-site crawl configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Encoding label of the source pages (utf-8, big5, gbk, ...)
    #[serde(default = "default_decode_method")]
    pub decode_method: String,

    /// Concurrent outbound requests for this site
    #[serde(default = "default_site_threads")]
    pub max_threads: usize,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// User agent string
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Optional requests-per-second cap on top of the concurrency limit
    #[serde(default)]
    pub rate_limit: Option<f64>,

    /// Circuit breaker settings
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Retry budgets
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Directory receiving downloaded book files
    pub storage: PathBuf,

    /// Directory receiving database backups
    #[serde(default = "default_backup_directory")]
    pub backup_directory: PathBuf,

    /// Consecutive failures after which explore stops
    #[serde(default = "default_max_explore_error")]
    pub max_explore_error: usize,

    /// Chapters fetched concurrently for one download
    #[serde(default = "default_download_concurrency")]
    pub max_download_concurrency: usize,

    /// Chapter failures tolerated before a download is aborted
    #[serde(default = "default_max_chapters_error")]
    pub max_chapters_error: usize,

    /// URL templates
    pub urls: UrlConfig,

    /// Text that must appear on the availability page for the site to be considered up
    #[serde(default)]
    pub availability_check: Option<String>,

    /// CSS selectors used to parse the site's pages
    #[serde(default)]
    pub selectors: SelectorConfig,
}

/// Circuit breaker settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive unavailable responses that open the breaker
    pub threshold: usize,

    /// Seconds the breaker stays open
    pub cool_down_secs: u64,
}

/// URL templates of a site; `{id}` is replaced with the book id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlConfig {
    /// Book index page
    pub base: String,

    /// Chapter list page
    pub download: String,

    /// Base against which chapter links are resolved
    #[serde(default)]
    pub chapter_prefix: String,

    /// Page fetched to check that the site is reachable
    #[serde(default)]
    pub availability: String,
}

/// CSS selectors for a selector-driven site
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorConfig {
    pub book_title: String,
    pub book_writer: String,
    pub book_type: String,
    pub book_update_date: String,
    pub book_update_chapter: String,

    /// Element whose presence marks the book as finished
    #[serde(default)]
    pub book_end_marker: Option<String>,

    /// Element whose presence means the source has no such book
    #[serde(default)]
    pub book_not_found: Option<String>,

    /// Anchor elements of the chapter list
    pub chapter_list_item: String,

    /// Chapter list is published newest first
    #[serde(default)]
    pub chapter_list_reversed: bool,

    pub chapter_title: String,
    pub chapter_content: String,
}

fn default_max_threads() -> usize {
    100
}

fn default_decode_method() -> String {
    String::from("utf-8")
}

fn default_site_threads() -> usize {
    10
}

fn default_request_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("novelcrawl/{}", env!("CARGO_PKG_VERSION"))
}

fn default_backup_directory() -> PathBuf {
    PathBuf::from("backup")
}

fn default_max_explore_error() -> usize {
    1000
}

fn default_download_concurrency() -> usize {
    5
}

fn default_max_chapters_error() -> usize {
    50
}

impl Config {
    /// Load configuration from a TOML file, then apply environment overrides
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    /// Override top-level values from `NOVELCRAWL_*` environment variables
    pub fn apply_env_overrides(&mut self) {
        if let Some(max_threads) = std::env::var("NOVELCRAWL_MAX_THREADS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
        {
            self.max_threads = max_threads;
        }

        if let Ok(path) = std::env::var("NOVELCRAWL_DATABASE") {
            self.database.sqlite_path = PathBuf::from(path);
        }

        if let Ok(level) = std::env::var("NOVELCRAWL_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(format) = std::env::var("NOVELCRAWL_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.max_threads == 0 {
            anyhow::bail!("max_threads must be greater than 0");
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!("log format must be text or json, got {}", self.logging.format);
        }

        for (name, site) in &self.sites {
            site.validate()
                .with_context(|| format!("invalid configuration for site {name}"))?;
        }

        Ok(())
    }
}

impl SiteConfig {
    /// Validate one site's values
    pub fn validate(&self) -> Result<()> {
        if self.max_threads == 0 {
            anyhow::bail!("max_threads must be greater than 0");
        }

        if self.max_explore_error == 0 {
            anyhow::bail!("max_explore_error must be greater than 0");
        }

        if self.max_download_concurrency == 0 {
            anyhow::bail!("max_download_concurrency must be greater than 0");
        }

        if self.circuit_breaker.threshold == 0 {
            anyhow::bail!("circuit_breaker.threshold must be greater than 0");
        }

        if let Some(rate) = self.rate_limit {
            if rate <= 0.0 {
                anyhow::bail!("rate_limit must be positive");
            }
        }

        if encoding_rs::Encoding::for_label(self.decode_method.as_bytes()).is_none() {
            anyhow::bail!("unknown decode_method {}", self.decode_method);
        }

        for (field, template) in [("urls.base", &self.urls.base), ("urls.download", &self.urls.download)] {
            if !template.contains(ID_PLACEHOLDER) {
                anyhow::bail!("{field} must contain {ID_PLACEHOLDER}");
            }
        }

        Ok(())
    }

    /// Get request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl CircuitBreakerConfig {
    /// Get cool-down as Duration
    #[must_use]
    pub fn cool_down(&self) -> Duration {
        Duration::from_secs(self.cool_down_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_threads: default_max_threads(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            sites: BTreeMap::new(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("data/novelcrawl.db"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 1000,
            cool_down_secs: 30,
        }
    }
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            book_title: String::from("h1"),
            book_writer: String::from(".writer"),
            book_type: String::from(".type"),
            book_update_date: String::from(".update-date"),
            book_update_chapter: String::from(".update-chapter"),
            book_end_marker: None,
            book_not_found: None,
            chapter_list_item: String::from(".chapter-list a"),
            chapter_list_reversed: false,
            chapter_title: String::from("h1"),
            chapter_content: String::from("#content"),
        }
    }
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            decode_method: default_decode_method(),
            max_threads: default_site_threads(),
            request_timeout_secs: default_request_timeout(),
            user_agent: default_user_agent(),
            rate_limit: None,
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryPolicy::default(),
            storage: PathBuf::from("books"),
            backup_directory: default_backup_directory(),
            max_explore_error: default_max_explore_error(),
            max_download_concurrency: default_download_concurrency(),
            max_chapters_error: default_max_chapters_error(),
            urls: UrlConfig {
                base: String::from("http://localhost/book/{id}"),
                download: String::from("http://localhost/book/{id}/chapters"),
                chapter_prefix: String::from("http://localhost/book/{id}/"),
                availability: String::from("http://localhost/"),
            },
            availability_check: None,
            selectors: SelectorConfig::default(),
        }
    }
}
