//! Configuration Module
//!
//! Handles configuration loading from files, environment variables, and command-line arguments.
//! Precedence, lowest first: built-in defaults, YAML file, environment, command line.

use crate::chunk_types::{ChunkLayout, VersionPolicy};
use crate::http_gateway::RetryConfig;
use crate::{ChunkCacheError, Result};
use clap::{Arg, ArgMatches, Command};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Custom deserializer for PathBuf that expands ~ to home directory
mod pathbuf_serde {
    use serde::{Deserialize, Deserializer};
    use std::path::PathBuf;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<PathBuf, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(expand_tilde(&s))
    }

    pub fn deserialize_option<'de, D>(deserializer: D) -> Result<Option<PathBuf>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = Option::<String>::deserialize(deserializer)?;
        Ok(s.map(|s| expand_tilde(&s)))
    }

    pub(crate) fn expand_tilde(path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/") {
            if let Some(home) = std::env::var_os("HOME") {
                let mut result = PathBuf::from(home);
                result.push(rest);
                return result;
            }
        }
        PathBuf::from(path)
    }
}

/// Custom deserializer for Duration from string format like "30s", "5m", "100ms"
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(crate) fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("Empty duration string".to_string());
        }

        let num_end = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(s.len());
        if num_end == 0 {
            return Err(format!("No number found in duration string: {}", s));
        }

        let num_str = &s[..num_end];
        let unit = s[num_end..].trim();

        let value: f64 = num_str
            .parse()
            .map_err(|e| format!("Failed to parse number '{}': {}", num_str, e))?;

        let duration = match unit {
            "s" | "sec" | "secs" | "second" | "seconds" => Duration::from_secs_f64(value),
            "m" | "min" | "mins" | "minute" | "minutes" => Duration::from_secs_f64(value * 60.0),
            "h" | "hr" | "hrs" | "hour" | "hours" => Duration::from_secs_f64(value * 3600.0),
            "ms" | "millis" | "millisecond" | "milliseconds" => {
                Duration::from_secs_f64(value / 1000.0)
            }
            "" => Duration::from_secs_f64(value), // Default to seconds if no unit
            _ => return Err(format!("Unknown duration unit: {}", unit)),
        };

        Ok(duration)
    }
}

/// Custom deserializer for byte sizes given as a number or a string like "4K", "10M", "1G"
pub(crate) mod size_serde {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SizeRepr {
        Bytes(u64),
        Text(String),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        match SizeRepr::deserialize(deserializer)? {
            SizeRepr::Bytes(bytes) => Ok(bytes),
            SizeRepr::Text(text) => parse_size(&text).map_err(serde::de::Error::custom),
        }
    }

    pub(crate) fn parse_size(s: &str) -> Result<u64, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("Empty size string".to_string());
        }

        let num_end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        if num_end == 0 {
            return Err(format!("No number found in size string: {}", s));
        }

        let value: u64 = s[..num_end]
            .parse()
            .map_err(|e| format!("Failed to parse number '{}': {}", &s[..num_end], e))?;

        let multiplier: u64 = match s[num_end..].trim().to_ascii_uppercase().as_str() {
            "" | "B" => 1,
            "K" | "KB" | "KIB" => 1024,
            "M" | "MB" | "MIB" => 1024 * 1024,
            "G" | "GB" | "GIB" => 1024 * 1024 * 1024,
            other => return Err(format!("Unknown size unit: {}", other)),
        };

        value
            .checked_mul(multiplier)
            .ok_or_else(|| format!("Size out of range: {}", s))
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Chunk cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(
        default = "default_cache_dir",
        deserialize_with = "pathbuf_serde::deserialize"
    )]
    pub cache_dir: PathBuf,
    /// Chunk window size in bytes; at least 4096 and a multiple of 1024
    #[serde(
        default = "default_chunk_size",
        deserialize_with = "size_serde::deserialize"
    )]
    pub chunk_size: u64,
    #[serde(default)]
    pub version_policy: VersionPolicy,
}

fn default_cache_dir() -> PathBuf {
    pathbuf_serde::expand_tilde("~/.cache/chunk-cache")
}

fn default_chunk_size() -> u64 {
    10 * 1024 * 1024
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            chunk_size: default_chunk_size(),
            version_policy: VersionPolicy::default(),
        }
    }
}

impl CacheConfig {
    /// Validate the configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err("Cache directory must not be empty".to_string());
        }
        ChunkLayout::new(self.chunk_size).map_err(|e| e.to_string())?;
        Ok(())
    }
}

/// Download gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Base URL; objects are fetched from `{endpoint}/{object id}`
    #[serde(default)]
    pub endpoint: String,
    #[serde(
        default = "default_request_timeout",
        deserialize_with = "duration_serde::deserialize"
    )]
    pub request_timeout: Duration,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(
        default = "default_initial_retry_delay",
        deserialize_with = "duration_serde::deserialize"
    )]
    pub initial_retry_delay: Duration,
    #[serde(
        default = "default_max_retry_delay",
        deserialize_with = "duration_serde::deserialize"
    )]
    pub max_retry_delay: Duration,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_retries() -> usize {
    3
}

fn default_initial_retry_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_max_retry_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            request_timeout: default_request_timeout(),
            max_retries: default_max_retries(),
            initial_retry_delay: default_initial_retry_delay(),
            max_retry_delay: default_max_retry_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl DownloadConfig {
    /// Validate the configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.endpoint.trim().is_empty() {
            return Err("Download endpoint must not be empty".to_string());
        }
        if self.request_timeout.is_zero() {
            return Err("Request timeout must be greater than zero".to_string());
        }
        if self.initial_retry_delay > self.max_retry_delay {
            return Err(format!(
                "Initial retry delay ({:?}) must not exceed max retry delay ({:?})",
                self.initial_retry_delay, self.max_retry_delay
            ));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(format!(
                "Backoff multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            ));
        }
        Ok(())
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            initial_delay: self.initial_retry_delay,
            max_delay: self.max_retry_delay,
            backoff_multiplier: self.backoff_multiplier,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// When set, logs are also written to a daily rotating file in this directory
    #[serde(default, deserialize_with = "pathbuf_serde::deserialize_option")]
    pub app_log_dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            app_log_dir: None,
        }
    }
}

impl Config {
    /// Load configuration from the process command line, environment and config file
    pub fn load() -> Result<Self> {
        let matches = Self::build_cli().get_matches();
        Self::from_matches(&matches)
    }

    /// Load configuration using already parsed command-line arguments
    pub fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let mut config = Self::default();

        // Load from config file if specified
        if let Some(config_path) = matches.get_one::<String>("config") {
            config = Self::load_from_file(config_path)?;
        }

        // Override with environment variables
        config.apply_env_overrides();

        // Override with command line arguments
        config.apply_cli_overrides(matches)?;

        config.validate()?;

        info!(
            "Chunk cache: dir={}, chunk_size={} bytes, version_policy={:?}",
            config.cache.cache_dir.display(),
            config.cache.chunk_size,
            config.cache.version_policy
        );
        info!(
            "Download gateway: endpoint={}, request_timeout={}s, max_retries={}",
            config.download.endpoint,
            config.download.request_timeout.as_secs(),
            config.download.max_retries
        );
        debug!("Configuration: {:?}", config);

        Ok(config)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        if let Err(e) = self.cache.validate() {
            return Err(ChunkCacheError::ConfigError(format!(
                "Invalid cache configuration: {}",
                e
            )));
        }

        if let Err(e) = self.download.validate() {
            return Err(ChunkCacheError::ConfigError(format!(
                "Invalid download configuration: {}",
                e
            )));
        }

        Ok(())
    }

    /// Build CLI argument parser
    pub fn build_cli() -> Command {
        Command::new("chunk-cache")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Read byte ranges of remote objects through a local chunk cache")
            .disable_version_flag(true)
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path"),
            )
            .arg(
                Arg::new("cache-dir")
                    .long("cache-dir")
                    .value_name("DIR")
                    .help("Chunk cache directory"),
            )
            .arg(
                Arg::new("chunk-size")
                    .long("chunk-size")
                    .value_name("SIZE")
                    .help("Chunk size, e.g. 4096, 64K, 10M (default: 10M)"),
            )
            .arg(
                Arg::new("version-policy")
                    .long("version-policy")
                    .value_name("POLICY")
                    .value_parser(["immutable", "per_version"])
                    .help("Cache reuse across object versions (default: immutable)"),
            )
            .arg(
                Arg::new("endpoint")
                    .long("endpoint")
                    .value_name("URL")
                    .help("HTTP endpoint objects are fetched from"),
            )
            .arg(
                Arg::new("request-timeout")
                    .long("request-timeout")
                    .value_name("DURATION")
                    .help("Per-attempt request timeout, e.g. 30s (default: 30s)"),
            )
            .arg(
                Arg::new("log-level")
                    .long("log-level")
                    .value_name("LEVEL")
                    .help("Log level or filter directive (default: info)"),
            )
            .arg(
                Arg::new("object")
                    .long("object")
                    .value_name("ID")
                    .required(true)
                    .help("Id of the remote object to read"),
            )
            .arg(
                Arg::new("object-version")
                    .long("version")
                    .value_name("VERSION")
                    .help("Expected object version (ETag)"),
            )
            .arg(
                Arg::new("offset")
                    .long("offset")
                    .value_name("BYTES")
                    .value_parser(clap::value_parser!(u64))
                    .default_value("0")
                    .help("First byte to read"),
            )
            .arg(
                Arg::new("size")
                    .long("size")
                    .value_name("SIZE")
                    .required(true)
                    .help("Number of bytes to read, e.g. 4096 or 1M"),
            )
            .arg(
                Arg::new("preload")
                    .long("preload")
                    .action(clap::ArgAction::SetTrue)
                    .help("Mark the read as speculative read-ahead"),
            )
            .arg(
                Arg::new("output")
                    .short('o')
                    .long("output")
                    .value_name("FILE")
                    .help("Write the bytes to FILE instead of stdout"),
            )
    }

    /// Load configuration from YAML file
    fn load_from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ChunkCacheError::ConfigError(format!("Failed to read config file {}: {}", path, e))
        })?;

        let config = Self::from_yaml(&content).map_err(|e| {
            ChunkCacheError::ConfigError(format!("Failed to parse config file {}: {}", path, e))
        })?;

        info!("Configuration loaded from file: {}", path);
        Ok(config)
    }

    /// Parse a YAML document
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(cache_dir) = std::env::var("CACHE_DIR") {
            self.cache.cache_dir = pathbuf_serde::expand_tilde(&cache_dir);
        }

        if let Ok(chunk_size) = std::env::var("CHUNK_SIZE") {
            if let Ok(chunk_size) = size_serde::parse_size(&chunk_size) {
                self.cache.chunk_size = chunk_size;
            }
        }

        if let Ok(policy) = std::env::var("VERSION_POLICY") {
            if let Some(policy) = parse_version_policy(&policy) {
                self.cache.version_policy = policy;
            }
        }

        if let Ok(endpoint) = std::env::var("DOWNLOAD_ENDPOINT") {
            self.download.endpoint = endpoint;
        }

        if let Ok(timeout) = std::env::var("REQUEST_TIMEOUT") {
            if let Ok(timeout) = duration_serde::parse_duration(&timeout) {
                self.download.request_timeout = timeout;
            }
        }

        if let Ok(max_retries) = std::env::var("MAX_RETRIES") {
            if let Ok(max_retries) = max_retries.parse() {
                self.download.max_retries = max_retries;
            }
        }

        if let Ok(log_level) = std::env::var("LOG_LEVEL") {
            self.logging.log_level = log_level;
        }

        if let Ok(app_log_dir) = std::env::var("APP_LOG_DIR") {
            self.logging.app_log_dir = Some(pathbuf_serde::expand_tilde(&app_log_dir));
        }
    }

    /// Apply command line overrides
    pub fn apply_cli_overrides(&mut self, matches: &ArgMatches) -> Result<()> {
        if let Some(cache_dir) = matches.get_one::<String>("cache-dir") {
            self.cache.cache_dir = pathbuf_serde::expand_tilde(cache_dir);
        }

        if let Some(chunk_size) = matches.get_one::<String>("chunk-size") {
            self.cache.chunk_size = size_serde::parse_size(chunk_size).map_err(|e| {
                ChunkCacheError::ConfigError(format!("Invalid --chunk-size: {}", e))
            })?;
        }

        if let Some(policy) = matches.get_one::<String>("version-policy") {
            if let Some(policy) = parse_version_policy(policy) {
                self.cache.version_policy = policy;
            }
        }

        if let Some(endpoint) = matches.get_one::<String>("endpoint") {
            self.download.endpoint = endpoint.clone();
        }

        if let Some(timeout) = matches.get_one::<String>("request-timeout") {
            self.download.request_timeout =
                duration_serde::parse_duration(timeout).map_err(|e| {
                    ChunkCacheError::ConfigError(format!("Invalid --request-timeout: {}", e))
                })?;
        }

        if let Some(log_level) = matches.get_one::<String>("log-level") {
            self.logging.log_level = log_level.clone();
        }

        Ok(())
    }
}

/// Parse a byte size such as `4096`, `64K` or `10M`
pub fn parse_byte_size(s: &str) -> Result<u64> {
    size_serde::parse_size(s).map_err(ChunkCacheError::ConfigError)
}

fn parse_version_policy(s: &str) -> Option<VersionPolicy> {
    match s.trim().to_ascii_lowercase().as_str() {
        "immutable" => Some(VersionPolicy::Immutable),
        "per_version" | "per-version" => Some(VersionPolicy::PerVersion),
        _ => None,
    }
}
