use chrono::NaiveDate;
use config::{Config as ConfigBuilder, ConfigError, File};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

/// Configuration for one search run.
///
/// # Configuration Locations
///
/// The configuration can be loaded from multiple locations in order of
/// precedence:
/// 1. Custom config file specified via `--config` flag
/// 2. Local `.xmlscout.yaml` in the current directory
/// 3. Global `$HOME/.config/xmlscout/config.yaml`
///
/// # Configuration Format
///
/// The configuration uses YAML format. Example:
/// ```yaml
/// patterns: ["keyword1", "keyword2"]
/// mode: text
/// start_date: 2024-08-01
/// end_date: 2024-08-31
/// file_pattern: "TCO_*_KMC_*.xml"
/// thread_count: 8
///
/// connection:
///   host: "archive.example.com"
///   port: 21
///   username: "reader"
///   password: "secret"
///   pool_size: 10
///
/// layout:
///   source_directory: "ARCHIVE"
///   send_subdirectory: "Send File"
/// ```
///
/// CLI arguments take precedence over config file values; the merging
/// behavior is defined in the `merge_with_cli` method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Search patterns: keywords, regular expressions or XPath expressions,
    /// depending on `mode`
    #[serde(default)]
    pub patterns: Vec<String>,

    /// How `patterns` are interpreted
    #[serde(default)]
    pub mode: SearchMode,

    /// Match content case-sensitively (text and regex modes)
    #[serde(default)]
    pub case_sensitive: bool,

    /// Glob pattern applied to filenames during discovery (`*` and `?`)
    #[serde(default)]
    pub file_pattern: Option<String>,

    /// First date directory to search (inclusive)
    pub start_date: NaiveDate,

    /// Last date directory to search (inclusive)
    pub end_date: NaiveDate,

    /// When set, search this local directory tree instead of the FTP server
    #[serde(default)]
    pub local_root: Option<PathBuf>,

    /// Number of worker threads matching file content. Independent of the
    /// connection pool size.
    #[serde(default = "default_thread_count")]
    pub thread_count: NonZeroUsize,

    /// Report per-keyword occurrence counts instead of stopping at the
    /// first hit
    #[serde(default)]
    pub find_all: bool,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub layout: LayoutConfig,
}

/// Strategy used to evaluate `patterns` against file content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Multi-keyword literal matching
    #[default]
    Text,
    /// Regular expressions, first pattern to match wins
    Regex,
    /// Restricted XPath: `//tag`, `/a/b/c`, bare `tag`
    Xpath,
    /// Match on the discovery glob only, file content is never read
    Filename,
}

/// FTP connection and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_username")]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Connect and socket timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Total attempts per file on connection-class failures
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay between attempts; attempt `n` waits `n - 1` times this
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Maximum number of concurrent FTP sessions
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

/// Streaming and chunking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Window size for chunked content matching
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Bytes kept from the end of one window as the prefix of the next, so
    /// matches straddling a window boundary are not missed
    #[serde(default = "default_overlap_size")]
    pub overlap_size: usize,

    /// Files larger than this are skipped, never searched
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
}

/// Remote directory layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutConfig {
    /// Root directory holding the date directories; empty means the server
    /// root
    #[serde(default)]
    pub source_directory: String,

    /// Sub-directory under each date directory holding the XML files
    #[serde(default = "default_send_subdirectory")]
    pub send_subdirectory: String,
}

fn default_thread_count() -> NonZeroUsize {
    NonZeroUsize::new(8).unwrap()
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_port() -> u16 {
    21
}

fn default_username() -> String {
    "anonymous".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    1
}

fn default_pool_size() -> usize {
    10
}

fn default_chunk_size() -> usize {
    256 * 1024
}

fn default_overlap_size() -> usize {
    1024
}

fn default_max_file_size_mb() -> u64 {
    50
}

fn default_send_subdirectory() -> String {
    "Send File".to_string()
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            username: default_username(),
            password: String::new(),
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
            pool_size: default_pool_size(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap_size: default_overlap_size(),
            max_file_size_mb: default_max_file_size_mb(),
        }
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            source_directory: String::new(),
            send_subdirectory: default_send_subdirectory(),
        }
    }
}

impl SearchConfig {
    /// Loads configuration from the default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Loads configuration from a specific file
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        // Default config locations
        let config_files = [
            // Global config
            dirs::config_dir().map(|p| p.join("xmlscout/config.yaml")),
            // Local config
            Some(PathBuf::from(".xmlscout.yaml")),
            // Custom config
            config_path.map(PathBuf::from),
        ];

        // Add existing config files
        for path in config_files.iter().flatten() {
            if path.exists() {
                builder = builder.add_source(File::from(path.as_path()));
            }
        }

        // Build and deserialize
        builder.build()?.try_deserialize()
    }

    /// Merges CLI arguments with configuration file values
    pub fn merge_with_cli(mut self, cli_config: SearchConfig) -> Self {
        // CLI values take precedence over config file values
        if !cli_config.patterns.is_empty() {
            self.patterns = cli_config.patterns;
        }
        if cli_config.mode != SearchMode::default() {
            self.mode = cli_config.mode;
        }
        if cli_config.case_sensitive {
            self.case_sensitive = true;
        }
        if cli_config.file_pattern.is_some() {
            self.file_pattern = cli_config.file_pattern;
        }
        self.start_date = cli_config.start_date;
        self.end_date = cli_config.end_date;
        if cli_config.local_root.is_some() {
            self.local_root = cli_config.local_root;
        }
        // Always use CLI thread count if specified
        self.thread_count = cli_config.thread_count;
        if cli_config.find_all {
            self.find_all = true;
        }
        if cli_config.log_level != default_log_level() {
            self.log_level = cli_config.log_level;
        }
        if !cli_config.connection.host.is_empty() {
            self.connection = cli_config.connection;
        }
        self
    }

    /// Size cutoff in bytes derived from `max_file_size_mb`
    pub fn max_file_size_bytes(&self) -> u64 {
        self.stream.max_file_size_mb * 1024 * 1024
    }
}
