//! Configuration module for mailmirror.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.
//! Components receive the section they need at construction time.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for mailmirror.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub archive: ArchiveConfig,
    pub sync: SyncConfig,
    pub retry: RetryConfig,
    pub logging: LoggingConfig,
    pub graph: GraphConfig,
}

/// Archive layout settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Root directory of the local archive.
    pub root: PathBuf,
    /// File name of the state database, relative to `root`.
    pub database: String,
    /// Directory (relative to `root`) holding live message files.
    pub messages_dir: String,
    /// Directory (relative to `root`) mirroring quarantined message files.
    pub quarantine_dir: String,
}

/// Synchronization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Mailbox name recorded in the sync state row.
    pub mailbox: String,
    /// Number of folders synced concurrently.
    pub parallelism: usize,
    /// Entries requested per remote page.
    pub page_size: u32,
    /// Minutes subtracted from the last sync time when a cursor is invalidated.
    pub overlap_minutes: i64,
    /// Folder exclusion glob patterns.
    pub exclude: Vec<String>,
    /// Age (in hours) after which leftover temp files are removed.
    pub temp_max_age_hours: u64,
}

/// Remote call retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt before the error is escalated.
    pub max_retries: u32,
    /// Delay before the first retry (in milliseconds).
    pub base_delay_ms: u64,
    /// Upper bound for any single delay (in milliseconds).
    pub max_delay_ms: u64,
    /// Randomise delays by ±25%.
    pub jitter: bool,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
}

/// Microsoft Graph mail source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// API base URL.
    pub base_url: String,
    /// User principal whose mailbox is mirrored (`me` for the signed-in user).
    pub user: String,
    /// Environment variable holding the bearer token.
    pub token_env: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/mailmirror/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("mailmirror")
            .join("config.yaml")
    }
}

impl ArchiveConfig {
    /// Absolute path of the state database file.
    pub fn database_path(&self) -> PathBuf {
        self.root.join(&self.database)
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            root: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("~/.local/share"))
                .join("mailmirror"),
            database: "state.db".to_string(),
            messages_dir: "messages".to_string(),
            quarantine_dir: "quarantine".to_string(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            mailbox: "default".to_string(),
            parallelism: 4,
            page_size: 50,
            overlap_minutes: 60,
            exclude: Vec::new(),
            temp_max_age_hours: 24,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            jitter: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            base_url: "https://graph.microsoft.com/v1.0".to_string(),
            user: "me".to_string(),
            token_env: "MAILMIRROR_TOKEN".to_string(),
            timeout_secs: 60,
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.parallelism"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

fn is_plain_dir_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut push = |field: &str, message: String| {
            errors.push(ValidationError {
                field: field.into(),
                message,
            })
        };

        // --- archive ---
        if self.archive.root.as_os_str().is_empty() {
            push("archive.root", "must not be empty".into());
        }
        if !is_plain_dir_name(&self.archive.database) {
            push(
                "archive.database",
                format!("must be a plain file name: '{}'", self.archive.database),
            );
        }
        if !is_plain_dir_name(&self.archive.messages_dir) {
            push(
                "archive.messages_dir",
                format!("must be a plain directory name: '{}'", self.archive.messages_dir),
            );
        }
        if !is_plain_dir_name(&self.archive.quarantine_dir) {
            push(
                "archive.quarantine_dir",
                format!(
                    "must be a plain directory name: '{}'",
                    self.archive.quarantine_dir
                ),
            );
        }
        if self.archive.messages_dir == self.archive.quarantine_dir {
            push(
                "archive.quarantine_dir",
                "must differ from archive.messages_dir".into(),
            );
        }

        // --- sync ---
        if self.sync.mailbox.trim().is_empty() {
            push("sync.mailbox", "must not be empty".into());
        }
        if self.sync.parallelism == 0 || self.sync.parallelism > 64 {
            push("sync.parallelism", "must be in range 1..=64".into());
        }
        if self.sync.page_size == 0 || self.sync.page_size > 1000 {
            push("sync.page_size", "must be in range 1..=1000".into());
        }
        if self.sync.overlap_minutes < 0 {
            push("sync.overlap_minutes", "must not be negative".into());
        }
        for pattern in &self.sync.exclude {
            if let Err(e) = glob::Pattern::new(pattern) {
                push(
                    "sync.exclude",
                    format!("invalid glob pattern '{pattern}': {e}"),
                );
            }
        }

        // --- retry ---
        if self.retry.base_delay_ms == 0 {
            push("retry.base_delay_ms", "must be greater than 0".into());
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            push(
                "retry.max_delay_ms",
                format!(
                    "max_delay_ms ({}) must not be below base_delay_ms ({})",
                    self.retry.max_delay_ms, self.retry.base_delay_ms
                ),
            );
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            push(
                "logging.level",
                format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            );
        }

        // --- graph ---
        if url_scheme_ok(&self.graph.base_url).is_none() {
            push(
                "graph.base_url",
                format!("must be an http(s) URL: '{}'", self.graph.base_url),
            );
        }
        if self.graph.user.trim().is_empty() {
            push("graph.user", "must not be empty".into());
        }
        if self.graph.token_env.trim().is_empty() {
            push("graph.token_env", "must not be empty".into());
        }
        if self.graph.timeout_secs == 0 {
            push("graph.timeout_secs", "must be greater than 0".into());
        }

        errors
    }
}

fn url_scheme_ok(url: &str) -> Option<()> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))?;
    (!rest.is_empty()).then_some(())
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use mailmirror_core::config::ConfigBuilder;
/// use std::path::PathBuf;
///
/// let config = ConfigBuilder::new()
///     .archive_root(PathBuf::from("/srv/mail-archive"))
///     .sync_parallelism(8)
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- archive ---

    pub fn archive_root(mut self, root: PathBuf) -> Self {
        self.config.archive.root = root;
        self
    }

    pub fn archive_database(mut self, name: impl Into<String>) -> Self {
        self.config.archive.database = name.into();
        self
    }

    // --- sync ---

    pub fn sync_mailbox(mut self, mailbox: impl Into<String>) -> Self {
        self.config.sync.mailbox = mailbox.into();
        self
    }

    pub fn sync_parallelism(mut self, n: usize) -> Self {
        self.config.sync.parallelism = n;
        self
    }

    pub fn sync_page_size(mut self, n: u32) -> Self {
        self.config.sync.page_size = n;
        self
    }

    pub fn sync_overlap_minutes(mut self, minutes: i64) -> Self {
        self.config.sync.overlap_minutes = minutes;
        self
    }

    pub fn sync_exclude(mut self, patterns: Vec<String>) -> Self {
        self.config.sync.exclude = patterns;
        self
    }

    pub fn sync_temp_max_age_hours(mut self, hours: u64) -> Self {
        self.config.sync.temp_max_age_hours = hours;
        self
    }

    // --- retry ---

    pub fn retry_max_retries(mut self, n: u32) -> Self {
        self.config.retry.max_retries = n;
        self
    }

    pub fn retry_delays_ms(mut self, base: u64, max: u64) -> Self {
        self.config.retry.base_delay_ms = base;
        self.config.retry.max_delay_ms = max;
        self
    }

    pub fn retry_jitter(mut self, jitter: bool) -> Self {
        self.config.retry.jitter = jitter;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    // --- graph ---

    pub fn graph_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.graph.base_url = url.into();
        self
    }

    pub fn graph_user(mut self, user: impl Into<String>) -> Self {
        self.config.graph.user = user.into();
        self
    }

    pub fn graph_token_env(mut self, var: impl Into<String>) -> Self {
        self.config.graph.token_env = var.into();
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
