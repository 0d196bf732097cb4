//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/novax/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/novax/` (~/.config/novax/)
//! - Data: `$XDG_DATA_HOME/novax/` (~/.local/share/novax/)
//! - State/Logs: `$XDG_STATE_HOME/novax/` (~/.local/state/novax/)

use crate::error::{Error, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Level threshold schedule
    #[serde(default)]
    pub leveling: LevelingConfig,

    /// Score dimensions produced by assessments
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// LLM used for scoring (optional; scoring is unavailable without it)
    #[serde(default)]
    pub llm: Option<LlmConfig>,

    /// Where in-progress transcripts are buffered
    #[serde(default)]
    pub transcript: TranscriptConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Level threshold schedule
#[derive(Debug, Deserialize, Clone)]
pub struct LevelingConfig {
    /// Experience needed to clear level 1
    #[serde(default = "default_base_exp")]
    pub base_exp: u64,

    /// Extra experience each further level needs over the previous one
    #[serde(default = "default_step_exp")]
    pub step_exp: u64,
}

impl Default for LevelingConfig {
    fn default() -> Self {
        Self {
            base_exp: default_base_exp(),
            step_exp: default_step_exp(),
        }
    }
}

fn default_base_exp() -> u64 {
    500
}

fn default_step_exp() -> u64 {
    300
}

/// Assessment dimensions
#[derive(Debug, Deserialize, Clone)]
pub struct ScoringConfig {
    /// Names of the dimensions every assessment must score, in output order
    #[serde(default = "default_dimensions")]
    pub dimensions: Vec<String>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            dimensions: default_dimensions(),
        }
    }
}

/// Universal intellectual standards used to grade a discussion.
/// Daily log files are named `{prefix}.{YYYY-MM-DD}.{suffix}`
pub const LOG_FILE_PREFIX: &str = "novax";
pub const LOG_FILE_SUFFIX: &str = "log";

pub const DEFAULT_DIMENSIONS: [&str; 9] = [
    "Clarity",
    "Accuracy",
    "Precision",
    "Relevance",
    "Depth",
    "Breadth",
    "Logic",
    "Significance",
    "Fairness",
];

fn default_dimensions() -> Vec<String> {
    DEFAULT_DIMENSIONS.iter().map(|d| d.to_string()).collect()
}

/// LLM provider configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// Provider type
    pub provider: LlmProvider,
    /// Model to use
    pub model: String,
    /// API endpoint (optional, uses default for provider)
    pub endpoint: Option<String>,
    /// API key (can also use env var)
    pub api_key: Option<String>,
    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    /// Sampling temperature for scoring requests
    #[serde(default = "default_llm_temperature")]
    pub temperature: f32,
}

fn default_llm_timeout() -> u64 {
    60
}

fn default_llm_temperature() -> f32 {
    0.2
}

/// Supported LLM providers
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Ollama,
    Claude,
    OpenAI,
}

impl LlmProvider {
    /// Returns the default endpoint for this provider
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            LlmProvider::Ollama => "http://localhost:11434",
            LlmProvider::Claude => "https://api.anthropic.com",
            LlmProvider::OpenAI => "https://api.openai.com",
        }
    }

    /// Environment variable consulted when no api_key is configured
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            LlmProvider::Ollama => None,
            LlmProvider::Claude => Some("ANTHROPIC_API_KEY"),
            LlmProvider::OpenAI => Some("OPENAI_API_KEY"),
        }
    }
}

/// Storage backend for the transcript buffer
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BufferBackend {
    /// Process-local buffer; lost on restart
    #[default]
    Memory,
    /// Shared Redis lists (requires the `redis` feature)
    Redis,
}

/// Transcript buffer configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TranscriptConfig {
    #[serde(default)]
    pub backend: BufferBackend,

    /// Redis connection URL (e.g., `redis://localhost:6379`)
    pub redis_url: Option<String>,

    /// Key prefix; transcripts live under `{prefix}:{session_id}`
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Idle seconds before an untouched transcript expires (0 = never)
    #[serde(default)]
    pub ttl_secs: u64,
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            backend: BufferBackend::default(),
            redis_url: None,
            key_prefix: default_key_prefix(),
            ttl_secs: 0,
        }
    }
}

fn default_key_prefix() -> String {
    "chat".to_string()
}

impl TranscriptConfig {
    /// Idle expiry, if enabled
    pub fn ttl(&self) -> Option<std::time::Duration> {
        (self.ttl_secs > 0).then(|| std::time::Duration::from_secs(self.ttl_secs))
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.leveling.base_exp == 0 {
            return Err(Error::Config(
                "leveling.base_exp must be greater than zero".to_string(),
            ));
        }

        if self.scoring.dimensions.is_empty() {
            return Err(Error::Config(
                "scoring.dimensions must name at least one dimension".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for dimension in &self.scoring.dimensions {
            if dimension.trim().is_empty() {
                return Err(Error::Config(
                    "scoring.dimensions contains an empty name".to_string(),
                ));
            }
            if !seen.insert(dimension.to_lowercase()) {
                return Err(Error::Config(format!(
                    "scoring.dimensions lists {:?} more than once",
                    dimension
                )));
            }
        }

        if self.transcript.backend == BufferBackend::Redis && self.transcript.redis_url.is_none()
        {
            return Err(Error::Config(
                "transcript.redis_url is required when backend = \"redis\"".to_string(),
            ));
        }

        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/novax/config.toml` (~/.config/novax/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("novax").join("config.toml")
    }

    /// Returns the data directory path (for SQLite database)
    ///
    /// `$XDG_DATA_HOME/novax/` (~/.local/share/novax/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("novax")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/novax/` (~/.local/state/novax/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("novax")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/novax/ledger.db`
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("ledger.db")
    }

    /// Returns the log file written on `date` (UTC)
    ///
    /// `$XDG_STATE_HOME/novax/novax.YYYY-MM-DD.log`
    pub fn log_path(date: NaiveDate) -> PathBuf {
        Self::state_dir().join(format!(
            "{}.{}.{}",
            LOG_FILE_PREFIX,
            date.format("%Y-%m-%d"),
            LOG_FILE_SUFFIX
        ))
    }
}
