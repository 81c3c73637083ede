//! Configuration models for plexkit.
//!
//! All I^R (resolvable ignorance) is parameterized here.
//! The user resolves these unknowns at runtime via config file.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Top-level configuration for plexkit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Plex Media Server connection
    pub plex: PlexConfig,

    /// Album ratings tool settings
    #[serde(default)]
    pub album_ratings: AlbumRatingsConfig,
}

/// Plex Media Server connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlexConfig {
    /// Server base URL (e.g., "http://localhost:32400")
    pub url: String,

    /// X-Plex-Token (can also be set via PLEX_TOKEN env var)
    #[serde(default)]
    pub token: Option<String>,

    /// Environment variable name for the token
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Library section ID of the music library
    pub music_library_id: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Maximum attempts per request
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Page size sent as X-Plex-Container-Size
    #[serde(default = "default_container_size")]
    pub container_size: usize,
}

fn default_token_env() -> String {
    "PLEX_TOKEN".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_container_size() -> usize {
    2000
}

/// Album ratings tool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlbumRatingsConfig {
    /// Minimum delay between requests of the same kind, in milliseconds
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    /// Albums processed concurrently
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Directory the CSV report is written to
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Recalculate albums that already carry a user rating
    #[serde(default)]
    pub rerate: bool,
}

fn default_request_delay_ms() -> u64 {
    100
}

fn default_concurrency() -> usize {
    1
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for AlbumRatingsConfig {
    fn default() -> Self {
        Self {
            request_delay_ms: default_request_delay_ms(),
            concurrency: default_concurrency(),
            output_dir: default_output_dir(),
            rerate: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// B_i(file exists) → Result
    /// B_i(file is valid TOML) → Result
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        Self::from_toml(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Resolve the Plex token from config or environment.
    ///
    /// B_i(token available) → Result
    pub fn resolve_token(&self) -> Result<String, ConfigError> {
        self.resolve_token_with(|name| std::env::var(name).ok())
    }

    /// Resolve the Plex token, looking variables up through `lookup`.
    pub fn resolve_token_with(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<String, ConfigError> {
        if let Some(token) = &self.plex.token {
            return Ok(expand_vars_with(token, &lookup));
        }

        lookup(&self.plex.token_env).ok_or_else(|| ConfigError::MissingToken {
            env_var: self.plex.token_env.clone(),
        })
    }

    /// Check values serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.plex.url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "plex.url must start with http:// or https:// (got '{url}')"
            )));
        }
        if self.plex.music_library_id.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "plex.music_library_id must not be empty".to_string(),
            ));
        }
        if self.plex.container_size == 0 {
            return Err(ConfigError::Invalid(
                "plex.container_size must be at least 1".to_string(),
            ));
        }
        if self.plex.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "plex.max_retries must be at least 1".to_string(),
            ));
        }
        if self.album_ratings.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "album_ratings.concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("valid env var pattern"))
}

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    expand_vars_with(s, |name| std::env::var(name).ok())
}

/// Expand ${VAR_NAME} placeholders using `lookup`.
pub fn expand_vars_with(s: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = s.to_string();

    for cap in env_var_pattern().captures_iter(s) {
        if let Some(value) = lookup(&cap[1]) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

/// Configuration errors.
///
/// Epistemic origin:
/// - B_i falsified: File not found, parse error, invalid value
/// - I^B materialized: Missing required secret
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Missing Plex token: set {env_var} env var or plex.token in config")]
    MissingToken { env_var: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
