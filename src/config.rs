//! Configuration management for Leafscan
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.
//! Collaborator base URLs are only ever read from here.

use crate::error::{LeafscanError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

/// Main configuration structure for Leafscan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Auth/identity collaborator settings
    #[serde(default)]
    pub auth: AuthConfig,
    /// Inference collaborator settings
    #[serde(default)]
    pub inference: InferenceConfig,
    /// Session persistence settings
    #[serde(default)]
    pub session: SessionConfig,
    /// Upload pipeline behavior
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Local scan record storage
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Auth collaborator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Base URL; `/auth/login`, `/auth/signup` and `/auth/me` are joined onto it
    #[serde(default = "default_auth_base_url")]
    pub base_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_auth_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            base_url: default_auth_base_url(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

/// Inference collaborator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Full URL of the prediction endpoint
    #[serde(default = "default_predict_url")]
    pub predict_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_predict_url() -> String {
    "http://localhost:8000/predict".to_string()
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            predict_url: default_predict_url(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

/// Where the session token is persisted between runs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TokenBackend {
    /// OS native credential store
    #[default]
    Keyring,
    /// JSON file under the user's config directory
    File,
    /// Process memory only; nothing survives a restart
    Memory,
}

impl std::str::FromStr for TokenBackend {
    type Err = LeafscanError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "keyring" => Ok(TokenBackend::Keyring),
            "file" => Ok(TokenBackend::File),
            "memory" => Ok(TokenBackend::Memory),
            other => Err(LeafscanError::Config(format!(
                "Invalid token backend: {}. Must be one of: keyring, file, memory",
                other
            ))),
        }
    }
}

/// Session persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionConfig {
    /// Durable token store backend
    #[serde(default)]
    pub token_backend: TokenBackend,

    /// Override path for the `file` backend
    #[serde(default)]
    pub token_file: Option<PathBuf>,
}

/// Whether a classification may be submitted without a session token
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubmitPolicy {
    /// Attach the credential when present, otherwise submit anonymously
    #[default]
    AllowAnonymous,
    /// Refuse to submit without a session token
    RequireSession,
}

impl std::str::FromStr for SubmitPolicy {
    type Err = LeafscanError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "allow_anonymous" => Ok(SubmitPolicy::AllowAnonymous),
            "require_session" => Ok(SubmitPolicy::RequireSession),
            other => Err(LeafscanError::Config(format!(
                "Invalid submit policy: {}. Must be one of: allow_anonymous, require_session",
                other
            ))),
        }
    }
}

/// How preview resources are minted for a selected file
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PreviewKind {
    /// Thumbnail PNG written to the cache directory
    #[default]
    Thumbnail,
    /// Base64 data URI held in memory
    Inline,
}

/// Upload pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of recent classifications kept in the rolling history
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Anonymous submission policy
    #[serde(default)]
    pub submit_policy: SubmitPolicy,

    /// Preview minting strategy
    #[serde(default)]
    pub preview: PreviewKind,

    /// Override directory for thumbnail previews
    #[serde(default)]
    pub preview_dir: Option<PathBuf>,
}

fn default_history_capacity() -> usize {
    3
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
            submit_policy: SubmitPolicy::default(),
            preview: PreviewKind::default(),
            preview_dir: None,
        }
    }
}

/// Scan record storage configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    /// Override path for the scans database
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Returns
    ///
    /// Returns the loaded and merged configuration
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| LeafscanError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| LeafscanError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(auth_url) = std::env::var("LEAFSCAN_AUTH_URL") {
            self.auth.base_url = auth_url;
        }

        if let Ok(predict_url) = std::env::var("LEAFSCAN_PREDICT_URL") {
            self.inference.predict_url = predict_url;
        }

        if let Ok(timeout) = std::env::var("LEAFSCAN_TIMEOUT_SECONDS") {
            if let Ok(value) = timeout.parse() {
                self.auth.timeout_seconds = value;
                self.inference.timeout_seconds = value;
            } else {
                tracing::warn!("Invalid LEAFSCAN_TIMEOUT_SECONDS: {}", timeout);
            }
        }

        if let Ok(capacity) = std::env::var("LEAFSCAN_HISTORY_CAPACITY") {
            if let Ok(value) = capacity.parse() {
                self.pipeline.history_capacity = value;
            } else {
                tracing::warn!("Invalid LEAFSCAN_HISTORY_CAPACITY: {}", capacity);
            }
        }

        if let Ok(policy) = std::env::var("LEAFSCAN_SUBMIT_POLICY") {
            match policy.parse() {
                Ok(value) => self.pipeline.submit_policy = value,
                Err(e) => tracing::warn!("Ignoring LEAFSCAN_SUBMIT_POLICY: {}", e),
            }
        }

        if let Ok(backend) = std::env::var("LEAFSCAN_TOKEN_BACKEND") {
            match backend.parse() {
                Ok(value) => self.session.token_backend = value,
                Err(e) => tracing::warn!("Ignoring LEAFSCAN_TOKEN_BACKEND: {}", e),
            }
        }

        if let Ok(db_path) = std::env::var("LEAFSCAN_SCANS_DB") {
            self.storage.db_path = Some(PathBuf::from(db_path));
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(auth_url) = &cli.auth_url {
            self.auth.base_url = auth_url.clone();
        }
        if let Some(predict_url) = &cli.predict_url {
            self.inference.predict_url = predict_url.clone();
        }
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns error if a URL does not parse as http(s), a timeout is zero,
    /// or the history capacity is outside `1..=100`
    pub fn validate(&self) -> Result<()> {
        validate_http_url("auth.base_url", &self.auth.base_url)?;
        validate_http_url("inference.predict_url", &self.inference.predict_url)?;

        if self.auth.timeout_seconds == 0 || self.inference.timeout_seconds == 0 {
            return Err(
                LeafscanError::Config("timeout_seconds must be greater than 0".to_string()).into(),
            );
        }

        if self.pipeline.history_capacity == 0 {
            return Err(LeafscanError::Config(
                "pipeline.history_capacity must be greater than 0".to_string(),
            )
            .into());
        }

        if self.pipeline.history_capacity > 100 {
            return Err(LeafscanError::Config(
                "pipeline.history_capacity must be less than or equal to 100".to_string(),
            )
            .into());
        }

        Ok(())
    }
}

fn validate_http_url(field: &str, value: &str) -> Result<()> {
    let parsed = Url::parse(value)
        .map_err(|e| LeafscanError::Config(format!("{} is not a valid URL: {}", field, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(LeafscanError::Config(format!(
            "{} must use http or https, got {}",
            field, other
        ))
        .into()),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auth: AuthConfig::default(),
            inference: InferenceConfig::default(),
            session: SessionConfig::default(),
            pipeline: PipelineConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}
