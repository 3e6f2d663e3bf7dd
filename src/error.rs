//! Error types for Leafscan
//!
//! This module defines all error types used throughout the application,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for Leafscan operations
///
/// The first group of variants is the session/classification taxonomy
/// surfaced to callers of the core components. The remaining variants wrap
/// ambient failures (configuration, storage, serialization).
#[derive(Error, Debug)]
pub enum LeafscanError {
    /// Client-detectable input problem; never reaches the network
    #[error("Validation error: {0}")]
    Validation(String),

    /// The auth collaborator rejected the identifier/secret pair
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// An operation needed a session token and none is held
    #[error("Not authenticated")]
    Unauthenticated,

    /// The held token was rejected by the auth collaborator
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// Transport-level failure talking to a collaborator
    #[error("Network error: {0}")]
    Network(String),

    /// Classification failed on the inference collaborator or could not be decoded
    #[error("Inference error: {0}")]
    Inference(String),

    /// A submission for the current selection is still outstanding
    #[error("A submission is already in flight")]
    SubmissionInFlight,

    /// Collaborator answered with a non-auth error status
    #[error("Remote service error: status={status}, {detail}")]
    Remote {
        /// HTTP status code returned by the collaborator
        status: u16,
        /// Human-readable detail from the error payload
        detail: String,
    },

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Token or scan storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Keyring/credential storage errors
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),
}

impl LeafscanError {
    /// Returns `true` for errors that mean the held session is no longer usable.
    ///
    /// # Examples
    ///
    /// ```
    /// use leafscan::error::LeafscanError;
    ///
    /// assert!(LeafscanError::SessionExpired("gone".into()).is_auth_rejection());
    /// assert!(!LeafscanError::Network("reset".into()).is_auth_rejection());
    /// ```
    pub fn is_auth_rejection(&self) -> bool {
        matches!(
            self,
            LeafscanError::Unauthenticated | LeafscanError::SessionExpired(_)
        )
    }
}

/// Result type alias for Leafscan operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;
