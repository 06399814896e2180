//! # Sync Error Types
//!
//! Error types for pipeline operations.
//!
//! Errors here are *infrastructure* failures (transport, persistence,
//! malformed responses). Recoverable remote conditions (HTTP 429 and the
//! hourly quota code) are not errors at all: they are [`ApiOutcome`]
//! values consumed by the transition rule.
//!
//! [`ApiOutcome`]: crate::client::ApiOutcome

use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all pipeline failures.
///
/// ## Design Principles
/// - Each variant includes enough context for debugging
/// - Errors are categorized for different handling strategies
/// - No error escapes a stage invocation: the sequencer converts every
///   error into a terminal `failed` run status
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid bridge configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    /// Invalid ERP endpoint URL.
    #[error("Invalid ERP URL: {0}")]
    InvalidUrl(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// HTTP request could not be completed (network failure, timeout).
    #[error("Transport failure: {0}")]
    Transport(String),

    /// Authentication against the ERP failed.
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// The ERP answered with a body that is not a valid API response.
    #[error("Malformed ERP response: {0}")]
    InvalidResponse(String),

    // =========================================================================
    // Pipeline Errors
    // =========================================================================
    /// Pure pipeline logic rejected the data.
    #[error("Pipeline error: {0}")]
    Core(#[from] storelink_core::CoreError),

    /// Persistence failed.
    #[error("Database error: {0}")]
    Database(#[from] storelink_db::DbError),

    /// Serialization of a persisted or submitted payload failed.
    #[error("Serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    /// Internal pipeline error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Transport(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// True when the error indicates a configuration problem the operator
    /// must fix before any retry can succeed.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
                | SyncError::InvalidUrl(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_categorization() {
        assert!(SyncError::InvalidConfig("missing client code".into()).is_config_error());
        assert!(!SyncError::Transport("connection refused".into()).is_config_error());
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::AuthFailed("bad credentials".into());
        assert_eq!(err.to_string(), "Authentication failed: bad credentials");
    }
}
