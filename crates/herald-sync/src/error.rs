//! # Engine Error Types
//!
//! Errors the host application sees from [`PushManager`](crate::PushManager).
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Herald Error Categories                            │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │     Input       │  │      Storage            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Validation     │  │  Storage (DbError)      │ │
//! │  │  InvalidUrl     │  │  InvalidPayload │  │                         │ │
//! │  │  ConfigLoad/Save│  │                 │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  Sync failures never come back through these Results. They are         │
//! │  retried (TransportError::Retryable) or surfaced once through          │
//! │  SyncEventListener::on_fatal_error (TransportError::Permanent).        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use herald_core::{CoreError, ValidationError};
use herald_db::DbError;

/// Result type alias for engine operations.
pub type HeraldResult<T> = Result<T, HeraldError>;

/// Errors returned by engine operations.
#[derive(Debug, Error)]
pub enum HeraldError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid sync endpoint.
    #[error("Invalid sync endpoint: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Input Errors
    // =========================================================================
    /// Rejected tag, attribute, subscriber key or token. Nothing was changed.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Notification payload could not be decoded.
    #[error("Invalid notification payload: {0}")]
    InvalidPayload(String),

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// Persisting a mutation failed. The in-memory change is kept and will be
    /// written by the next successful flush.
    #[error("Storage error: {0}")]
    Storage(#[from] DbError),

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    /// The manager was shut down.
    #[error("Push manager is shut down")]
    ShuttingDown,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CoreError> for HeraldError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(v) => HeraldError::Validation(v),
            CoreError::InvalidPayload(msg) => HeraldError::InvalidPayload(msg),
            CoreError::InvalidToken(msg) => HeraldError::Validation(ValidationError::InvalidFormat {
                field: "device token".to_string(),
                reason: msg,
            }),
        }
    }
}

impl From<url::ParseError> for HeraldError {
    fn from(err: url::ParseError) -> Self {
        HeraldError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for HeraldError {
    fn from(err: std::io::Error) -> Self {
        HeraldError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for HeraldError {
    fn from(err: toml::de::Error) -> Self {
        HeraldError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for HeraldError {
    fn from(err: toml::ser::Error) -> Self {
        HeraldError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl HeraldError {
    /// Returns true if repeating the same call may succeed.
    ///
    /// Only storage hiccups qualify; bad input and bad configuration never do.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HeraldError::Storage(DbError::PoolExhausted)
                | HeraldError::Storage(DbError::ConnectionFailed(_))
                | HeraldError::Storage(DbError::QueryFailed(_))
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            HeraldError::InvalidConfig(_)
                | HeraldError::InvalidUrl(_)
                | HeraldError::ConfigLoadFailed(_)
                | HeraldError::ConfigSaveFailed(_)
        )
    }

    /// Returns true if the caller passed invalid input.
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            HeraldError::Validation(_) | HeraldError::InvalidPayload(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert!(HeraldError::Storage(DbError::PoolExhausted).is_retryable());
        assert!(!HeraldError::Validation(ValidationError::required("tag")).is_retryable());

        assert!(HeraldError::InvalidUrl("ftp://x".into()).is_config_error());
        assert!(!HeraldError::ShuttingDown.is_config_error());

        assert!(HeraldError::Validation(ValidationError::required("tag")).is_validation_error());
    }

    #[test]
    fn test_core_error_mapping() {
        let err: HeraldError = CoreError::InvalidToken("odd length".into()).into();
        assert!(err.is_validation_error());

        let err: HeraldError = CoreError::InvalidPayload("not an object".into()).into();
        assert!(matches!(err, HeraldError::InvalidPayload(_)));
    }

    #[test]
    fn test_validation_message_is_transparent() {
        let err: HeraldError = ValidationError::required("tag").into();
        assert_eq!(err.to_string(), "tag is required");
    }
}
