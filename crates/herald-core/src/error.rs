//! # Error Types
//!
//! Domain-specific error types for herald-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  herald-core errors (this file)                                        │
//! │  ├── CoreError        - Payload / token decoding failures              │
//! │  └── ValidationError  - Rejected tag, attribute, key or token input    │
//! │                                                                         │
//! │  herald-db errors (separate crate)                                     │
//! │  └── DbError          - Store read/write failures                      │
//! │                                                                         │
//! │  herald-sync errors (separate crate)                                   │
//! │  └── HeraldError      - What the host application sees                 │
//! │                                                                         │
//! │  Flow: ValidationError → HeraldError::Validation → host caller         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A validation error is always returned before any state is touched, so a
//! rejected call has no side effect.

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Errors raised while decoding data handed to the engine by the platform.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A push payload could not be interpreted.
    #[error("Invalid notification payload: {0}")]
    InvalidPayload(String),

    /// A device token string was not valid hex.
    #[error("Invalid device token: {0}")]
    InvalidToken(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Returned synchronously to the immediate caller of a mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Invalid format.
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

impl ValidationError {
    /// Shorthand for [`ValidationError::Required`].
    pub fn required(field: &str) -> Self {
        ValidationError::Required {
            field: field.to_string(),
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;
