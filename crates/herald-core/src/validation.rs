//! # Validation Module
//!
//! Input validation for every value the host can hand to the engine.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Flow                                    │
//! │                                                                         │
//! │  Host calls add_tag(" vip ")                                           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  THIS MODULE: validate_tag(" vip ")                                    │
//! │  ├── empty after trim?   → ValidationError::Required                   │
//! │  ├── too many chars?     → ValidationError::TooLong                    │
//! │  └── OK                  → value stored exactly as given               │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  IdentityStore applies the mutation, marks dirty, requests a sync      │
//! │                                                                         │
//! │  A rejected value never reaches the state lock.                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Values are checked after trimming but stored untouched; case rules are the
//! caller's business.
//!
//! ## Usage
//! ```rust
//! use herald_core::validation::{validate_tag, validate_attribute_name};
//!
//! assert!(validate_tag("vip").is_ok());
//! assert!(validate_tag("   ").is_err());
//! assert!(validate_attribute_name(&"a".repeat(200)).is_err());
//! ```

use crate::error::ValidationError;
use crate::{MAX_ATTRIBUTE_NAME_LEN, MAX_ATTRIBUTE_VALUE_LEN, MAX_SUBSCRIBER_KEY_LEN, MAX_TAG_LEN};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Shared Rules
// =============================================================================

fn non_empty_bounded(value: &str, field: &str, max: usize) -> ValidationResult<()> {
    let trimmed = value.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::required(field));
    }

    if trimmed.chars().count() > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        });
    }

    Ok(())
}

// =============================================================================
// Attribution Validators
// =============================================================================

/// Validates a tag.
///
/// ## Rules
/// - Must not be empty after trimming
/// - At most 128 characters
pub fn validate_tag(tag: &str) -> ValidationResult<()> {
    non_empty_bounded(tag, "tag", MAX_TAG_LEN)
}

/// Validates an attribute name.
///
/// ## Rules
/// - Must not be empty after trimming
/// - At most 128 characters
pub fn validate_attribute_name(name: &str) -> ValidationResult<()> {
    non_empty_bounded(name, "attribute name", MAX_ATTRIBUTE_NAME_LEN)
}

/// Validates an attribute value.
///
/// Empty values are allowed; only the length is capped (1024 characters).
pub fn validate_attribute_value(value: &str) -> ValidationResult<()> {
    if value.chars().count() > MAX_ATTRIBUTE_VALUE_LEN {
        return Err(ValidationError::TooLong {
            field: "attribute value".to_string(),
            max: MAX_ATTRIBUTE_VALUE_LEN,
        });
    }

    Ok(())
}

/// Validates a subscriber key.
///
/// ## Rules
/// - Must not be empty after trimming
/// - At most 256 characters
pub fn validate_subscriber_key(key: &str) -> ValidationResult<()> {
    non_empty_bounded(key, "subscriber key", MAX_SUBSCRIBER_KEY_LEN)
}

// =============================================================================
// Registration Validators
// =============================================================================

/// Validates raw device token bytes handed over by the platform.
pub fn validate_token(bytes: &[u8]) -> ValidationResult<()> {
    if bytes.is_empty() {
        return Err(ValidationError::required("device token"));
    }

    Ok(())
}

/// Validates an application id from configuration.
pub fn validate_app_id(app_id: &str) -> ValidationResult<()> {
    let app_id = app_id.trim();

    if app_id.is_empty() {
        return Err(ValidationError::required("app_id"));
    }

    if app_id.chars().any(char::is_whitespace) {
        return Err(ValidationError::InvalidFormat {
            field: "app_id".to_string(),
            reason: "must not contain whitespace".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
