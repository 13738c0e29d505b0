//! # herald-core: Pure Domain Types for Herald
//!
//! Types shared by the state store and the registration & sync engine. Nothing
//! in here performs I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Herald Architecture                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    Host Application                             │   │
//! │  │  lifecycle events, token callbacks, tag/attribute calls         │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 herald-sync (PushManager)                       │   │
//! │  │   registration, identity, router, coordinator, retry           │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ herald-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐                  │   │
//! │  │   │   types   │  │  payload  │  │ validation│                  │   │
//! │  │   │ Snapshot  │  │ aps, _m,  │  │ tag, key, │                  │   │
//! │  │   │ SyncFact  │  │ _od, _x   │  │ attribute │                  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘                  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK                             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 herald-db (State Store)                         │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Registration, identity, sync state, facts, snapshots
//! - [`payload`] - Notification payload decoding
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation
//!
//! ## Example Usage
//!
//! ```rust
//! use herald_core::DeviceToken;
//!
//! let token = DeviceToken::from_bytes(vec![0xca, 0xfe]);
//! assert_eq!(token.to_hex(), "cafe");
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod payload;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use payload::{LaunchOptions, NotificationPayload};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Version reported in every snapshot's device info.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum tag length in characters.
pub const MAX_TAG_LEN: usize = 128;

/// Maximum attribute name length in characters.
pub const MAX_ATTRIBUTE_NAME_LEN: usize = 128;

/// Maximum attribute value length in characters.
pub const MAX_ATTRIBUTE_VALUE_LEN: usize = 1024;

/// Maximum subscriber key length in characters.
pub const MAX_SUBSCRIBER_KEY_LEN: usize = 256;
