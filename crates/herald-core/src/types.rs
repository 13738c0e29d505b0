//! # Domain Types
//!
//! Core domain types used throughout Herald.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌──────────────────┐  ┌──────────────────┐  ┌──────────────────┐      │
//! │  │DeviceRegistration│  │SubscriberIdentity│  │ TagSet           │      │
//! │  │ ──────────────── │  │ ──────────────── │  │ AttributeMap     │      │
//! │  │ token (bytes)    │  │ subscriber_key   │  │ ──────────────── │      │
//! │  │ registered_at    │  │ (last write wins)│  │ set / name→value │      │
//! │  │ last_error       │  └──────────────────┘  └──────────────────┘      │
//! │  │ push_enabled     │                                                   │
//! │  └──────────────────┘                                                   │
//! │                                                                         │
//! │  ┌──────────────────┐  ┌──────────────────┐  ┌──────────────────┐      │
//! │  │   SyncState      │  │    SyncFact      │  │    Snapshot      │      │
//! │  │ ──────────────── │  │ ──────────────── │  │ ──────────────── │      │
//! │  │ dirty, in_flight │  │ PushDisabled     │  │ everything above │      │
//! │  │ last_attempt     │  │ BadgeReset       │  │ + device info    │      │
//! │  │ last_success     │  │ MessageReceived  │  │ + pending facts  │      │
//! │  │ retry_count      │  │ MessageOpened    │  │ sent in ONE sync │      │
//! │  └──────────────────┘  │ SessionEnded     │  └──────────────────┘      │
//! │                        └──────────────────┘                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::CoreError;

/// Set of tags attached to this installation. Ordered so snapshots are stable.
pub type TagSet = BTreeSet<String>;

/// Attribute name → value. Ordered so snapshots are stable.
pub type AttributeMap = BTreeMap<String, String>;

// =============================================================================
// Device Token
// =============================================================================

/// Opaque push token issued by the platform for this installation.
///
/// Stored and compared as raw bytes; rendered as lowercase hex on the wire.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct DeviceToken(Vec<u8>);

impl DeviceToken {
    /// Wraps raw token bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        DeviceToken(bytes.into())
    }

    /// Parses a hex-encoded token.
    pub fn from_hex(hex_str: &str) -> Result<Self, CoreError> {
        hex::decode(hex_str.trim())
            .map(DeviceToken)
            .map_err(|e| CoreError::InvalidToken(e.to_string()))
    }

    /// Returns the raw token bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the lowercase hex rendering of the token.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// Returns true if the token carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for DeviceToken {
    // Only a prefix is printed; full tokens do not belong in logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        let prefix: String = hex.chars().take(8).collect();
        write!(f, "DeviceToken({}…)", prefix)
    }
}

impl From<DeviceToken> for String {
    fn from(token: DeviceToken) -> Self {
        token.to_hex()
    }
}

impl TryFrom<String> for DeviceToken {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        DeviceToken::from_hex(&value)
    }
}

// =============================================================================
// Device Registration
// =============================================================================

/// Push registration state of this installation.
///
/// Never deleted, only superseded by the next token or failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRegistration {
    /// Current token, if the platform ever issued one.
    pub token: Option<DeviceToken>,

    /// When the current token was received.
    pub registered_at: Option<DateTime<Utc>>,

    /// Last registration error reported by the platform.
    pub last_error: Option<String>,

    /// Whether push is currently enabled for this installation.
    #[serde(default)]
    pub push_enabled: bool,
}

impl DeviceRegistration {
    /// Returns true if `token` is already stored and push is enabled.
    pub fn is_current(&self, token: &DeviceToken) -> bool {
        self.push_enabled && self.token.as_ref() == Some(token)
    }

    /// Stores a freshly issued token.
    pub fn apply_token(&mut self, token: DeviceToken, now: DateTime<Utc>) {
        self.token = Some(token);
        self.registered_at = Some(now);
        self.last_error = None;
        self.push_enabled = true;
    }

    /// Records a registration failure.
    ///
    /// Returns true when a previously working registration just became
    /// disabled, which is the one case the server has to hear about.
    pub fn record_failure(&mut self, error: impl Into<String>) -> bool {
        let was_enabled = self.push_enabled && self.token.is_some();
        self.last_error = Some(error.into());
        self.push_enabled = false;
        was_enabled
    }
}

// =============================================================================
// Subscriber Identity
// =============================================================================

/// The user attributed to this installation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberIdentity {
    /// Subscriber key; last write wins.
    pub subscriber_key: Option<String>,
}

// =============================================================================
// Sync State
// =============================================================================

/// Bookkeeping that drives the sync and retry decisions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Local state has mutations not yet confirmed by the server.
    pub dirty: bool,

    /// A transport call is currently executing.
    pub in_flight: bool,

    /// When the last sync attempt started.
    pub last_attempt: Option<DateTime<Utc>>,

    /// When the last sync was acknowledged.
    pub last_success: Option<DateTime<Utc>>,

    /// Consecutive retryable failures since the last success.
    pub retry_count: u32,
}

// =============================================================================
// Session
// =============================================================================

/// Ephemeral app session; reset on launch and on each processed notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// When the session started.
    pub started_at: DateTime<Utc>,

    /// Message that opened or last touched this session.
    pub current_message_id: Option<String>,
}

impl Session {
    /// Starts a new session with no message attached.
    pub fn start(now: DateTime<Utc>) -> Self {
        Session {
            started_at: now,
            current_message_id: None,
        }
    }

    /// Whole seconds elapsed since the session started (never negative).
    pub fn duration_secs(&self, now: DateTime<Utc>) -> u64 {
        (now - self.started_at).num_seconds().max(0) as u64
    }
}

// =============================================================================
// Application State
// =============================================================================

/// Application state at the moment a payload arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum AppState {
    /// App is running and visible.
    Foreground,
    /// App is running in the background; the user tapped the notification.
    Background,
    /// App was not running and was launched by the notification.
    LaunchedFromNotification,
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppState::Foreground => write!(f, "foreground"),
            AppState::Background => write!(f, "background"),
            AppState::LaunchedFromNotification => write!(f, "launched_from_notification"),
        }
    }
}

// =============================================================================
// Sync Facts
// =============================================================================

/// One-shot facts that ride along with the next snapshot.
///
/// Unlike tags or attributes these are not state: each fact is sent once and
/// dropped after the snapshot carrying it is acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[ts(export)]
pub enum SyncFact {
    /// A working registration was lost (permission revoked, platform error).
    PushDisabled {
        #[ts(as = "String")]
        at: DateTime<Utc>,
    },

    /// The host cleared the app badge; the server should zero its count.
    BadgeReset {
        #[ts(as = "String")]
        at: DateTime<Utc>,
    },

    /// A remote or local notification reached the app.
    MessageReceived {
        message_id: Option<String>,
        app_state: AppState,
        local: bool,
        #[ts(as = "String")]
        at: DateTime<Utc>,
    },

    /// The user opened the app from a notification.
    MessageOpened {
        message_id: Option<String>,
        #[ts(as = "String")]
        at: DateTime<Utc>,
    },

    /// A foreground session ended.
    SessionEnded {
        #[ts(as = "String")]
        started_at: DateTime<Utc>,
        duration_secs: u64,
    },
}

impl SyncFact {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncFact::PushDisabled { .. } => "push_disabled",
            SyncFact::BadgeReset { .. } => "badge_reset",
            SyncFact::MessageReceived { .. } => "message_received",
            SyncFact::MessageOpened { .. } => "message_opened",
            SyncFact::SessionEnded { .. } => "session_ended",
        }
    }

    /// Returns true for analytics facts (suppressed when analytics is off).
    pub fn is_analytics(&self) -> bool {
        matches!(
            self,
            SyncFact::MessageReceived { .. }
                | SyncFact::MessageOpened { .. }
                | SyncFact::SessionEnded { .. }
        )
    }
}

// =============================================================================
// Device Info
// =============================================================================

/// Device metadata carried in every snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DeviceInfo {
    /// Stable per-install identifier (UUID v4, generated once).
    pub device_id: String,

    /// Hardware model string, e.g. "iPhone7,2". Used for segmentation.
    pub hardware_id: String,

    /// Platform name.
    pub platform: String,

    /// Operating system version as reported by the host.
    pub os_version: String,

    /// Version of this library.
    pub sdk_version: String,
}

impl DeviceInfo {
    /// Creates device info with the given identifier and platform defaults.
    pub fn new(device_id: impl Into<String>) -> Self {
        DeviceInfo {
            device_id: device_id.into(),
            hardware_id: "unknown".to_string(),
            platform: std::env::consts::OS.to_string(),
            os_version: "unknown".to_string(),
            sdk_version: crate::SDK_VERSION.to_string(),
        }
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// The full composed state sent in one sync payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Snapshot {
    /// Application the installation belongs to.
    pub app_id: String,

    /// Device metadata.
    pub device: DeviceInfo,

    /// Hex push token, if registered.
    pub token: Option<String>,

    /// Whether push is enabled.
    pub push_enabled: bool,

    /// Subscriber key, if set.
    pub subscriber_key: Option<String>,

    /// All tags.
    pub tags: TagSet,

    /// All attributes.
    pub attributes: AttributeMap,

    /// Facts not yet acknowledged by the server, oldest first.
    pub facts: Vec<SyncFact>,

    /// When this snapshot was composed.
    #[ts(as = "String")]
    pub generated_at: DateTime<Utc>,
}
