//! # Notification Payloads
//!
//! Decoding of the push dictionaries the platform hands to the app.
//!
//! ## Payload Shape
//! ```text
//! {
//!   "aps": {
//!     "alert": "Sale ends tonight"        ← or { "body": "..." }
//!     "badge": 3,
//!     "sound": "default"                 ← or { "critical": 1, "name": "..." }
//!   },
//!   "_m":  "message-id",                  ← message id (analytics)
//!   "_od": "custom://deep/link",          ← OpenDirect content
//!   "_x":  "https://example.com/landing"  ← URL to open
//! }
//! ```
//!
//! Unknown keys are ignored; every field is optional.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{CoreError, CoreResult};

// =============================================================================
// Notification Payload
// =============================================================================

/// A decoded remote or local notification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationPayload {
    /// Server-side message identifier.
    pub message_id: Option<String>,

    /// Alert text.
    pub alert: Option<String>,

    /// OpenDirect content for the payload delegate.
    pub open_direct: Option<String>,

    /// URL the host may open.
    pub url: Option<String>,

    /// Badge count requested by the sender.
    pub badge: Option<u32>,

    /// Sound name requested by the sender.
    pub sound: Option<String>,
}

#[derive(Deserialize)]
struct RawPayload {
    #[serde(default)]
    aps: Option<Value>,
    #[serde(rename = "_m", default)]
    message_id: Option<Value>,
    #[serde(rename = "_od", default)]
    open_direct: Option<Value>,
    #[serde(rename = "_x", default)]
    url: Option<Value>,
}

#[derive(Deserialize, Default)]
struct RawAps {
    #[serde(default)]
    alert: Option<Value>,
    #[serde(default)]
    badge: Option<Value>,
    #[serde(default)]
    sound: Option<Value>,
}

impl NotificationPayload {
    /// Decodes a payload from its JSON dictionary.
    ///
    /// Only a non-object payload is rejected. Fields of an unexpected shape
    /// are dropped so the arrival is still routed and recorded.
    pub fn from_json(value: &Value) -> CoreResult<Self> {
        if !value.is_object() {
            return Err(CoreError::InvalidPayload(
                "payload must be a JSON object".to_string(),
            ));
        }

        let raw: RawPayload = serde_json::from_value(value.clone())
            .map_err(|e| CoreError::InvalidPayload(e.to_string()))?;

        let aps: RawAps = raw
            .aps
            .filter(Value::is_object)
            .and_then(|aps| serde_json::from_value(aps).ok())
            .unwrap_or_default();

        Ok(NotificationPayload {
            message_id: raw.message_id.and_then(scalar_text),
            alert: aps.alert.and_then(alert_text),
            open_direct: raw.open_direct.and_then(scalar_text),
            url: raw.url.and_then(scalar_text),
            badge: aps.badge.and_then(badge_count),
            sound: aps.sound.and_then(sound_name),
        })
    }

    /// Decodes a payload from a JSON string.
    pub fn from_str(json: &str) -> CoreResult<Self> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| CoreError::InvalidPayload(e.to_string()))?;
        Self::from_json(&value)
    }

    /// Returns true if the payload carries OpenDirect content.
    pub fn has_open_direct(&self) -> bool {
        self.open_direct.is_some()
    }
}

fn alert_text(alert: Value) -> Option<String> {
    match alert {
        Value::String(s) => non_empty(Some(s)),
        Value::Object(map) => map
            .get("body")
            .and_then(Value::as_str)
            .map(str::to_string)
            .and_then(|s| non_empty(Some(s))),
        _ => None,
    }
}

/// Critical alerts carry `{ "critical": 1, "name": "...", "volume": 1.0 }`.
fn sound_name(sound: Value) -> Option<String> {
    match sound {
        Value::String(s) => non_empty(Some(s)),
        Value::Object(map) => map
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .and_then(|s| non_empty(Some(s))),
        _ => None,
    }
}

fn badge_count(badge: Value) -> Option<u32> {
    match badge {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn scalar_text(value: Value) -> Option<String> {
    match value {
        Value::String(s) => non_empty(Some(s)),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

// =============================================================================
// Launch Options
// =============================================================================

/// What the platform passed to the app at launch.
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    /// Remote notification that launched the app, if any.
    pub notification: Option<NotificationPayload>,
}

impl LaunchOptions {
    /// Launch caused by tapping a notification.
    pub fn from_notification(payload: NotificationPayload) -> Self {
        LaunchOptions {
            notification: Some(payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_full_payload() {
        let payload = NotificationPayload::from_json(&json!({
            "aps": { "alert": "Hello", "badge": 2, "sound": "default" },
            "_m": "msg-1",
            "_od": "app://promo",
            "_x": "https://example.com",
            "extra": true
        }))
        .unwrap();

        assert_eq!(payload.message_id.as_deref(), Some("msg-1"));
        assert_eq!(payload.alert.as_deref(), Some("Hello"));
        assert_eq!(payload.open_direct.as_deref(), Some("app://promo"));
        assert_eq!(payload.url.as_deref(), Some("https://example.com"));
        assert_eq!(payload.badge, Some(2));
        assert!(payload.has_open_direct());
    }

    #[test]
    fn test_alert_dictionary_body() {
        let payload =
            NotificationPayload::from_str(r#"{"aps":{"alert":{"title":"T","body":"B"}}}"#)
                .unwrap();
        assert_eq!(payload.alert.as_deref(), Some("B"));
    }

    #[test]
    fn test_empty_strings_are_absent() {
        let payload = NotificationPayload::from_json(&json!({ "_od": "", "_x": "  " })).unwrap();
        assert!(!payload.has_open_direct());
        assert!(payload.url.is_none());
        assert!(payload.alert.is_none());
    }

    #[test]
    fn test_critical_sound_dictionary() {
        let payload = NotificationPayload::from_json(&json!({
            "aps": {
                "alert": "Hi",
                "sound": { "critical": 1, "name": "alarm.caf", "volume": 0.8 }
            },
            "_m": "m-3"
        }))
        .unwrap();

        assert_eq!(payload.sound.as_deref(), Some("alarm.caf"));
        assert_eq!(payload.alert.as_deref(), Some("Hi"));
        assert_eq!(payload.message_id.as_deref(), Some("m-3"));
    }

    #[test]
    fn test_odd_field_shapes_are_tolerated() {
        let payload = NotificationPayload::from_json(&json!({
            "aps": { "alert": "Hi", "badge": "4", "sound": true },
            "_m": 42,
            "_od": { "nested": true }
        }))
        .unwrap();

        assert_eq!(payload.badge, Some(4));
        assert!(payload.sound.is_none());
        assert_eq!(payload.message_id.as_deref(), Some("42"));
        assert!(!payload.has_open_direct());

        let payload = NotificationPayload::from_json(&json!({ "aps": "x", "_m": "m-4" })).unwrap();
        assert!(payload.alert.is_none());
        assert_eq!(payload.message_id.as_deref(), Some("m-4"));
    }

    #[test]
    fn test_rejects_non_object() {
        assert!(NotificationPayload::from_json(&json!([1, 2])).is_err());
        assert!(NotificationPayload::from_str("not json").is_err());
    }
}
