//! # Notification Router
//!
//! Decides what happens to a notification that reached the app.
//!
//! ## Decision Table
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. delegate registered                                                 │
//! │     AND (state ≠ Foreground OR delegate wants foreground delivery)     │
//! │     AND payload has OpenDirect content                                 │
//! │        → deliver content to delegate, no URL handling                  │
//! │                                                                         │
//! │  2. Foreground AND show_alert_while_running AND payload has alert text │
//! │        → AlertRequest { message, play_sound: false }                   │
//! │                                                                         │
//! │  3. not Foreground AND payload has URL AND no delegate                 │
//! │        → OpenUrl(url) for the host                                     │
//! │                                                                         │
//! │  4. otherwise → NoAction                                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Independently of the decision, every arrival yields analytics facts for
//! the next sync (see [`facts_for`]).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;
use ts_rs::TS;

use herald_core::{AppState, NotificationPayload, SyncFact};

// =============================================================================
// Host Collaborators
// =============================================================================

/// Receives OpenDirect content from notifications.
pub trait PayloadDelegate: Send + Sync {
    fn deliver(&self, content: &str);

    /// Also deliver while the app is in the foreground.
    fn wants_foreground_delivery(&self) -> bool {
        false
    }
}

/// Shows an in-app alert on the host's behalf.
pub trait AlertPresenter: Send + Sync {
    fn present(&self, request: &AlertRequest);
}

/// Alert to show for a notification that arrived in the foreground.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct AlertRequest {
    pub message: String,
    pub play_sound: bool,
}

/// What the router did with a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[serde(tag = "action", content = "value", rename_all = "snake_case")]
#[ts(export)]
pub enum RouteDecision {
    /// OpenDirect content went to the payload delegate.
    DeliveredToDelegate,
    /// An alert was requested.
    AlertRequested(AlertRequest),
    /// The host should open this URL.
    OpenUrl(String),
    NoAction,
}

// =============================================================================
// Router
// =============================================================================

/// Routes notifications to the delegate, the alert presenter or the host.
pub struct NotificationRouter {
    show_alert_while_running: AtomicBool,
    delegate: RwLock<Option<Arc<dyn PayloadDelegate>>>,
    presenter: RwLock<Option<Arc<dyn AlertPresenter>>>,
}

impl NotificationRouter {
    pub fn new(show_alert_while_running: bool) -> Self {
        NotificationRouter {
            show_alert_while_running: AtomicBool::new(show_alert_while_running),
            delegate: RwLock::new(None),
            presenter: RwLock::new(None),
        }
    }

    pub fn set_show_alert_while_running(&self, show: bool) {
        self.show_alert_while_running.store(show, Ordering::Relaxed);
    }

    pub fn show_alert_while_running(&self) -> bool {
        self.show_alert_while_running.load(Ordering::Relaxed)
    }

    pub fn set_delegate(&self, delegate: Option<Arc<dyn PayloadDelegate>>) {
        *self.delegate.write() = delegate;
    }

    pub fn set_presenter(&self, presenter: Option<Arc<dyn AlertPresenter>>) {
        *self.presenter.write() = presenter;
    }

    /// Routes one notification. Host callbacks run with no lock held.
    pub fn route(&self, payload: &NotificationPayload, app_state: AppState) -> RouteDecision {
        let foreground = app_state == AppState::Foreground;
        let delegate = self.delegate.read().clone();

        if let (Some(delegate), Some(content)) = (&delegate, &payload.open_direct) {
            if !foreground || delegate.wants_foreground_delivery() {
                debug!(%app_state, "Delivering OpenDirect content to delegate");
                delegate.deliver(content);
                return RouteDecision::DeliveredToDelegate;
            }
        }

        // Silent payloads have nothing to present
        let alert = payload
            .alert
            .as_ref()
            .filter(|_| foreground && self.show_alert_while_running());
        if let Some(message) = alert {
            let request = AlertRequest {
                message: message.clone(),
                play_sound: false,
            };
            let presenter = self.presenter.read().clone();
            match presenter {
                Some(presenter) => presenter.present(&request),
                None => debug!("No alert presenter registered, leaving alert to host"),
            }
            return RouteDecision::AlertRequested(request);
        }

        if !foreground && delegate.is_none() {
            if let Some(ref url) = payload.url {
                return RouteDecision::OpenUrl(url.clone());
            }
        }

        RouteDecision::NoAction
    }
}

impl std::fmt::Debug for NotificationRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationRouter")
            .field("show_alert_while_running", &self.show_alert_while_running())
            .field("has_delegate", &self.delegate.read().is_some())
            .field("has_presenter", &self.presenter.read().is_some())
            .finish()
    }
}

/// Analytics facts recorded for one arrival.
///
/// Opened notifications (background tap or launch) also yield
/// `MessageOpened`.
pub fn facts_for(
    payload: &NotificationPayload,
    app_state: AppState,
    local: bool,
    now: DateTime<Utc>,
) -> Vec<SyncFact> {
    let mut facts = vec![SyncFact::MessageReceived {
        message_id: payload.message_id.clone(),
        app_state,
        local,
        at: now,
    }];

    if app_state != AppState::Foreground {
        facts.push(SyncFact::MessageOpened {
            message_id: payload.message_id.clone(),
            at: now,
        });
    }

    facts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingDelegate, RecordingPresenter};

    fn payload() -> NotificationPayload {
        NotificationPayload {
            message_id: Some("m-1".into()),
            alert: Some("Hello".into()),
            open_direct: Some("app://promo".into()),
            url: Some("https://example.com".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_delegate_gets_open_direct_in_background() {
        let router = NotificationRouter::new(false);
        let delegate = RecordingDelegate::new(false);
        router.set_delegate(Some(delegate.clone()));

        let decision = router.route(&payload(), AppState::Background);
        assert_eq!(decision, RouteDecision::DeliveredToDelegate);
        assert_eq!(*delegate.delivered.lock(), vec!["app://promo".to_string()]);
    }

    #[test]
    fn test_foreground_delivery_requires_opt_in() {
        let router = NotificationRouter::new(false);
        let delegate = RecordingDelegate::new(false);
        router.set_delegate(Some(delegate.clone()));

        assert_eq!(
            router.route(&payload(), AppState::Foreground),
            RouteDecision::NoAction
        );
        assert!(delegate.delivered.lock().is_empty());

        let eager = RecordingDelegate::new(true);
        router.set_delegate(Some(eager.clone()));
        assert_eq!(
            router.route(&payload(), AppState::Foreground),
            RouteDecision::DeliveredToDelegate
        );
    }

    #[test]
    fn test_foreground_alert_without_sound() {
        let router = NotificationRouter::new(true);
        let presenter = Arc::new(RecordingPresenter::default());
        router.set_presenter(Some(presenter.clone()));

        let decision = router.route(&payload(), AppState::Foreground);
        let expected = AlertRequest {
            message: "Hello".into(),
            play_sound: false,
        };
        assert_eq!(decision, RouteDecision::AlertRequested(expected.clone()));
        assert_eq!(*presenter.presented.lock(), vec![expected]);
    }

    #[test]
    fn test_silent_foreground_payload_requests_no_alert() {
        let router = NotificationRouter::new(true);
        let presenter = Arc::new(RecordingPresenter::default());
        router.set_presenter(Some(presenter.clone()));

        let mut silent = payload();
        silent.alert = None;

        assert_eq!(
            router.route(&silent, AppState::Foreground),
            RouteDecision::NoAction
        );
        assert!(presenter.presented.lock().is_empty());
    }

    #[test]
    fn test_url_opened_only_without_delegate() {
        let router = NotificationRouter::new(false);
        let mut no_od = payload();
        no_od.open_direct = None;

        assert_eq!(
            router.route(&no_od, AppState::LaunchedFromNotification),
            RouteDecision::OpenUrl("https://example.com".into())
        );

        router.set_delegate(Some(RecordingDelegate::new(false)));
        assert_eq!(
            router.route(&no_od, AppState::Background),
            RouteDecision::NoAction
        );
    }

    #[test]
    fn test_open_direct_suppresses_url() {
        let router = NotificationRouter::new(false);
        router.set_delegate(Some(RecordingDelegate::new(false)));
        assert_eq!(
            router.route(&payload(), AppState::Background),
            RouteDecision::DeliveredToDelegate
        );
    }

    #[test]
    fn test_facts_for_states() {
        let now = Utc::now();
        let facts = facts_for(&payload(), AppState::Foreground, false, now);
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].kind(), "message_received");

        let facts = facts_for(&payload(), AppState::LaunchedFromNotification, true, now);
        assert_eq!(facts.len(), 2);
        assert_eq!(facts[1].kind(), "message_opened");
    }
}
