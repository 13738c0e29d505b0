//! # Push Manager
//!
//! The host application's single entry point.
//!
//! ## Assembly
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  PushManager::builder(config)                                           │
//! │      .with_store(..)          default: SQLite at config database path   │
//! │      .with_transport(..)      default: WsSyncTransport(sync.endpoint)   │
//! │      .with_listener(..)       default: NoOpListener                     │
//! │      .with_device_metadata(hardware_id, os_version)                     │
//! │      .build().await                                                     │
//! │                                                                         │
//! │  build():                                                              │
//! │    validate config → open store → rehydrate → device id                │
//! │    → coordinator → pending work from last run? trigger Lifecycle sync  │
//! │                                                                         │
//! │  ┌──────────────┐ ┌──────────────┐ ┌──────────────┐ ┌──────────────┐  │
//! │  │ Registration │ │  Identity    │ │   Router     │ │  Lifecycle   │  │
//! │  │ Engine       │ │  Store       │ │              │ │  (session)   │  │
//! │  └──────┬───────┘ └──────┬───────┘ └──────┬───────┘ └──────┬───────┘  │
//! │         └────────────────┴────────┬───────┴────────────────┘          │
//! │                                   ▼                                    │
//! │                          SyncCoordinator                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, info};

use herald_core::{
    AppState, AttributeMap, DeviceInfo, DeviceToken, LaunchOptions, NotificationPayload,
    Session, Snapshot, SyncFact, TagSet,
};
use herald_db::{Database, DbConfig, StateRepository, StateStore};

use crate::config::HeraldConfig;
use crate::coordinator::{
    Effect, NoOpListener, Persist, SyncCoordinator, SyncEventListener, SyncOutcome, SyncTrigger,
};
use crate::error::HeraldResult;
use crate::identity::IdentityStore;
use crate::registration::RegistrationEngine;
use crate::retry::RetryPolicy;
use crate::router::{facts_for, AlertPresenter, NotificationRouter, PayloadDelegate, RouteDecision};
use crate::state::{EngineState, SyncStatus};
use crate::transport::{SyncTransport, TransportConfig, WsSyncTransport};

// =============================================================================
// Push Manager
// =============================================================================

struct ManagerInner {
    config: RwLock<HeraldConfig>,
    coordinator: SyncCoordinator,
    registration: RegistrationEngine,
    identity: IdentityStore,
    router: NotificationRouter,
    device_id: String,
    database: Option<Database>,
}

/// Handle to the push engine. Cheap to clone.
#[derive(Clone)]
pub struct PushManager {
    inner: Arc<ManagerInner>,
}

impl PushManager {
    /// Starts building a manager for the given configuration.
    pub fn builder(config: HeraldConfig) -> PushManagerBuilder {
        PushManagerBuilder::new(config)
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Hands over a token issued by the platform.
    ///
    /// Returns false if the token was already current.
    pub async fn register_token(&self, token: DeviceToken) -> HeraldResult<bool> {
        self.inner.registration.on_token_received(token).await
    }

    /// Reports that the platform could not register for push.
    pub async fn registration_failed(&self, error: impl Into<String>) -> HeraldResult<()> {
        self.inner.registration.on_registration_failed(error).await
    }

    /// Current token as lowercase hex.
    pub async fn device_token(&self) -> Option<String> {
        self.inner.registration.device_token_hex().await
    }

    pub async fn is_push_enabled(&self) -> bool {
        self.inner.registration.is_push_enabled().await
    }

    // =========================================================================
    // Identity & Attribution
    // =========================================================================

    pub async fn set_subscriber_key(&self, key: &str) -> HeraldResult<()> {
        self.inner.identity.set_subscriber_key(key).await
    }

    pub async fn subscriber_key(&self) -> Option<String> {
        self.inner.identity.subscriber_key().await
    }

    pub async fn add_tag(&self, tag: &str) -> HeraldResult<bool> {
        self.inner.identity.add_tag(tag).await
    }

    pub async fn remove_tag(&self, tag: &str) -> HeraldResult<Option<String>> {
        self.inner.identity.remove_tag(tag).await
    }

    pub async fn all_tags(&self) -> TagSet {
        self.inner.identity.all_tags().await
    }

    pub async fn add_attribute(&self, name: &str, value: &str) -> HeraldResult<()> {
        self.inner.identity.add_attribute(name, value).await
    }

    pub async fn remove_attribute(&self, name: &str) -> HeraldResult<Option<String>> {
        self.inner.identity.remove_attribute(name).await
    }

    pub async fn all_attributes(&self) -> AttributeMap {
        self.inner.identity.all_attributes().await
    }

    /// Tells the server the badge was cleared.
    pub async fn reset_badge_count(&self) -> HeraldResult<()> {
        self.inner
            .coordinator
            .apply(|state| {
                state.push_fact(SyncFact::BadgeReset { at: Utc::now() });
                Ok((
                    (),
                    Effect::persist([Persist::Facts]).with_trigger(SyncTrigger::Mutation),
                ))
            })
            .await
    }

    // =========================================================================
    // Sync
    // =========================================================================

    /// Syncs now, cancelling any pending retry and lifting a suspension.
    pub async fn request_sync(&self) -> SyncOutcome {
        self.inner.coordinator.request_sync(SyncTrigger::Manual).await
    }

    pub async fn status(&self) -> SyncStatus {
        self.inner.coordinator.status().await
    }

    /// What the server last acknowledged. Survives restarts.
    pub async fn last_synced_snapshot(&self) -> HeraldResult<Option<Snapshot>> {
        self.inner.coordinator.last_synced_snapshot().await
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.inner.coordinator.subscribe()
    }

    /// Stable per-install identifier.
    pub fn device_id(&self) -> &str {
        &self.inner.device_id
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    pub fn set_alert_on_foreground_push(&self, show: bool) {
        self.inner.router.set_show_alert_while_running(show);
        self.inner.config.write().notifications.show_alert_while_running = show;
    }

    pub fn set_payload_delegate(&self, delegate: Option<Arc<dyn PayloadDelegate>>) {
        self.inner.router.set_delegate(delegate);
    }

    pub fn set_alert_presenter(&self, presenter: Option<Arc<dyn AlertPresenter>>) {
        self.inner.router.set_presenter(presenter);
    }

    /// Routes a remote notification and records it for the next sync.
    pub async fn handle_notification(
        &self,
        payload: &NotificationPayload,
        app_state: AppState,
    ) -> HeraldResult<RouteDecision> {
        self.process_notification(payload, app_state, false).await
    }

    /// Decodes and routes a raw remote notification dictionary.
    pub async fn handle_notification_json(
        &self,
        payload: &serde_json::Value,
        app_state: AppState,
    ) -> HeraldResult<RouteDecision> {
        let payload = NotificationPayload::from_json(payload)?;
        self.process_notification(&payload, app_state, false).await
    }

    /// Routes a local notification and records it for the next sync.
    pub async fn handle_local_notification(
        &self,
        payload: &NotificationPayload,
        app_state: AppState,
    ) -> HeraldResult<RouteDecision> {
        self.process_notification(payload, app_state, true).await
    }

    async fn process_notification(
        &self,
        payload: &NotificationPayload,
        app_state: AppState,
        local: bool,
    ) -> HeraldResult<RouteDecision> {
        let now = Utc::now();
        let facts = facts_for(payload, app_state, local, now);
        let message_id = payload.message_id.clone();

        self.inner
            .coordinator
            .apply(move |state| {
                // Every processed notification starts a fresh session
                let mut session = Session::start(now);
                session.current_message_id = message_id;
                state.session = Some(session);

                let mut queued = 0;
                for fact in facts {
                    if state.push_fact(fact) {
                        queued += 1;
                    }
                }

                if queued == 0 {
                    return Ok(((), Effect::none()));
                }
                Ok((
                    (),
                    Effect::persist([Persist::Facts]).with_trigger(SyncTrigger::Lifecycle),
                ))
            })
            .await?;

        let decision = self.inner.router.route(payload, app_state);
        debug!(%app_state, local, ?decision, "Notification routed");
        Ok(decision)
    }

    /// Message that opened the current session, if any.
    pub async fn current_message_id(&self) -> Option<String> {
        self.inner
            .coordinator
            .read(|state| state.session.as_ref().and_then(|s| s.current_message_id.clone()))
            .await
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// App finished launching. Starts a session and routes a launch
    /// notification, if any.
    pub async fn application_launched(
        &self,
        options: LaunchOptions,
    ) -> HeraldResult<Option<RouteDecision>> {
        let now = Utc::now();
        self.inner
            .coordinator
            .apply(move |state| {
                state.session = Some(Session::start(now));
                Ok(((), Effect::none()))
            })
            .await?;

        let decision = match options.notification {
            Some(ref payload) => Some(
                self.process_notification(payload, AppState::LaunchedFromNotification, false)
                    .await?,
            ),
            None => None,
        };

        self.inner.coordinator.trigger(SyncTrigger::Lifecycle);
        Ok(decision)
    }

    /// App came to the foreground.
    pub async fn application_became_active(&self) -> HeraldResult<()> {
        let now = Utc::now();
        self.inner
            .coordinator
            .apply(move |state| {
                if state.session.is_none() {
                    state.session = Some(Session::start(now));
                }
                Ok(((), Effect::none()))
            })
            .await?;

        self.inner.coordinator.trigger(SyncTrigger::Lifecycle);
        Ok(())
    }

    /// App went to the background. Ends the session.
    pub async fn application_entered_background(&self) -> HeraldResult<()> {
        self.end_session(Some(SyncTrigger::Lifecycle)).await
    }

    /// App is about to exit. Ends the session, stops the retry timer and
    /// flushes state.
    pub async fn application_terminated(&self) -> HeraldResult<()> {
        self.end_session(None).await?;
        self.inner.coordinator.cancel_retry().await;
        self.inner.coordinator.flush().await
    }

    async fn end_session(&self, trigger: Option<SyncTrigger>) -> HeraldResult<()> {
        let now = Utc::now();
        self.inner
            .coordinator
            .apply(move |state| {
                let Some(session) = state.session.take() else {
                    return Ok(((), Effect::none()));
                };

                let fact = SyncFact::SessionEnded {
                    started_at: session.started_at,
                    duration_secs: session.duration_secs(now),
                };
                if !state.push_fact(fact) {
                    return Ok(((), Effect::none()));
                }

                let mut effect = Effect::persist([Persist::Facts]);
                effect.trigger = trigger;
                Ok(((), effect))
            })
            .await
    }

    // =========================================================================
    // Configuration & Shutdown
    // =========================================================================

    /// Swaps credentials and settings, lifts a suspension and syncs.
    pub async fn reconfigure(&self, config: HeraldConfig) -> HeraldResult<()> {
        config.validate()?;

        let app_id = config.app.app_id.clone();
        let analytics = config.app.analytics;
        self.inner
            .coordinator
            .apply(move |state| {
                state.analytics = analytics;
                if state.app_id == app_id {
                    return Ok(((), Effect::none()));
                }
                info!(from = %state.app_id, to = %app_id, "Application id changed");
                state.app_id = app_id;
                Ok((
                    (),
                    Effect {
                        persist: Vec::new(),
                        dirty: true,
                        trigger: None,
                    },
                ))
            })
            .await?;

        self.inner
            .router
            .set_show_alert_while_running(config.notifications.show_alert_while_running);
        self.inner
            .coordinator
            .set_retry_policy(RetryPolicy::from_settings(&config.sync));
        self.inner.coordinator.transport().reconfigure(&config);
        *self.inner.config.write() = config;

        self.inner.coordinator.resume().await;
        self.inner.coordinator.trigger(SyncTrigger::Manual);
        Ok(())
    }

    /// Copy of the active configuration.
    pub fn config(&self) -> HeraldConfig {
        self.inner.config.read().clone()
    }

    /// Stops syncing, flushes state and closes the database.
    pub async fn shutdown(&self) -> HeraldResult<()> {
        let result = self.inner.coordinator.shutdown().await;
        if let Some(ref db) = self.inner.database {
            db.close().await;
        }
        info!("Push manager shut down");
        result
    }
}

impl std::fmt::Debug for PushManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushManager")
            .field("device_id", &self.inner.device_id)
            .field("coordinator", &self.inner.coordinator)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`PushManager`].
pub struct PushManagerBuilder {
    config: HeraldConfig,
    store: Option<Arc<dyn StateStore>>,
    transport: Option<Arc<dyn SyncTransport>>,
    listener: Option<Arc<dyn SyncEventListener>>,
    presenter: Option<Arc<dyn AlertPresenter>>,
    delegate: Option<Arc<dyn PayloadDelegate>>,
    hardware_id: Option<String>,
    os_version: Option<String>,
}

impl PushManagerBuilder {
    pub fn new(config: HeraldConfig) -> Self {
        PushManagerBuilder {
            config,
            store: None,
            transport: None,
            listener: None,
            presenter: None,
            delegate: None,
            hardware_id: None,
            os_version: None,
        }
    }

    /// Uses the given store instead of the SQLite database.
    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Uses the given transport instead of the WebSocket transport.
    pub fn with_transport(mut self, transport: Arc<dyn SyncTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn SyncEventListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn with_alert_presenter(mut self, presenter: Arc<dyn AlertPresenter>) -> Self {
        self.presenter = Some(presenter);
        self
    }

    pub fn with_payload_delegate(mut self, delegate: Arc<dyn PayloadDelegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    /// Hardware model and OS version reported in every snapshot.
    pub fn with_device_metadata(
        mut self,
        hardware_id: impl Into<String>,
        os_version: impl Into<String>,
    ) -> Self {
        self.hardware_id = Some(hardware_id.into());
        self.os_version = Some(os_version.into());
        self
    }

    /// Opens the store, rehydrates state and starts the engine.
    pub async fn build(self) -> HeraldResult<PushManager> {
        let config = self.config;
        config.validate()?;

        let transport: Arc<dyn SyncTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(WsSyncTransport::new(TransportConfig::from_config(&config)?)),
        };

        let (store, database): (Arc<dyn StateStore>, Option<Database>) = match self.store {
            Some(store) => (store, None),
            None => {
                let path = config.database_path()?;
                let db = Database::new(DbConfig::new(path)).await?;
                let store: Arc<dyn StateStore> = Arc::new(db.state_store());
                (store, Some(db))
            }
        };

        let repo = StateRepository::new(store);
        let persisted = repo.load().await?;
        let device_id = repo.device_id().await?;

        let mut device = DeviceInfo::new(device_id.clone());
        if let Some(hardware_id) = self.hardware_id {
            device.hardware_id = hardware_id;
        }
        if let Some(os_version) = self.os_version {
            device.os_version = os_version;
        }

        let state = EngineState::from_persisted(
            persisted,
            device,
            config.app.app_id.clone(),
            config.app.analytics,
        );
        let needs_sync = state.has_work();

        let listener = self.listener.unwrap_or_else(|| Arc::new(NoOpListener));
        let coordinator = SyncCoordinator::new(
            state,
            repo,
            transport,
            RetryPolicy::from_settings(&config.sync),
            listener,
        );

        let router = NotificationRouter::new(config.notifications.show_alert_while_running);
        router.set_presenter(self.presenter);
        router.set_delegate(self.delegate);

        info!(
            app_id = %config.app.app_id,
            device_id = %device_id,
            pending_sync = needs_sync,
            "Push manager ready"
        );

        if needs_sync {
            coordinator.trigger(SyncTrigger::Lifecycle);
        }

        Ok(PushManager {
            inner: Arc::new(ManagerInner {
                config: RwLock::new(config),
                registration: RegistrationEngine::new(coordinator.clone()),
                identity: IdentityStore::new(coordinator.clone()),
                coordinator,
                router,
                device_id,
                database,
            }),
        })
    }
}

impl From<HeraldConfig> for PushManagerBuilder {
    fn from(config: HeraldConfig) -> Self {
        PushManagerBuilder::new(config)
    }
}
