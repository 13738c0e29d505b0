//! # Registration Engine
//!
//! Device token lifecycle.
//!
//! ```text
//! platform token ──► on_token_received ──► same token & enabled? ── yes ──► no-op
//!                                                  │ no
//!                                                  ▼
//!                                   store, push_enabled = true, dirty, sync
//!
//! platform error ──► on_registration_failed ──► store error, push_enabled = false
//!                                                  │ was enabled with a token?
//!                                                  ▼
//!                                   queue PushDisabled fact, sync
//! ```
//!
//! Registration itself is never retried here; the platform calls back again.

use chrono::Utc;
use tracing::{info, warn};

use herald_core::validation::validate_token;
use herald_core::{DeviceToken, SyncFact};

use crate::coordinator::{Effect, Persist, SyncCoordinator, SyncTrigger};
use crate::error::HeraldResult;

/// Handles token arrival and registration failure.
#[derive(Debug, Clone)]
pub struct RegistrationEngine {
    coordinator: SyncCoordinator,
}

impl RegistrationEngine {
    pub fn new(coordinator: SyncCoordinator) -> Self {
        RegistrationEngine { coordinator }
    }

    /// Stores a token issued by the platform.
    ///
    /// Returns false when the token was already current (nothing synced).
    pub async fn on_token_received(&self, token: DeviceToken) -> HeraldResult<bool> {
        validate_token(token.as_bytes())?;

        self.coordinator
            .apply(move |state| {
                if state.registration.is_current(&token) {
                    return Ok((false, Effect::none()));
                }

                info!(token = ?token, "Device token received");
                state.registration.apply_token(token, Utc::now());
                Ok((true, Effect::changed([Persist::Registration])))
            })
            .await
    }

    /// Records a platform registration failure.
    ///
    /// Only the loss of a working registration is reported to the server.
    pub async fn on_registration_failed(&self, error: impl Into<String>) -> HeraldResult<()> {
        let error = error.into();

        self.coordinator
            .apply(move |state| {
                warn!(error = %error, "Push registration failed");
                let was_enabled = state.registration.record_failure(error);
                if !was_enabled {
                    return Ok(((), Effect::persist([Persist::Registration])));
                }

                state.push_fact(SyncFact::PushDisabled { at: Utc::now() });
                Ok((
                    (),
                    Effect::persist([Persist::Registration, Persist::Facts])
                        .with_trigger(SyncTrigger::Mutation),
                ))
            })
            .await
    }

    pub async fn current_token(&self) -> Option<DeviceToken> {
        self.coordinator
            .read(|state| state.registration.token.clone())
            .await
    }

    pub async fn device_token_hex(&self) -> Option<String> {
        self.coordinator
            .read(|state| state.registration.token.as_ref().map(DeviceToken::to_hex))
            .await
    }

    pub async fn is_push_enabled(&self) -> bool {
        self.coordinator
            .read(|state| state.registration.push_enabled)
            .await
    }

    /// Last error reported by the platform, if any.
    pub async fn last_error(&self) -> Option<String> {
        self.coordinator
            .read(|state| state.registration.last_error.clone())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use herald_db::{MemoryStateStore, PersistedState, StateRepository};

    use crate::retry::RetryPolicy;
    use crate::state::EngineState;
    use crate::testing::{settle, CountingListener, ScriptedTransport};

    fn engine(transport: Arc<ScriptedTransport>) -> RegistrationEngine {
        let repo = StateRepository::new(Arc::new(MemoryStateStore::new()));
        let state = EngineState::from_persisted(
            PersistedState::default(),
            herald_core::DeviceInfo::new("dev"),
            "app",
            true,
        );
        RegistrationEngine::new(SyncCoordinator::new(
            state,
            repo,
            transport,
            RetryPolicy::default(),
            CountingListener::new(),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_token_is_idempotent() {
        let transport = ScriptedTransport::new();
        let engine = engine(transport.clone());
        let token = DeviceToken::from_bytes(vec![0xaa, 0xbb]);

        assert!(engine.on_token_received(token.clone()).await.unwrap());
        settle().await;
        assert!(!engine.on_token_received(token).await.unwrap());
        settle().await;

        assert_eq!(transport.sent_count(), 1);
        assert_eq!(engine.device_token_hex().await.as_deref(), Some("aabb"));
        assert!(engine.is_push_enabled().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_token_rejected() {
        let transport = ScriptedTransport::new();
        let engine = engine(transport.clone());

        let err = engine
            .on_token_received(DeviceToken::from_bytes(Vec::new()))
            .await
            .unwrap_err();
        assert!(err.is_validation_error());
        assert!(engine.current_token().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_without_token_is_only_recorded() {
        let transport = ScriptedTransport::new();
        let engine = engine(transport.clone());

        engine.on_registration_failed("no entitlement").await.unwrap();
        settle().await;

        assert_eq!(transport.sent_count(), 0);
        assert_eq!(engine.last_error().await.as_deref(), Some("no entitlement"));
        assert!(!engine.is_push_enabled().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_after_token_queues_one_push_disabled() {
        let transport = ScriptedTransport::new();
        let engine = engine(transport.clone());

        engine
            .on_token_received(DeviceToken::from_bytes(vec![1, 2, 3]))
            .await
            .unwrap();
        settle().await;

        engine.on_registration_failed("revoked").await.unwrap();
        engine.on_registration_failed("revoked").await.unwrap();
        settle().await;

        let sent = transport.sent();
        let disabled: usize = sent
            .iter()
            .flat_map(|s| s.facts.iter())
            .filter(|f| matches!(f, SyncFact::PushDisabled { .. }))
            .count();
        assert_eq!(disabled, 1);

        let last = transport.last_sent().unwrap();
        assert!(!last.push_enabled);
        assert_eq!(last.token.as_deref(), Some("010203"));
    }
}
