//! # Sync Coordinator
//!
//! Owns the engine state lock and guarantees that at most one sync is in
//! flight at any time.
//!
//! ## Request Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                   request_sync(trigger)                                 │
//! │                                                                         │
//! │  ┌─────────── lock ───────────┐                                        │
//! │  │ in_flight?   → resync_needed = true, return Coalesced              │
//! │  │ suspended?   → Retry/Lifecycle ignored                             │
//! │  │ retry armed? → Mutation/Lifecycle deferred to the timer            │
//! │  │ no work?     → NothingToSync                                       │
//! │  │ in_flight = true, compose snapshot, dirty = false                  │
//! │  └────────────────────────────┘                                        │
//! │                │                                                        │
//! │                ▼  transport.send(snapshot)   (lock released)           │
//! │                │                                                        │
//! │  ┌─────────── lock ───────────┐                                        │
//! │  │ Ok         → last_success, retry_count = 0, drop sent facts        │
//! │  │              resync_needed or new work? loop as FollowUp           │
//! │  │ Retryable  → dirty, retry_count += 1, arm RetryScheduler           │
//! │  │ Permanent  → dirty, suspended, fatal error surfaced once           │
//! │  │              (changes made during the send get one retry first)    │
//! │  └────────────────────────────┘                                        │
//! │                                                                         │
//! │  Triggers: Mutation | Manual | Retry | Lifecycle | FollowUp            │
//! │  Manual cancels a pending retry and sends now. Mutation and Manual    │
//! │  clear a suspension.                                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Mutations
//! Every state change goes through [`SyncCoordinator::apply`]: the closure
//! validates and mutates under the lock, the returned [`Effect`] says what to
//! persist and whether to sync. The sync itself is spawned, so callers never
//! wait on the network.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use herald_core::Snapshot;
use herald_db::{DbResult, StateRepository};

use crate::error::{HeraldError, HeraldResult};
use crate::retry::{RetryFuture, RetryPolicy, RetryScheduler};
use crate::state::{EngineState, SyncStatus};
use crate::transport::{Ack, SyncTransport, TransportError};

// =============================================================================
// Triggers & Outcomes
// =============================================================================

/// Why a sync was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// Local state changed.
    Mutation,
    /// The host asked explicitly.
    Manual,
    /// The retry timer fired.
    Retry,
    /// App launch or foreground.
    Lifecycle,
    /// Work arrived while the previous sync was in flight.
    FollowUp,
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncTrigger::Mutation => write!(f, "mutation"),
            SyncTrigger::Manual => write!(f, "manual"),
            SyncTrigger::Retry => write!(f, "retry"),
            SyncTrigger::Lifecycle => write!(f, "lifecycle"),
            SyncTrigger::FollowUp => write!(f, "follow_up"),
        }
    }
}

/// What a call to [`SyncCoordinator::request_sync`] ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The server acknowledged the current state.
    Synced,
    /// Nothing dirty and no facts pending.
    NothingToSync,
    /// Another sync was in flight; it will follow up.
    Coalesced,
    /// A retry timer is armed and will carry the change.
    Deferred,
    /// Stopped by an earlier permanent failure.
    Suspended,
    /// Failed, retry scheduled.
    RetryScheduled,
    /// Failed permanently.
    Fatal,
    /// The engine was shut down.
    ShutDown,
}

// =============================================================================
// Event Listener
// =============================================================================

/// Host callbacks for sync status and failures.
pub trait SyncEventListener: Send + Sync {
    /// Called after every status transition.
    fn on_status(&self, _status: &SyncStatus) {}

    /// Called when a sync attempt fails.
    fn on_sync_error(&self, _message: &str, _retryable: bool) {}

    /// Called once per distinct permanent failure (bad credentials, bad
    /// endpoint). Automatic syncing stops until the host acts.
    fn on_fatal_error(&self, _message: &str) {}
}

/// Listener that ignores everything.
pub struct NoOpListener;

impl SyncEventListener for NoOpListener {}

// =============================================================================
// Effects
// =============================================================================

/// A persisted slice of engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persist {
    Registration,
    SubscriberKey,
    Tags,
    Attributes,
    Facts,
}

/// What a mutation asks the coordinator to do after it ran.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Effect {
    pub persist: Vec<Persist>,
    pub dirty: bool,
    pub trigger: Option<SyncTrigger>,
}

impl Effect {
    /// Nothing changed.
    pub fn none() -> Self {
        Effect::default()
    }

    /// State changed: persist, mark dirty, sync.
    pub fn changed(persist: impl Into<Vec<Persist>>) -> Self {
        Effect {
            persist: persist.into(),
            dirty: true,
            trigger: Some(SyncTrigger::Mutation),
        }
    }

    /// Persist without marking dirty or syncing.
    pub fn persist(persist: impl Into<Vec<Persist>>) -> Self {
        Effect {
            persist: persist.into(),
            dirty: false,
            trigger: None,
        }
    }

    pub fn with_trigger(mut self, trigger: SyncTrigger) -> Self {
        self.trigger = Some(trigger);
        self
    }

    fn is_empty(&self) -> bool {
        self.persist.is_empty() && !self.dirty && self.trigger.is_none()
    }
}

// =============================================================================
// Coordinator
// =============================================================================

struct Shared {
    state: Mutex<EngineState>,
    repo: StateRepository,
    transport: Arc<dyn SyncTransport>,
    retry: RetryScheduler,
    listener: Arc<dyn SyncEventListener>,
    status_tx: watch::Sender<SyncStatus>,
}

/// Single owner of engine state and the sync pipeline. Cheap to clone.
#[derive(Clone)]
pub struct SyncCoordinator {
    shared: Arc<Shared>,
}

enum Completion {
    Done(SyncOutcome),
    Again,
}

impl SyncCoordinator {
    pub fn new(
        state: EngineState,
        repo: StateRepository,
        transport: Arc<dyn SyncTransport>,
        policy: RetryPolicy,
        listener: Arc<dyn SyncEventListener>,
    ) -> Self {
        let (status_tx, _) = watch::channel(state.status(false));

        SyncCoordinator {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                repo,
                transport,
                retry: RetryScheduler::new(policy),
                listener,
                status_tx,
            }),
        }
    }

    // =========================================================================
    // Sync Pipeline
    // =========================================================================

    /// Runs one sync request to completion.
    pub async fn request_sync(&self, trigger: SyncTrigger) -> SyncOutcome {
        let mut trigger = trigger;

        loop {
            let snapshot = match self.begin(trigger).await {
                Ok(snapshot) => snapshot,
                // A follow-up with nothing left means the earlier send covered it
                Err(_) if trigger == SyncTrigger::FollowUp => return SyncOutcome::Synced,
                Err(outcome) => {
                    debug!(%trigger, ?outcome, "Sync not started");
                    return outcome;
                }
            };

            debug!(
                %trigger,
                facts = snapshot.facts.len(),
                tags = snapshot.tags.len(),
                attributes = snapshot.attributes.len(),
                "Sync started"
            );

            let result = self.shared.transport.send(&snapshot).await;

            match self.complete(snapshot, result).await {
                Completion::Done(outcome) => return outcome,
                Completion::Again => trigger = SyncTrigger::FollowUp,
            }
        }
    }

    /// Requests a sync without waiting for it.
    pub fn trigger(&self, trigger: SyncTrigger) {
        let this = self.clone();
        tokio::spawn(async move {
            let outcome = this.request_sync(trigger).await;
            debug!(%trigger, ?outcome, "Sync request finished");
        });
    }

    fn retry_task(&self) -> RetryFuture {
        let this = self.clone();
        Box::pin(async move {
            this.request_sync(SyncTrigger::Retry).await;
        })
    }

    async fn begin(&self, trigger: SyncTrigger) -> Result<Snapshot, SyncOutcome> {
        let shared = &self.shared;
        let mut state = shared.state.lock().await;

        if state.shut_down {
            return Err(SyncOutcome::ShutDown);
        }

        let clears_suspension = matches!(trigger, SyncTrigger::Mutation | SyncTrigger::Manual);

        if state.sync.in_flight {
            state.resync_needed = true;
            if clears_suspension {
                state.resume_requested = true;
            }
            return Err(SyncOutcome::Coalesced);
        }

        match trigger {
            SyncTrigger::Manual => {
                state.suspended = false;
                shared.retry.cancel();
            }
            SyncTrigger::Mutation => {
                state.suspended = false;
                if shared.retry.pending() {
                    self.publish(&state);
                    return Err(SyncOutcome::Deferred);
                }
            }
            SyncTrigger::Lifecycle => {
                if state.suspended {
                    return Err(SyncOutcome::Suspended);
                }
                if shared.retry.pending() {
                    return Err(SyncOutcome::Deferred);
                }
            }
            SyncTrigger::Retry | SyncTrigger::FollowUp => {
                if state.suspended {
                    return Err(SyncOutcome::Suspended);
                }
            }
        }

        if !state.has_work() {
            return Err(SyncOutcome::NothingToSync);
        }

        let now = Utc::now();
        state.sync.in_flight = true;
        state.sync.last_attempt = Some(now);
        state.sync.dirty = false;
        state.resync_needed = false;
        state.resume_requested = false;
        state.in_flight_facts = state.facts.len();

        let snapshot = state.compose_snapshot(now);
        let status = self.publish(&state);
        drop(state);

        shared.listener.on_status(&status);
        Ok(snapshot)
    }

    async fn complete(&self, snapshot: Snapshot, result: Result<Ack, TransportError>) -> Completion {
        let shared = &self.shared;
        let mut state = shared.state.lock().await;
        state.sync.in_flight = false;
        let resync = std::mem::take(&mut state.resync_needed);
        let resume = std::mem::take(&mut state.resume_requested);

        match result {
            Ok(ack) => {
                let now = Utc::now();
                state.sync.last_success = Some(now);
                state.sync.retry_count = 0;
                state.last_error = None;
                state.last_fatal = None;
                shared.retry.reset();

                let acknowledged = state.drain_sent_facts();
                info!(
                    sequence = ack.sequence,
                    facts = acknowledged,
                    server_time = ?ack.server_time,
                    "Sync acknowledged"
                );

                if let Err(e) = self.record_success(&state, &snapshot).await {
                    warn!(error = %e, "Failed to persist sync result");
                    state.flush_pending = true;
                }

                let again = !state.shut_down && (resync || state.has_work());
                let status = self.publish(&state);
                drop(state);

                shared.listener.on_status(&status);
                if again {
                    Completion::Again
                } else {
                    Completion::Done(SyncOutcome::Synced)
                }
            }

            Err(TransportError::Retryable(message)) => {
                state.sync.dirty = true;
                state.in_flight_facts = 0;
                state.sync.retry_count = state.sync.retry_count.saturating_add(1);
                state.last_error = Some(message.clone());
                let attempt = state.sync.retry_count;

                let outcome = if state.shut_down {
                    SyncOutcome::ShutDown
                } else {
                    let delay = shared.retry.schedule(attempt, self.retry_task());
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "Sync failed, retry scheduled"
                    );
                    SyncOutcome::RetryScheduled
                };

                let status = self.publish(&state);
                drop(state);

                shared.listener.on_status(&status);
                shared.listener.on_sync_error(&message, true);
                Completion::Done(outcome)
            }

            Err(TransportError::Permanent(message)) => {
                state.sync.dirty = true;
                state.in_flight_facts = 0;
                state.last_error = Some(message.clone());

                let first = state.last_fatal.as_deref() != Some(message.as_str());
                state.last_fatal = Some(message.clone());

                if resume && !state.shut_down {
                    // The host changed state during the send; give that change one attempt
                    state.sync.retry_count = state.sync.retry_count.saturating_add(1);
                    let attempt = state.sync.retry_count;
                    let delay = shared.retry.schedule(attempt, self.retry_task());
                    error!(
                        error = %message,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Sync rejected permanently, retrying once for changes made during the send"
                    );
                } else {
                    state.suspended = true;
                    shared.retry.cancel();
                    error!(error = %message, "Sync rejected permanently, automatic sync suspended");
                }

                let status = self.publish(&state);
                drop(state);

                shared.listener.on_status(&status);
                shared.listener.on_sync_error(&message, false);
                if first {
                    shared.listener.on_fatal_error(&message);
                }
                Completion::Done(SyncOutcome::Fatal)
            }
        }
    }

    async fn record_success(&self, state: &EngineState, snapshot: &Snapshot) -> DbResult<()> {
        let repo = &self.shared.repo;
        repo.save_last_snapshot(snapshot).await?;
        if let Some(at) = state.sync.last_success {
            repo.save_last_sync(at).await?;
        }
        repo.save_facts(&state.facts).await?;
        if !state.sync.dirty {
            repo.save_pending_sync(false).await?;
        }
        Ok(())
    }

    // =========================================================================
    // State Access
    // =========================================================================

    /// Runs a mutation under the lock, persists it, then triggers a sync if
    /// the effect asks for one.
    ///
    /// If persisting fails the in-memory change is kept, the error is
    /// returned, and the next write flushes everything.
    pub async fn apply<R>(
        &self,
        f: impl FnOnce(&mut EngineState) -> HeraldResult<(R, Effect)>,
    ) -> HeraldResult<R> {
        let mut state = self.shared.state.lock().await;
        if state.shut_down {
            return Err(HeraldError::ShuttingDown);
        }

        let (value, effect) = f(&mut *state)?;
        if effect.is_empty() {
            return Ok(value);
        }

        if effect.dirty {
            state.sync.dirty = true;
        }
        let persisted = self.persist(&mut state, &effect).await;
        let status = self.publish(&state);
        drop(state);

        self.shared.listener.on_status(&status);
        if let Some(trigger) = effect.trigger {
            self.trigger(trigger);
        }

        persisted.map(|_| value)
    }

    /// Reads engine state under the lock.
    pub async fn read<R>(&self, f: impl FnOnce(&EngineState) -> R) -> R {
        let state = self.shared.state.lock().await;
        f(&*state)
    }

    async fn persist(&self, state: &mut EngineState, effect: &Effect) -> HeraldResult<()> {
        let result = if state.flush_pending {
            self.flush_all(state).await
        } else {
            self.write_targets(state, effect).await
        };

        match result {
            Ok(()) => {
                state.flush_pending = false;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Persisting state failed, full flush on next write");
                state.flush_pending = true;
                Err(e.into())
            }
        }
    }

    async fn write_targets(&self, state: &EngineState, effect: &Effect) -> DbResult<()> {
        if effect.dirty {
            self.shared.repo.save_pending_sync(true).await?;
        }
        for target in &effect.persist {
            self.write_target(state, *target).await?;
        }
        Ok(())
    }

    async fn write_target(&self, state: &EngineState, target: Persist) -> DbResult<()> {
        let repo = &self.shared.repo;
        match target {
            Persist::Registration => repo.save_registration(&state.registration).await,
            Persist::SubscriberKey => {
                repo.save_subscriber_key(state.identity.subscriber_key.as_deref())
                    .await
            }
            Persist::Tags => repo.save_tags(&state.tags).await,
            Persist::Attributes => repo.save_attributes(&state.attributes).await,
            Persist::Facts => repo.save_facts(&state.facts).await,
        }
    }

    async fn flush_all(&self, state: &EngineState) -> DbResult<()> {
        for target in [
            Persist::Registration,
            Persist::SubscriberKey,
            Persist::Tags,
            Persist::Attributes,
            Persist::Facts,
        ] {
            self.write_target(state, target).await?;
        }

        let repo = &self.shared.repo;
        repo.save_pending_sync(state.sync.dirty || state.sync.in_flight)
            .await?;
        if let Some(at) = state.sync.last_success {
            repo.save_last_sync(at).await?;
        }
        debug!("Flushed full engine state");
        Ok(())
    }

    /// Writes every piece of state to the store.
    pub async fn flush(&self) -> HeraldResult<()> {
        let mut state = self.shared.state.lock().await;
        match self.flush_all(&state).await {
            Ok(()) => {
                state.flush_pending = false;
                Ok(())
            }
            Err(e) => {
                state.flush_pending = true;
                Err(e.into())
            }
        }
    }

    // =========================================================================
    // Status & Control
    // =========================================================================

    fn publish(&self, state: &EngineState) -> SyncStatus {
        let status = state.status(self.shared.retry.pending());
        self.shared.status_tx.send_replace(status.clone());
        status
    }

    /// Current status.
    pub async fn status(&self) -> SyncStatus {
        let state = self.shared.state.lock().await;
        state.status(self.shared.retry.pending())
    }

    /// Last snapshot the server acknowledged, as persisted.
    pub async fn last_synced_snapshot(&self) -> HeraldResult<Option<Snapshot>> {
        Ok(self.shared.repo.last_snapshot().await?)
    }

    /// Receiver that sees every status transition.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Lifts a suspension and forgets the last fatal error.
    pub async fn resume(&self) {
        let mut state = self.shared.state.lock().await;
        if state.suspended {
            info!("Resuming suspended sync");
        }
        state.suspended = false;
        state.last_fatal = None;
        self.publish(&state);
    }

    /// Replaces the backoff parameters.
    pub fn set_retry_policy(&self, policy: RetryPolicy) {
        self.shared.retry.set_policy(policy);
    }

    /// Aborts the pending retry timer.
    pub async fn cancel_retry(&self) -> bool {
        let state = self.shared.state.lock().await;
        let cancelled = self.shared.retry.cancel();
        self.publish(&state);
        cancelled
    }

    pub fn transport(&self) -> &Arc<dyn SyncTransport> {
        &self.shared.transport
    }

    /// Stops all syncing and flushes state. Later mutations fail with
    /// [`HeraldError::ShuttingDown`].
    pub async fn shutdown(&self) -> HeraldResult<()> {
        let mut state = self.shared.state.lock().await;
        if state.shut_down {
            return Ok(());
        }

        state.shut_down = true;
        self.shared.retry.cancel();

        let flushed = self.flush_all(&state).await;
        self.publish(&state);
        info!(pending = state.has_work(), "Sync coordinator shut down");

        flushed.map_err(HeraldError::from)
    }
}

impl fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("retry", &self.shared.retry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use herald_core::{DeviceInfo, SyncFact};
    use herald_db::{MemoryStateStore, PersistedState, StateStore};

    use crate::testing::{settle, CountingListener, ScriptedTransport};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(8),
            multiplier: 2.0,
            randomization_factor: 0.0,
        }
    }

    fn coordinator(
        transport: Arc<ScriptedTransport>,
        listener: Arc<CountingListener>,
    ) -> (MemoryStateStore, SyncCoordinator) {
        let store = MemoryStateStore::new();
        let repo = StateRepository::new(Arc::new(store.clone()));
        let state = EngineState::from_persisted(
            PersistedState::default(),
            DeviceInfo::new("dev-1"),
            "app-1",
            true,
        );
        let coordinator = SyncCoordinator::new(state, repo, transport, policy(), listener);
        (store, coordinator)
    }

    /// Adds a tag without triggering a sync.
    async fn dirty(coordinator: &SyncCoordinator, tag: &str) {
        let tag = tag.to_string();
        coordinator
            .apply(move |state| {
                state.tags.insert(tag);
                Ok((
                    (),
                    Effect {
                        persist: vec![Persist::Tags],
                        dirty: true,
                        trigger: None,
                    },
                ))
            })
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_to_sync_when_clean() {
        let transport = ScriptedTransport::new();
        let (_, coordinator) = coordinator(transport.clone(), CountingListener::new());

        let outcome = coordinator.request_sync(SyncTrigger::Manual).await;
        assert_eq!(outcome, SyncOutcome::NothingToSync);
        assert_eq!(transport.sent_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_clears_dirty_and_persisted_flag() {
        let transport = ScriptedTransport::new();
        let (store, coordinator) = coordinator(transport.clone(), CountingListener::new());

        dirty(&coordinator, "vip").await;
        assert_eq!(
            store.get(herald_db::store::keys::PENDING_SYNC).await.unwrap().as_deref(),
            Some("true")
        );

        let outcome = coordinator.request_sync(SyncTrigger::Manual).await;
        assert_eq!(outcome, SyncOutcome::Synced);

        let status = coordinator.status().await;
        assert!(!status.dirty);
        assert!(status.last_success.is_some());
        assert_eq!(
            store.get(herald_db::store::keys::PENDING_SYNC).await.unwrap().as_deref(),
            Some("false")
        );
        assert!(store
            .get(herald_db::store::keys::LAST_SNAPSHOT)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_at_most_one_send_in_flight() {
        let transport = ScriptedTransport::gated();
        let (_, coordinator) = coordinator(transport.clone(), CountingListener::new());
        dirty(&coordinator, "a").await;

        let mut handles = Vec::new();
        for _ in 0..5 {
            let c = coordinator.clone();
            handles.push(tokio::spawn(async move { c.request_sync(SyncTrigger::Manual).await }));
        }
        settle().await;
        assert_eq!(transport.sent_count(), 1);

        transport.open_gate();
        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap());
        }

        assert_eq!(transport.max_concurrent(), 1);
        assert_eq!(transport.sent_count(), 1);
        assert_eq!(
            outcomes.iter().filter(|o| **o == SyncOutcome::Synced).count(),
            1
        );
        assert_eq!(
            outcomes.iter().filter(|o| **o == SyncOutcome::Coalesced).count(),
            4
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_change_during_flight_is_followed_up() {
        let transport = ScriptedTransport::gated();
        let (_, coordinator) = coordinator(transport.clone(), CountingListener::new());
        dirty(&coordinator, "first").await;

        let c = coordinator.clone();
        let first = tokio::spawn(async move { c.request_sync(SyncTrigger::Manual).await });
        settle().await;

        dirty(&coordinator, "second").await;
        assert_eq!(
            coordinator.request_sync(SyncTrigger::Mutation).await,
            SyncOutcome::Coalesced
        );

        transport.open_gate();
        assert_eq!(first.await.unwrap(), SyncOutcome::Synced);

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert!(!sent[0].tags.contains("second"));
        assert!(sent[1].tags.contains("first") && sent[1].tags.contains("second"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_change_during_rejected_send_is_retried() {
        let transport = ScriptedTransport::gated();
        transport.push_result(Err(TransportError::Permanent("UNAUTHORIZED: bad token".into())));
        let listener = CountingListener::new();
        let (_, coordinator) = coordinator(transport.clone(), listener.clone());
        dirty(&coordinator, "a").await;

        let c = coordinator.clone();
        let first = tokio::spawn(async move { c.request_sync(SyncTrigger::Manual).await });
        settle().await;

        dirty(&coordinator, "b").await;
        assert_eq!(
            coordinator.request_sync(SyncTrigger::Mutation).await,
            SyncOutcome::Coalesced
        );

        transport.open_gate();
        assert_eq!(first.await.unwrap(), SyncOutcome::Fatal);
        assert_eq!(listener.fatal_errors(), 1);

        let status = coordinator.status().await;
        assert!(!status.suspended);
        assert!(status.retry_pending);

        tokio::time::sleep(Duration::from_secs(3600)).await;

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[1].tags.contains("a") && sent[1].tags.contains("b"));
        assert!(coordinator.status().await.is_idle());
        assert!(listener.statuses() > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_retry_without_new_changes_suspends() {
        let transport = ScriptedTransport::gated();
        for _ in 0..2 {
            transport.push_result(Err(TransportError::Permanent("FORBIDDEN: app disabled".into())));
        }
        let listener = CountingListener::new();
        let (_, coordinator) = coordinator(transport.clone(), listener.clone());
        dirty(&coordinator, "a").await;

        let c = coordinator.clone();
        let first = tokio::spawn(async move { c.request_sync(SyncTrigger::Manual).await });
        settle().await;
        dirty(&coordinator, "b").await;
        coordinator.request_sync(SyncTrigger::Mutation).await;

        transport.open_gate();
        assert_eq!(first.await.unwrap(), SyncOutcome::Fatal);

        tokio::time::sleep(Duration::from_secs(3600)).await;

        // The follow-up was rejected too: suspended, still surfaced once
        assert_eq!(transport.sent_count(), 2);
        let status = coordinator.status().await;
        assert!(status.suspended);
        assert!(status.dirty);
        assert!(!status.retry_pending);
        assert_eq!(listener.fatal_errors(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_count_and_delay_grow_until_success() {
        let transport = ScriptedTransport::new();
        for _ in 0..4 {
            transport.push_result(Err(TransportError::Retryable("offline".into())));
        }
        let listener = CountingListener::new();
        let (_, coordinator) = coordinator(transport.clone(), listener.clone());
        dirty(&coordinator, "a").await;

        assert_eq!(
            coordinator.request_sync(SyncTrigger::Manual).await,
            SyncOutcome::RetryScheduled
        );

        let mut counts = vec![coordinator.status().await.retry_count];
        let mut last_delay = Duration::ZERO;
        for attempt in 1..=4u32 {
            let delay = policy().base_delay(attempt);
            assert!(delay >= last_delay);
            last_delay = delay;

            tokio::time::sleep(delay + Duration::from_millis(10)).await;
            counts.push(coordinator.status().await.retry_count);
        }

        assert_eq!(counts, vec![1, 2, 3, 4, 0]);
        assert_eq!(transport.sent_count(), 5);
        assert_eq!(listener.sync_errors(), 4);
        assert!(!coordinator.status().await.retry_pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutation_during_backoff_rides_the_retry() {
        let transport = ScriptedTransport::new();
        transport.push_result(Err(TransportError::Retryable("offline".into())));
        let (_, coordinator) = coordinator(transport.clone(), CountingListener::new());

        dirty(&coordinator, "a").await;
        coordinator.request_sync(SyncTrigger::Manual).await;
        assert!(coordinator.status().await.retry_pending);

        dirty(&coordinator, "b").await;
        assert_eq!(
            coordinator.request_sync(SyncTrigger::Mutation).await,
            SyncOutcome::Deferred
        );
        assert_eq!(transport.sent_count(), 1);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[1].tags.contains("a") && sent[1].tags.contains("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_cancels_pending_retry() {
        let transport = ScriptedTransport::new();
        transport.push_result(Err(TransportError::Retryable("offline".into())));
        let (_, coordinator) = coordinator(transport.clone(), CountingListener::new());

        dirty(&coordinator, "a").await;
        coordinator.request_sync(SyncTrigger::Manual).await;
        assert_eq!(
            coordinator.request_sync(SyncTrigger::Manual).await,
            SyncOutcome::Synced
        );

        // Timer was cancelled, so nothing else goes out
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.sent_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_suspends_and_reports_once() {
        let transport = ScriptedTransport::new();
        transport.push_result(Err(TransportError::Permanent("UNAUTHORIZED: bad token".into())));
        transport.push_result(Err(TransportError::Permanent("UNAUTHORIZED: bad token".into())));
        let listener = CountingListener::new();
        let (_, coordinator) = coordinator(transport.clone(), listener.clone());

        dirty(&coordinator, "a").await;
        assert_eq!(
            coordinator.request_sync(SyncTrigger::Lifecycle).await,
            SyncOutcome::Fatal
        );
        assert_eq!(listener.fatal_errors(), 1);

        // Ignored while suspended, and no timer was armed
        assert_eq!(
            coordinator.request_sync(SyncTrigger::Lifecycle).await,
            SyncOutcome::Suspended
        );
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(transport.sent_count(), 1);

        // Same failure again after a manual request is not surfaced twice
        assert_eq!(
            coordinator.request_sync(SyncTrigger::Manual).await,
            SyncOutcome::Fatal
        );
        assert_eq!(listener.fatal_errors(), 1);

        // Resume forgets the failure
        coordinator.resume().await;
        assert_eq!(
            coordinator.request_sync(SyncTrigger::Lifecycle).await,
            SyncOutcome::Synced
        );
        assert!(!coordinator.status().await.suspended);
    }

    #[tokio::test(start_paused = true)]
    async fn test_facts_dropped_only_after_ack() {
        let transport = ScriptedTransport::new();
        transport.push_result(Err(TransportError::Retryable("offline".into())));
        let (store, coordinator) = coordinator(transport.clone(), CountingListener::new());

        coordinator
            .apply(|state| {
                state.push_fact(SyncFact::BadgeReset { at: Utc::now() });
                Ok(((), Effect::persist([Persist::Facts])))
            })
            .await
            .unwrap();

        coordinator.request_sync(SyncTrigger::Manual).await;
        assert_eq!(coordinator.status().await.pending_facts, 1);

        coordinator.request_sync(SyncTrigger::Manual).await;
        assert_eq!(coordinator.status().await.pending_facts, 0);
        assert_eq!(transport.sent()[1].facts.len(), 1);
        assert_eq!(
            store.get(herald_db::store::keys::PENDING_FACTS).await.unwrap().as_deref(),
            Some("[]")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_rejects_mutations() {
        let transport = ScriptedTransport::new();
        let (_, coordinator) = coordinator(transport.clone(), CountingListener::new());

        coordinator.shutdown().await.unwrap();
        let err = coordinator
            .apply(|_| Ok(((), Effect::none())))
            .await
            .unwrap_err();
        assert!(matches!(err, HeraldError::ShuttingDown));
        assert_eq!(
            coordinator.request_sync(SyncTrigger::Manual).await,
            SyncOutcome::ShutDown
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_channel_sees_transitions() {
        let transport = ScriptedTransport::new();
        let (_, coordinator) = coordinator(transport, CountingListener::new());
        let mut rx = coordinator.subscribe();

        dirty(&coordinator, "a").await;
        assert!(rx.borrow_and_update().dirty);

        coordinator.request_sync(SyncTrigger::Manual).await;
        let status = rx.borrow_and_update().clone();
        assert!(!status.dirty);
        assert!(status.last_success.is_some());
    }
}
