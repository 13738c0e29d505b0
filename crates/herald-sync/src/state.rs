//! # Engine State
//!
//! Everything the coordinator lock protects, plus the status view published
//! to observers.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │             tokio::sync::Mutex<EngineState>                             │
//! │                                                                         │
//! │  Persisted              Sync bookkeeping         Ephemeral              │
//! │  ─────────              ────────────────         ─────────              │
//! │  registration           sync (dirty, in_flight,  session                │
//! │  identity                     retry_count, ...)  device                 │
//! │  tags, attributes       resync_needed            app_id, analytics      │
//! │  facts                  suspended, last_fatal                           │
//! │                         flush_pending                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;
use ts_rs::TS;

use herald_core::{
    AttributeMap, DeviceInfo, DeviceRegistration, Session, Snapshot, SubscriberIdentity,
    SyncFact, SyncState, TagSet,
};
use herald_db::PersistedState;

/// Facts kept while the server is unreachable. The oldest are dropped first.
pub const MAX_PENDING_FACTS: usize = 256;

/// State guarded by the coordinator lock.
#[derive(Debug, Clone)]
pub struct EngineState {
    pub registration: DeviceRegistration,
    pub identity: SubscriberIdentity,
    pub tags: TagSet,
    pub attributes: AttributeMap,
    pub sync: SyncState,
    /// Facts not yet acknowledged, oldest first.
    pub facts: Vec<SyncFact>,
    pub session: Option<Session>,
    pub device: DeviceInfo,
    pub app_id: String,
    pub analytics: bool,

    /// A sync was requested while another was in flight.
    pub resync_needed: bool,
    /// A mutation or manual request arrived while a sync was in flight.
    pub resume_requested: bool,
    /// A permanent failure stopped automatic syncing.
    pub suspended: bool,
    /// Message of the last fatal error surfaced to the host.
    pub last_fatal: Option<String>,
    /// Message of the last failed sync.
    pub last_error: Option<String>,
    /// A write failed; the next persist rewrites every key.
    pub flush_pending: bool,
    pub shut_down: bool,

    /// Leading facts included in the in-flight snapshot.
    pub(crate) in_flight_facts: usize,
}

impl EngineState {
    /// Rebuilds engine state from what the store remembered.
    pub fn from_persisted(
        persisted: PersistedState,
        device: DeviceInfo,
        app_id: impl Into<String>,
        analytics: bool,
    ) -> Self {
        EngineState {
            registration: persisted.registration,
            identity: SubscriberIdentity {
                subscriber_key: persisted.subscriber_key,
            },
            tags: persisted.tags,
            attributes: persisted.attributes,
            sync: SyncState {
                dirty: persisted.pending_sync,
                last_success: persisted.last_sync,
                ..SyncState::default()
            },
            facts: persisted.facts,
            session: None,
            device,
            app_id: app_id.into(),
            analytics,
            resync_needed: false,
            resume_requested: false,
            suspended: false,
            last_fatal: None,
            last_error: None,
            flush_pending: false,
            shut_down: false,
            in_flight_facts: 0,
        }
    }

    /// Returns true if there is anything for a sync to carry.
    pub fn has_work(&self) -> bool {
        self.sync.dirty || !self.facts.is_empty()
    }

    /// Queues a fact for the next snapshot.
    ///
    /// Analytics facts are dropped while analytics is off. Returns true if the
    /// fact was queued.
    pub fn push_fact(&mut self, fact: SyncFact) -> bool {
        if fact.is_analytics() && !self.analytics {
            return false;
        }

        if self.facts.len() >= MAX_PENDING_FACTS {
            let dropped = self.facts.remove(0);
            self.in_flight_facts = self.in_flight_facts.saturating_sub(1);
            warn!(kind = dropped.kind(), "Pending fact queue full, dropping oldest");
        }

        self.facts.push(fact);
        true
    }

    /// Composes the full payload for one sync.
    pub fn compose_snapshot(&self, now: DateTime<Utc>) -> Snapshot {
        Snapshot {
            app_id: self.app_id.clone(),
            device: self.device.clone(),
            token: self.registration.token.as_ref().map(|t| t.to_hex()),
            push_enabled: self.registration.push_enabled,
            subscriber_key: self.identity.subscriber_key.clone(),
            tags: self.tags.clone(),
            attributes: self.attributes.clone(),
            facts: self.facts.clone(),
            generated_at: now,
        }
    }

    /// Drops the facts carried by an acknowledged snapshot.
    pub(crate) fn drain_sent_facts(&mut self) -> usize {
        let n = self.in_flight_facts.min(self.facts.len());
        self.facts.drain(..n);
        self.in_flight_facts = 0;
        n
    }

    pub fn status(&self, retry_pending: bool) -> SyncStatus {
        SyncStatus {
            in_flight: self.sync.in_flight,
            dirty: self.sync.dirty,
            retry_count: self.sync.retry_count,
            retry_pending,
            suspended: self.suspended,
            last_attempt: self.sync.last_attempt,
            last_success: self.sync.last_success,
            last_error: self.last_error.clone(),
            pending_facts: self.facts.len(),
        }
    }
}

// =============================================================================
// Status
// =============================================================================

/// Observable sync status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SyncStatus {
    /// A transport call is executing.
    pub in_flight: bool,
    /// Local changes have not been acknowledged.
    pub dirty: bool,
    /// Consecutive retryable failures.
    pub retry_count: u32,
    /// A retry timer is armed.
    pub retry_pending: bool,
    /// Stopped after a permanent failure.
    pub suspended: bool,
    #[ts(as = "Option<String>")]
    pub last_attempt: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub pending_facts: usize,
}

impl SyncStatus {
    /// Nothing in flight, nothing waiting.
    pub fn is_idle(&self) -> bool {
        !self.in_flight && !self.dirty && !self.retry_pending && self.pending_facts == 0
    }
}
