//! # State Repository
//!
//! Typed access to the engine's persisted state on top of any [`StateStore`].
//!
//! ## Rehydration
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Process Start                                        │
//! │                                                                         │
//! │  StateRepository::load()                                               │
//! │       │                                                                 │
//! │       ├── registration    → token, last error, push enabled            │
//! │       ├── subscriber_key  → identity                                   │
//! │       ├── tags/attributes → attribution                                │
//! │       ├── pending_sync    → SyncState.dirty  (crash mid-sync? resend)  │
//! │       ├── last_sync       → SyncState.last_success                     │
//! │       └── pending_facts   → facts not yet acknowledged                 │
//! │                                                                         │
//! │  A value that fails to decode is logged and treated as absent;         │
//! │  one corrupt key must not keep the engine from starting.               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use herald_core::{AttributeMap, DeviceRegistration, Snapshot, SyncFact, TagSet};

use crate::error::{DbError, DbResult};
use crate::store::{keys, StateStore};

/// Everything read back from the store at construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistedState {
    pub registration: DeviceRegistration,
    pub subscriber_key: Option<String>,
    pub tags: TagSet,
    pub attributes: AttributeMap,
    /// A sync was pending when the previous process stopped.
    pub pending_sync: bool,
    pub last_sync: Option<DateTime<Utc>>,
    pub facts: Vec<SyncFact>,
}

/// Typed repository over a shared [`StateStore`].
#[derive(Clone)]
pub struct StateRepository {
    store: Arc<dyn StateStore>,
}

impl std::fmt::Debug for StateRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateRepository").finish_non_exhaustive()
    }
}

impl StateRepository {
    /// Creates a repository over the given store.
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        StateRepository { store }
    }

    // =========================================================================
    // Load
    // =========================================================================

    /// Reads all persisted engine state.
    pub async fn load(&self) -> DbResult<PersistedState> {
        let state = PersistedState {
            registration: self.read(keys::REGISTRATION).await?.unwrap_or_default(),
            subscriber_key: self.read(keys::SUBSCRIBER_KEY).await?,
            tags: self.read(keys::TAGS).await?.unwrap_or_default(),
            attributes: self.read(keys::ATTRIBUTES).await?.unwrap_or_default(),
            pending_sync: self.read(keys::PENDING_SYNC).await?.unwrap_or(false),
            last_sync: self.read(keys::LAST_SYNC).await?,
            facts: self.read(keys::PENDING_FACTS).await?.unwrap_or_default(),
        };

        info!(
            has_token = state.registration.token.is_some(),
            tags = state.tags.len(),
            attributes = state.attributes.len(),
            pending_sync = state.pending_sync,
            pending_facts = state.facts.len(),
            "Rehydrated persisted state"
        );

        Ok(state)
    }

    /// Returns the per-install device id, generating and storing one on first use.
    pub async fn device_id(&self) -> DbResult<String> {
        if let Some(id) = self.read::<String>(keys::DEVICE_ID).await? {
            return Ok(id);
        }

        let id = Uuid::new_v4().to_string();
        self.write(keys::DEVICE_ID, &id).await?;
        info!(device_id = %id, "Generated device identifier");
        Ok(id)
    }

    // =========================================================================
    // Save
    // =========================================================================

    pub async fn save_registration(&self, registration: &DeviceRegistration) -> DbResult<()> {
        self.write(keys::REGISTRATION, registration).await
    }

    pub async fn save_subscriber_key(&self, key: Option<&str>) -> DbResult<()> {
        match key {
            Some(key) => self.write(keys::SUBSCRIBER_KEY, &key).await,
            None => self.store.remove(keys::SUBSCRIBER_KEY).await,
        }
    }

    pub async fn save_tags(&self, tags: &TagSet) -> DbResult<()> {
        self.write(keys::TAGS, tags).await
    }

    pub async fn save_attributes(&self, attributes: &AttributeMap) -> DbResult<()> {
        self.write(keys::ATTRIBUTES, attributes).await
    }

    pub async fn save_pending_sync(&self, pending: bool) -> DbResult<()> {
        self.write(keys::PENDING_SYNC, &pending).await
    }

    pub async fn save_last_sync(&self, at: DateTime<Utc>) -> DbResult<()> {
        self.write(keys::LAST_SYNC, &at).await
    }

    pub async fn save_facts(&self, facts: &[SyncFact]) -> DbResult<()> {
        self.write(keys::PENDING_FACTS, &facts).await
    }

    /// Records the last snapshot the server acknowledged.
    pub async fn save_last_snapshot(&self, snapshot: &Snapshot) -> DbResult<()> {
        self.write(keys::LAST_SNAPSHOT, snapshot).await
    }

    /// Reads the last acknowledged snapshot.
    pub async fn last_snapshot(&self) -> DbResult<Option<Snapshot>> {
        self.read(keys::LAST_SNAPSHOT).await
    }

    // =========================================================================
    // Encoding
    // =========================================================================

    async fn read<T: DeserializeOwned>(&self, key: &str) -> DbResult<Option<T>> {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(None);
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key = %key, error = %e, "Discarding undecodable persisted value");
                Ok(None)
            }
        }
    }

    async fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> DbResult<()> {
        let raw = serde_json::to_string(value).map_err(|e| DbError::serialization(key, e))?;
        debug!(key = %key, bytes = raw.len(), "Persisting state");
        self.store.set(key, &raw).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStateStore;
    use herald_core::{DeviceInfo, DeviceToken};

    fn repo() -> (MemoryStateStore, StateRepository) {
        let store = MemoryStateStore::new();
        let repo = StateRepository::new(Arc::new(store.clone()));
        (store, repo)
    }

    #[tokio::test]
    async fn test_empty_store_loads_defaults() {
        let (_, repo) = repo();
        let state = repo.load().await.unwrap();
        assert_eq!(state, PersistedState::default());
    }

    #[tokio::test]
    async fn test_round_trip_through_store() {
        let (store, repo) = repo();

        let mut registration = DeviceRegistration::default();
        registration.apply_token(DeviceToken::from_bytes(vec![0xab, 0xcd]), Utc::now());
        let tags: TagSet = ["vip".to_string()].into_iter().collect();
        let mut attributes = AttributeMap::new();
        attributes.insert("plan".into(), "gold".into());
        let facts = vec![SyncFact::BadgeReset { at: Utc::now() }];

        repo.save_registration(&registration).await.unwrap();
        repo.save_subscriber_key(Some("user-1")).await.unwrap();
        repo.save_tags(&tags).await.unwrap();
        repo.save_attributes(&attributes).await.unwrap();
        repo.save_pending_sync(true).await.unwrap();
        repo.save_facts(&facts).await.unwrap();

        // Fresh repository over the same store, as after a restart
        let reloaded = StateRepository::new(Arc::new(store)).load().await.unwrap();
        assert_eq!(reloaded.registration, registration);
        assert_eq!(reloaded.subscriber_key.as_deref(), Some("user-1"));
        assert_eq!(reloaded.tags, tags);
        assert_eq!(reloaded.attributes, attributes);
        assert!(reloaded.pending_sync);
        assert_eq!(reloaded.facts, facts);
    }

    #[tokio::test]
    async fn test_last_snapshot_round_trip() {
        let (_, repo) = repo();
        assert_eq!(repo.last_snapshot().await.unwrap(), None);

        let snapshot = Snapshot {
            app_id: "app-1".into(),
            device: DeviceInfo::new("dev-1"),
            token: Some("abcd".into()),
            push_enabled: true,
            subscriber_key: None,
            tags: ["vip".to_string()].into_iter().collect(),
            attributes: AttributeMap::new(),
            facts: vec![],
            generated_at: Utc::now(),
        };
        repo.save_last_snapshot(&snapshot).await.unwrap();
        assert_eq!(repo.last_snapshot().await.unwrap(), Some(snapshot));
    }

    #[tokio::test]
    async fn test_clearing_subscriber_key_removes_it() {
        let (store, repo) = repo();
        repo.save_subscriber_key(Some("k")).await.unwrap();
        repo.save_subscriber_key(None).await.unwrap();
        assert_eq!(store.get(keys::SUBSCRIBER_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupt_value_is_treated_as_absent() {
        let (store, repo) = repo();
        store.set(keys::TAGS, "{not json").await.unwrap();
        store.set(keys::PENDING_SYNC, "true").await.unwrap();

        let state = repo.load().await.unwrap();
        assert!(state.tags.is_empty());
        assert!(state.pending_sync);
    }

    #[tokio::test]
    async fn test_device_id_is_stable() {
        let (_, repo) = repo();
        let first = repo.device_id().await.unwrap();
        let second = repo.device_id().await.unwrap();
        assert_eq!(first, second);
        assert!(Uuid::parse_str(&first).is_ok());
    }
}
