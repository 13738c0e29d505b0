//! # State Store Trait
//!
//! The durable key-value seam the engine persists through.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         StateStore                                      │
//! │                                                                         │
//! │   StateRepository (typed)                                              │
//! │        │  get / set / remove (JSON text values)                        │
//! │        ▼                                                                │
//! │   ┌──────────────────────┐      ┌──────────────────────┐              │
//! │   │  SqliteStateStore    │      │  MemoryStateStore    │              │
//! │   │  kv_state table      │      │  HashMap (tests)     │              │
//! │   └──────────────────────┘      └──────────────────────┘              │
//! │                                                                         │
//! │   A value is durable once the returned future resolves.                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;

use crate::error::DbResult;

/// Durable string key-value storage.
///
/// Implementations must make a write durable before the returned future
/// resolves; the engine relies on that for crash recovery.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Reads a value.
    async fn get(&self, key: &str) -> DbResult<Option<String>>;

    /// Writes a value, replacing any previous one.
    async fn set(&self, key: &str, value: &str) -> DbResult<()>;

    /// Removes a value. Removing an absent key is not an error.
    async fn remove(&self, key: &str) -> DbResult<()>;
}

/// Keys under which engine state is persisted.
pub mod keys {
    /// Device registration (token, error, enabled flag).
    pub const REGISTRATION: &str = "registration";
    /// Subscriber key.
    pub const SUBSCRIBER_KEY: &str = "subscriber_key";
    /// Tag set.
    pub const TAGS: &str = "tags";
    /// Attribute map.
    pub const ATTRIBUTES: &str = "attributes";
    /// Pending-sync flag; cleared only on acknowledged sync.
    pub const PENDING_SYNC: &str = "pending_sync";
    /// Timestamp of the last acknowledged sync.
    pub const LAST_SYNC: &str = "last_sync";
    /// Facts waiting for acknowledgement.
    pub const PENDING_FACTS: &str = "pending_facts";
    /// Last acknowledged snapshot.
    pub const LAST_SNAPSHOT: &str = "last_snapshot";
    /// Stable per-install identifier.
    pub const DEVICE_ID: &str = "device_id";
}
