//! # Repository Module
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  herald-sync (engine)                                                  │
//! │       │  repo.save_tags(&tags)                                         │
//! │       ▼                                                                 │
//! │  StateRepository    typed keys, JSON encoding                          │
//! │       │  store.set("tags", "[\"vip\"]")                                │
//! │       ▼                                                                 │
//! │  dyn StateStore     SqliteStateStore | MemoryStateStore                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! - [`StateRepository`](state::StateRepository) - Typed engine state
//! - [`SqliteStateStore`](kv::SqliteStateStore) - `kv_state` table

pub mod kv;
pub mod state;
