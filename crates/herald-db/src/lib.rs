//! # herald-db: State Store for Herald
//!
//! Durable storage for everything the engine must remember across restarts.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Herald Data Flow                                 │
//! │                                                                         │
//! │  herald-sync (mutation or sync outcome, under the engine lock)         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     herald-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │ StateStore    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │ (store.rs)    │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ StateRepo     │    │              │  │   │
//! │  │   │ get/set/remove│◄───│ SqliteStore   │    │ 001_state    │  │   │
//! │  │   │               │    │ MemoryStore   │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  │   <data dir>/herald/herald.db                                   │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`store`] - The `StateStore` trait and key names
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`memory`] - In-memory store
//! - [`repository`] - SQLite store and typed state repository
//! - [`error`] - Database error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use herald_db::{Database, DbConfig, StateRepository};
//!
//! let db = Database::new(DbConfig::new("herald.db")).await?;
//! let repo = StateRepository::new(Arc::new(db.state_store()));
//! let state = repo.load().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod memory;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod store;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use memory::MemoryStateStore;
pub use pool::{Database, DbConfig};
pub use repository::kv::SqliteStateStore;
pub use repository::state::{PersistedState, StateRepository};
pub use store::StateStore;
