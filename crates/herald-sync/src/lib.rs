//! # herald-sync: Registration & Sync Engine for Herald
//!
//! Keeps a device's push registration and attribution state in step with the
//! push platform, reliably and without blocking the host application.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Herald Engine                                    │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 PushManager (host facade)                        │  │
//! │  │                                                                  │  │
//! │  │  Token, tags, attributes, notifications, lifecycle events       │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ Registration   │  │ IdentityStore  │  │ NotificationRouter     │    │
//! │  │ Engine         │  │                │  │                        │    │
//! │  │ token / failure│  │ key, tags,     │  │ delegate, alert, URL   │    │
//! │  │                │  │ attributes     │  │ + analytics facts      │    │
//! │  └───────┬────────┘  └───────┬────────┘  └───────────┬────────────┘    │
//! │          └───────────────────┼───────────────────────┘                 │
//! │                              ▼                                          │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SyncCoordinator                             │   │
//! │  │  Mutex<EngineState> · one send in flight · coalescing           │   │
//! │  │  RetryScheduler (capped exponential backoff, one timer)         │   │
//! │  └───────────────┬─────────────────────────────┬───────────────────┘   │
//! │                  ▼                             ▼                        │
//! │        StateStore (herald-db)        SyncTransport (WsSyncTransport)   │
//! │                                                                         │
//! │  HOST CALLBACKS:                                                       │
//! │  • SyncEventListener - status, sync errors, fatal errors (once)        │
//! │  • PayloadDelegate   - OpenDirect content                              │
//! │  • AlertPresenter    - foreground alerts                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`manager`] - `PushManager` facade and builder
//! - [`coordinator`] - Sync pipeline, triggers, mutation effects
//! - [`registration`] - Device token lifecycle
//! - [`identity`] - Subscriber key, tags, attributes
//! - [`router`] - Notification routing and analytics facts
//! - [`retry`] - Backoff policy and retry timer
//! - [`state`] - Engine state and observable status
//! - [`transport`] - `SyncTransport` trait and WebSocket implementation
//! - [`protocol`] - Wire messages
//! - [`config`] - Configuration (file, env, defaults)
//! - [`logging`] - Tracing setup and logger toggle
//! - [`error`] - Engine error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use herald_sync::{HeraldConfig, PushManager};
//!
//! let config = HeraldConfig::load(None)?;
//! let push = PushManager::builder(config)
//!     .with_device_metadata("iPhone7,2", "17.4")
//!     .build()
//!     .await?;
//!
//! push.register_token(token).await?;
//! push.add_tag("vip").await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod coordinator;
pub mod error;
pub mod identity;
pub mod logging;
pub mod manager;
pub mod protocol;
pub mod registration;
pub mod retry;
pub mod router;
pub mod state;
pub mod transport;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::HeraldConfig;
pub use coordinator::{NoOpListener, SyncCoordinator, SyncEventListener, SyncOutcome, SyncTrigger};
pub use error::{HeraldError, HeraldResult};
pub use identity::IdentityStore;
pub use manager::{PushManager, PushManagerBuilder};
pub use protocol::SyncMessage;
pub use registration::RegistrationEngine;
pub use retry::{RetryPolicy, RetryScheduler};
pub use router::{AlertPresenter, AlertRequest, NotificationRouter, PayloadDelegate, RouteDecision};
pub use state::SyncStatus;
pub use transport::{Ack, SyncTransport, TransportError, WsSyncTransport};

pub use herald_core::{AppState, DeviceToken, LaunchOptions, NotificationPayload};
