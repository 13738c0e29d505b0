//! # Sync Transport
//!
//! The "push this state to the server" seam and its WebSocket implementation.
//!
//! ## One Exchange
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    WsSyncTransport::send(snapshot)                      │
//! │                                                                         │
//! │  ┌────────────┐  connect (timeout)  ┌────────────┐                     │
//! │  │   Idle     │ ──────────────────► │ Connected  │                     │
//! │  └────────────┘                     └─────┬──────┘                     │
//! │        ▲                                  │ Register { sequence }      │
//! │        │                                  ▼                             │
//! │        │                            ┌────────────┐  Ping → Pong        │
//! │        │                            │ Awaiting   │ ◄──────────┐        │
//! │        │                            │ Ack        │ ───────────┘        │
//! │        │                            └─────┬──────┘                     │
//! │        │        RegisterAck ──► Ok(Ack)   │   Error ──► classify       │
//! │        └──────────────── close ◄──────────┘                            │
//! │                                                                         │
//! │  CLASSIFICATION                                                        │
//! │  ──────────────                                                        │
//! │  Permanent:  HTTP 4xx on upgrade, malformed URL, permanent error code  │
//! │  Retryable:  I/O, TLS, timeouts, HTTP 5xx, early close, other codes    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The connection is opened per exchange; a sync happens only when state
//! changes, so there is nothing to keep alive between them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use herald_core::Snapshot;

use crate::config::HeraldConfig;
use crate::error::{HeraldError, HeraldResult};
use crate::protocol::{is_permanent_code, SyncMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Transport Trait
// =============================================================================

/// Server acknowledgement of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    /// Sequence of the acknowledged exchange.
    pub sequence: u64,
    /// Server clock at acknowledgement, when reported.
    pub server_time: Option<DateTime<Utc>>,
}

/// Why a sync exchange failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Network, timeout or server-side trouble. Try again later.
    #[error("Retryable sync failure: {0}")]
    Retryable(String),

    /// Credentials or configuration were rejected. Retrying won't help.
    #[error("Permanent sync failure: {0}")]
    Permanent(String),
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Retryable(_))
    }

    pub fn message(&self) -> &str {
        match self {
            TransportError::Retryable(msg) | TransportError::Permanent(msg) => msg,
        }
    }
}

/// One logical "push state to server" exchange.
///
/// Implementations must be safe to call again after any failure; the engine
/// never calls `send` concurrently.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Sends a snapshot and waits for the server's verdict.
    async fn send(&self, snapshot: &Snapshot) -> Result<Ack, TransportError>;

    /// Picks up new credentials or endpoint after a reconfiguration.
    fn reconfigure(&self, _config: &HeraldConfig) {}
}

// =============================================================================
// WebSocket Transport Configuration
// =============================================================================

/// Configuration for [`WsSyncTransport`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// WebSocket URL to connect to.
    pub url: String,

    /// Application identifier.
    pub app_id: String,

    /// Application access token.
    pub access_token: String,

    /// Connection timeout.
    pub connect_timeout: Duration,

    /// Time allowed between sending the snapshot and receiving the ack.
    pub ack_timeout: Duration,
}

impl TransportConfig {
    /// Builds a transport configuration; the endpoint is required.
    pub fn from_config(config: &HeraldConfig) -> HeraldResult<Self> {
        let url = config
            .sync
            .endpoint
            .clone()
            .ok_or_else(|| HeraldError::InvalidConfig("sync endpoint required".into()))?;

        Ok(TransportConfig {
            url,
            app_id: config.app.app_id.clone(),
            access_token: config.app.access_token.clone(),
            connect_timeout: config.sync.connect_timeout(),
            ack_timeout: config.sync.ack_timeout(),
        })
    }
}

// =============================================================================
// WebSocket Transport
// =============================================================================

/// Request/ack [`SyncTransport`] over a short-lived WebSocket connection.
pub struct WsSyncTransport {
    config: RwLock<TransportConfig>,
    sequence: AtomicU64,
}

impl WsSyncTransport {
    /// Creates a transport. No connection is made until the first `send`.
    pub fn new(config: TransportConfig) -> Self {
        WsSyncTransport {
            config: RwLock::new(config),
            sequence: AtomicU64::new(0),
        }
    }

    /// Connects with timeout.
    async fn connect_with_timeout(&self, config: &TransportConfig) -> Result<WsStream, TransportError> {
        match timeout(config.connect_timeout, connect_async(config.url.as_str())).await {
            Ok(Ok((ws_stream, response))) => {
                debug!(status = ?response.status(), "WebSocket handshake complete");
                Ok(ws_stream)
            }
            Ok(Err(e)) => Err(classify_connect_error(e)),
            Err(_) => Err(TransportError::Retryable(format!(
                "connection timeout after {} seconds",
                config.connect_timeout.as_secs()
            ))),
        }
    }

    /// Waits for the ack matching `sequence`, answering keepalives meanwhile.
    async fn await_ack(ws: &mut WsStream, sequence: u64) -> Result<Ack, TransportError> {
        while let Some(result) = ws.next().await {
            let message = result.map_err(|e| TransportError::Retryable(e.to_string()))?;

            match message {
                WsMessage::Text(text) => match SyncMessage::from_json(&text) {
                    Ok(SyncMessage::RegisterAck(ack)) if ack.sequence == sequence => {
                        let server_time = ack
                            .server_time
                            .as_deref()
                            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                            .map(|t| t.with_timezone(&Utc));
                        return Ok(Ack {
                            sequence,
                            server_time,
                        });
                    }
                    Ok(SyncMessage::RegisterAck(ack)) => {
                        debug!(expected = sequence, got = ack.sequence, "Ignoring stale ack");
                    }
                    Ok(SyncMessage::Error { code, message }) => {
                        warn!(code = %code, message = %message, "Server rejected snapshot");
                        let text = format!("{}: {}", code, message);
                        return Err(if is_permanent_code(&code) {
                            TransportError::Permanent(text)
                        } else {
                            TransportError::Retryable(text)
                        });
                    }
                    Ok(SyncMessage::Ping { timestamp }) => {
                        send_json(ws, &SyncMessage::pong(&timestamp)).await?;
                    }
                    Ok(other) => {
                        debug!(msg_type = %other.type_name(), "Ignoring message while awaiting ack");
                    }
                    Err(e) => {
                        warn!(?e, "Failed to parse message");
                    }
                },
                WsMessage::Ping(data) => {
                    ws.send(WsMessage::Pong(data))
                        .await
                        .map_err(|e| TransportError::Retryable(e.to_string()))?;
                }
                WsMessage::Close(frame) => {
                    info!(?frame, "Server closed connection before ack");
                    return Err(TransportError::Retryable(
                        "connection closed before ack".into(),
                    ));
                }
                WsMessage::Pong(_) | WsMessage::Binary(_) | WsMessage::Frame(_) => {}
            }
        }

        Err(TransportError::Retryable("connection ended before ack".into()))
    }
}

#[async_trait]
impl SyncTransport for WsSyncTransport {
    async fn send(&self, snapshot: &Snapshot) -> Result<Ack, TransportError> {
        let config = self.config.read().clone();
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;

        let mut ws = self.connect_with_timeout(&config).await?;

        let register =
            SyncMessage::register(&config.app_id, &config.access_token, sequence, snapshot.clone());
        send_json(&mut ws, &register).await?;
        debug!(
            sequence,
            facts = snapshot.facts.len(),
            tags = snapshot.tags.len(),
            "Sent snapshot"
        );

        let result = match timeout(config.ack_timeout, Self::await_ack(&mut ws, sequence)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Retryable(format!(
                "no ack within {} seconds",
                config.ack_timeout.as_secs()
            ))),
        };

        let _ = ws.close(None).await;
        result
    }

    fn reconfigure(&self, config: &HeraldConfig) {
        let mut current = self.config.write();
        current.app_id = config.app.app_id.clone();
        current.access_token = config.app.access_token.clone();
        if let Some(ref endpoint) = config.sync.endpoint {
            current.url = endpoint.clone();
        }
        current.connect_timeout = config.sync.connect_timeout();
        current.ack_timeout = config.sync.ack_timeout();
        info!(url = %current.url, "Transport reconfigured");
    }
}

async fn send_json(ws: &mut WsStream, message: &SyncMessage) -> Result<(), TransportError> {
    let json = message
        .to_json()
        .map_err(|e| TransportError::Permanent(format!("cannot encode message: {}", e)))?;
    ws.send(WsMessage::Text(json.into()))
        .await
        .map_err(|e| TransportError::Retryable(e.to_string()))
}

/// Maps a connection failure onto retryable vs permanent.
fn classify_connect_error(err: WsError) -> TransportError {
    match err {
        WsError::Http(response) => {
            let status = response.status();
            if status.is_client_error() {
                TransportError::Permanent(format!("endpoint rejected connection: {}", status))
            } else {
                TransportError::Retryable(format!("endpoint unavailable: {}", status))
            }
        }
        WsError::Url(e) => TransportError::Permanent(format!("invalid endpoint: {}", e)),
        other => TransportError::Retryable(other.to_string()),
    }
}
