//! Test doubles shared by the engine's unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use herald_core::Snapshot;

use crate::coordinator::SyncEventListener;
use crate::router::{AlertPresenter, AlertRequest, PayloadDelegate};
use crate::state::SyncStatus;
use crate::transport::{Ack, SyncTransport, TransportError};

/// Lets every ready task run. Only meaningful with paused time.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

// =============================================================================
// Transport
// =============================================================================

/// Transport that records snapshots and replays scripted results.
/// Once the script runs out every send succeeds.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<(), TransportError>>>,
    sent: Mutex<Vec<Snapshot>>,
    gate: Option<Semaphore>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(None))
    }

    /// Sends block until [`open_gate`](Self::open_gate).
    pub fn gated() -> Arc<Self> {
        Arc::new(Self::build(Some(Semaphore::new(0))))
    }

    fn build(gate: Option<Semaphore>) -> Self {
        ScriptedTransport {
            script: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            gate,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    pub fn push_result(&self, result: Result<(), TransportError>) {
        self.script.lock().push_back(result);
    }

    pub fn open_gate(&self) {
        if let Some(ref gate) = self.gate {
            gate.add_permits(1024);
        }
    }

    pub fn sent(&self) -> Vec<Snapshot> {
        self.sent.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn last_sent(&self) -> Option<Snapshot> {
        self.sent.lock().last().cloned()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SyncTransport for ScriptedTransport {
    async fn send(&self, snapshot: &Snapshot) -> Result<Ack, TransportError> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        let sequence = {
            let mut sent = self.sent.lock();
            sent.push(snapshot.clone());
            sent.len() as u64
        };

        if let Some(ref gate) = self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let result = self.script.lock().pop_front().unwrap_or(Ok(()));
        self.active.fetch_sub(1, Ordering::SeqCst);

        result.map(|_| Ack {
            sequence,
            server_time: None,
        })
    }
}

// =============================================================================
// Listener
// =============================================================================

#[derive(Default)]
pub struct CountingListener {
    statuses: AtomicUsize,
    sync_errors: AtomicUsize,
    fatal: Mutex<Vec<String>>,
}

impl CountingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn statuses(&self) -> usize {
        self.statuses.load(Ordering::SeqCst)
    }

    pub fn sync_errors(&self) -> usize {
        self.sync_errors.load(Ordering::SeqCst)
    }

    pub fn fatal_errors(&self) -> usize {
        self.fatal.lock().len()
    }
}

impl SyncEventListener for CountingListener {
    fn on_status(&self, _status: &SyncStatus) {
        self.statuses.fetch_add(1, Ordering::SeqCst);
    }

    fn on_sync_error(&self, _message: &str, _retryable: bool) {
        self.sync_errors.fetch_add(1, Ordering::SeqCst);
    }

    fn on_fatal_error(&self, message: &str) {
        self.fatal.lock().push(message.to_string());
    }
}

// =============================================================================
// Delegate & Presenter
// =============================================================================

#[derive(Default)]
pub struct RecordingDelegate {
    pub foreground: bool,
    pub delivered: Mutex<Vec<String>>,
}

impl RecordingDelegate {
    pub fn new(foreground: bool) -> Arc<Self> {
        Arc::new(RecordingDelegate {
            foreground,
            delivered: Mutex::new(Vec::new()),
        })
    }
}

impl PayloadDelegate for RecordingDelegate {
    fn deliver(&self, content: &str) {
        self.delivered.lock().push(content.to_string());
    }

    fn wants_foreground_delivery(&self) -> bool {
        self.foreground
    }
}

#[derive(Default)]
pub struct RecordingPresenter {
    pub presented: Mutex<Vec<AlertRequest>>,
}

impl AlertPresenter for RecordingPresenter {
    fn present(&self, request: &AlertRequest) {
        self.presented.lock().push(request.clone());
    }
}
