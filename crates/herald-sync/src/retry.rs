//! # Retry Scheduling
//!
//! Exponential backoff for failed syncs, with at most one timer outstanding.
//!
//! ```text
//! attempt:   1      2      3      4      5     ...     n
//! delay:     1s     2s     4s     8s     16s   ...     min(initial·2ⁿ⁻¹, max)
//!            (± randomization_factor jitter on each)
//!
//! schedule() while a timer is pending → old timer aborted, new one armed
//! cancel()   → timer aborted, nothing fires
//! fire       → slot cleared first, then the retry future runs
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::SyncSettings;

/// A boxed retry action.
pub type RetryFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

// =============================================================================
// Policy
// =============================================================================

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    pub randomization_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from_settings(&SyncSettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &SyncSettings) -> Self {
        RetryPolicy {
            initial: settings.initial_backoff(),
            max: settings.max_backoff(),
            multiplier: settings.multiplier,
            randomization_factor: settings.randomization_factor,
        }
    }

    /// Delay before jitter for the given 1-based attempt.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let secs = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Creates the exponential backoff configuration.
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial,
            initial_interval: self.initial,
            max_interval: self.max,
            multiplier: self.multiplier,
            randomization_factor: self.randomization_factor,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// Delay for the given attempt, jitter applied, never above `max`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let mut backoff = self.backoff();
        backoff.current_interval = self.base_delay(attempt);
        backoff
            .next_backoff()
            .unwrap_or(self.max)
            .min(self.max)
    }
}

// =============================================================================
// Scheduler
// =============================================================================

struct Pending {
    generation: u64,
    attempt: u32,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Inner {
    generation: u64,
    pending: Option<Pending>,
}

/// Owns the single outstanding retry timer.
#[derive(Clone)]
pub struct RetryScheduler {
    policy: Arc<Mutex<RetryPolicy>>,
    inner: Arc<Mutex<Inner>>,
}

impl RetryScheduler {
    pub fn new(policy: RetryPolicy) -> Self {
        RetryScheduler {
            policy: Arc::new(Mutex::new(policy)),
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Replaces the backoff parameters for future schedules.
    pub fn set_policy(&self, policy: RetryPolicy) {
        *self.policy.lock() = policy;
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy.lock().clone()
    }

    /// Arms the timer for `attempt`, replacing any pending one.
    ///
    /// Returns the chosen delay. Must be called from within a Tokio runtime.
    pub fn schedule(&self, attempt: u32, retry: RetryFuture) -> Duration {
        let delay = self.policy.lock().delay(attempt);

        let mut inner = self.inner.lock();
        inner.generation += 1;
        let generation = inner.generation;

        if let Some(previous) = inner.pending.take() {
            previous.handle.abort();
        }

        let slot = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut inner = slot.lock();
                match inner.pending {
                    Some(ref pending) if pending.generation == generation => {
                        inner.pending = None;
                    }
                    _ => return,
                }
            }
            debug!(attempt, "Retry timer fired");
            retry.await;
        });

        inner.pending = Some(Pending {
            generation,
            attempt,
            handle,
        });

        debug!(attempt, delay_ms = delay.as_millis() as u64, "Retry scheduled");
        delay
    }

    /// Aborts the pending timer, if any. Returns true if one was pending.
    pub fn cancel(&self) -> bool {
        match self.inner.lock().pending.take() {
            Some(pending) => {
                pending.handle.abort();
                debug!(attempt = pending.attempt, "Retry cancelled");
                true
            }
            None => false,
        }
    }

    /// Called after a successful sync: the next failure starts over at attempt 1.
    pub fn reset(&self) {
        self.cancel();
    }

    /// Returns true while a timer is armed and has not fired.
    pub fn pending(&self) -> bool {
        self.inner.lock().pending.is_some()
    }

    /// Attempt number of the pending timer.
    pub fn pending_attempt(&self) -> Option<u32> {
        self.inner.lock().pending.as_ref().map(|p| p.attempt)
    }
}

impl Default for RetryScheduler {
    fn default() -> Self {
        RetryScheduler::new(RetryPolicy::default())
    }
}

impl std::fmt::Debug for RetryScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryScheduler")
            .field("pending_attempt", &self.pending_attempt())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn exact_policy() -> RetryPolicy {
        RetryPolicy {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(10),
            multiplier: 2.0,
            randomization_factor: 0.0,
        }
    }

    fn counting(counter: &Arc<AtomicUsize>) -> RetryFuture {
        let counter = Arc::clone(counter);
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_delays_grow_and_cap() {
        let policy = exact_policy();
        let delays: Vec<u128> = (1..=6).map(|n| policy.delay(n).as_millis()).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 10000, 10000]);
        assert_eq!(policy.base_delay(1000), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_stays_within_cap() {
        let policy = RetryPolicy {
            randomization_factor: 0.5,
            ..exact_policy()
        };
        for attempt in 1..20 {
            assert!(policy.delay(attempt) <= policy.max);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_once() {
        let scheduler = RetryScheduler::new(exact_policy());
        let fired = Arc::new(AtomicUsize::new(0));

        let delay = scheduler.schedule(1, counting(&fired));
        assert_eq!(delay.as_millis(), 1000);
        assert!(scheduler.pending());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!scheduler.pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_pending_timer() {
        let scheduler = RetryScheduler::new(exact_policy());
        let fired = Arc::new(AtomicUsize::new(0));

        scheduler.schedule(1, counting(&fired));
        scheduler.schedule(2, counting(&fired));
        assert_eq!(scheduler.pending_attempt(), Some(2));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let scheduler = RetryScheduler::new(exact_policy());
        let fired = Arc::new(AtomicUsize::new(0));

        scheduler.schedule(1, counting(&fired));
        assert!(scheduler.cancel());
        assert!(!scheduler.cancel());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
