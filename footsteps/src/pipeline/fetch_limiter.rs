//! Concurrency limiter for tile fetches.
//!
//! A fixed-capacity admission gate with oldest-first preemption. Admission
//! never waits: when the gate is full, the oldest in-flight fetch is
//! cancelled to make room for the new one.
//!
//! # Design
//!
//! ```text
//! capacity 2
//!
//! acquire(R1)  [R1]
//! acquire(R2)  [R1, R2]
//! acquire(R3)  [R2, R3]    R1.token.cancel()
//! release(R2)  [R3]
//! release(R2)  [R3]        no-op
//! ```
//!
//! The newest requests reflect the current viewport, so they are the ones
//! kept. Cancelling the victim's token aborts its transfer, which reclaims
//! bandwidth instead of merely discarding the result later.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Default capacity, matching a browser's per-origin connection budget.
pub const DEFAULT_MAX_CONCURRENCY: usize = 6;

#[derive(Debug)]
struct InFlight {
    id: u64,
    token: CancellationToken,
    started_at: Instant,
}

#[derive(Debug)]
struct LimiterInner {
    capacity: usize,
    in_flight: Mutex<VecDeque<InFlight>>,
    next_id: AtomicU64,
    preempted: AtomicU64,
    label: String,
}

/// FIFO admission gate with oldest-first preemption.
#[derive(Debug, Clone)]
pub struct FetchLimiter {
    inner: Arc<LimiterInner>,
}

impl FetchLimiter {
    /// Creates a limiter admitting at most `capacity` fetches (minimum 1).
    pub fn new(capacity: usize, label: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(LimiterInner {
                capacity: capacity.max(1),
                in_flight: Mutex::new(VecDeque::new()),
                next_id: AtomicU64::new(0),
                preempted: AtomicU64::new(0),
                label: label.into(),
            }),
        }
    }

    /// Admits a fetch, preempting the oldest one if the gate is full.
    pub fn acquire(&self) -> FetchPermit {
        self.acquire_with(CancellationToken::new())
    }

    /// Admits a fetch whose token is a child of `parent`, so cancelling the
    /// parent (viewport change, teardown) also cancels the fetch.
    pub fn acquire_child(&self, parent: &CancellationToken) -> FetchPermit {
        self.acquire_with(parent.child_token())
    }

    fn acquire_with(&self, token: CancellationToken) -> FetchPermit {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut in_flight = self.inner.in_flight.lock();
            while in_flight.len() >= self.inner.capacity {
                let Some(victim) = in_flight.pop_front() else {
                    break;
                };
                victim.token.cancel();
                self.inner.preempted.fetch_add(1, Ordering::Relaxed);
                debug!(
                    limiter = %self.inner.label,
                    victim = victim.id,
                    age_ms = victim.started_at.elapsed().as_millis() as u64,
                    "Preempted oldest fetch"
                );
            }
            in_flight.push_back(InFlight {
                id,
                token: token.clone(),
                started_at: Instant::now(),
            });
        }
        FetchPermit {
            id,
            token,
            limiter: self.clone(),
        }
    }

    /// Removes a fetch from the in-flight set. Idempotent.
    pub fn release(&self, id: u64) {
        self.inner.in_flight.lock().retain(|entry| entry.id != id);
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Number of fetches currently admitted.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    /// Total number of preempted fetches.
    pub fn preempted(&self) -> u64 {
        self.inner.preempted.load(Ordering::Relaxed)
    }
}

impl Default for FetchLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENCY, "tiles")
    }
}

/// An admitted fetch. Released when dropped.
#[derive(Debug)]
pub struct FetchPermit {
    id: u64,
    token: CancellationToken,
    limiter: FetchLimiter,
}

impl FetchPermit {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Token cancelled when this fetch is preempted.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for FetchPermit {
    fn drop(&mut self) {
        self.limiter.release(self.id);
    }
}
