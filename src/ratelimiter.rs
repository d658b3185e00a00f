//! Outbound rate limiter guarding writes to the gateway.
//!
//! The gateway protocol allows a fixed number of outbound frames per
//! rolling time window; exceeding it gets the connection closed. This
//! is a plain sliding-window token bucket, parameterized by
//! `(window, permits_per_window)` rather than coupled to any one
//! caller's cadence (earlier designs reserved slots specifically for
//! heartbeats; this one does not need to, since every write —
//! heartbeat or otherwise — goes through the same gate).

use std::{collections::VecDeque, time::Duration};
use tokio::{sync::Mutex, time::Instant};

/// Default number of permits granted per [`RateLimiter::DEFAULT_WINDOW`].
///
/// <https://discord.com/developers/docs/topics/gateway#rate-limiting>
pub const DEFAULT_PERMITS: usize = 120;

/// Sliding-window limiter on outbound gateway frames.
///
/// `acquire` resolves once a permit is available, ensuring no more than
/// `permits_per_window` acquisitions complete within any rolling
/// `window` interval. Waiters are served first-come-first-served; a
/// cancelled waiter (its future dropped before resolving) never
/// consumes a permit.
#[derive(Debug)]
pub struct RateLimiter {
    /// Length of the rolling window.
    window: Duration,
    /// Maximum grants allowed within any `window`-length interval.
    permits: usize,
    /// Timestamps of grants still inside the current window, oldest
    /// first. Guarded by an async mutex so that waiters queue and are
    /// served in arrival order; this also doubles as the single-writer
    /// boundary the orchestrator relies on.
    grants: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Default rolling window: 60 seconds.
    pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

    /// Create a limiter permitting `permits` acquisitions per rolling
    /// `window`.
    pub fn new(window: Duration, permits: usize) -> Self {
        Self {
            window,
            permits,
            grants: Mutex::new(VecDeque::with_capacity(permits)),
        }
    }

    /// The default gateway limiter: 120 permits per 60 second window.
    pub fn default_gateway() -> Self {
        Self::new(Self::DEFAULT_WINDOW, DEFAULT_PERMITS)
    }

    /// Maximum number of permits granted per window.
    pub const fn max(&self) -> usize {
        self.permits
    }

    /// Block until a permit is available, then consume it.
    ///
    /// Holds an internal async mutex for the duration of the wait, so
    /// concurrent callers are released in the order they started
    /// waiting.
    pub async fn acquire(&self) {
        let mut grants = self.grants.lock().await;

        loop {
            let now = Instant::now();
            self.evict_expired(&mut grants, now);

            if grants.len() < self.permits {
                grants.push_back(now);
                return;
            }

            // `grants.len() >= self.permits > 0` guarantees a front entry.
            let oldest = *grants.front().expect("bucket at capacity has an entry");
            tokio::time::sleep_until(oldest + self.window).await;
        }
    }

    /// Number of permits still available in the current window without
    /// waiting, as of this call.
    pub async fn available(&self) -> usize {
        let mut grants = self.grants.lock().await;
        let now = Instant::now();
        self.evict_expired(&mut grants, now);

        self.permits - grants.len()
    }

    /// Drop grant timestamps that have aged out of the rolling window.
    fn evict_expired(&self, grants: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&oldest) = grants.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                grants.pop_front();
            } else {
                break;
            }
        }
    }
}
