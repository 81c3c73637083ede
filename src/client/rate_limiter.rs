//! Request pacing for the Plex API.
//!
//! Epistemic foundation:
//! - K_i: Plex has no published rate limit, but a busy server answers 429/503
//! - K_i: 429 errors require exponential backoff
//! - B_i: A fixed gap between requests keeps a home server responsive
//! - I^B: Server load unknowable → pace up front, back off on pushback

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Longest backoff applied after repeated 429s.
const MAX_BACKOFF_SECS: f64 = 60.0;

/// Pacing state for one kind of request.
#[derive(Debug, Default)]
pub struct EndpointState {
    /// Earliest start of the next request
    pub next_slot: Option<Instant>,
    /// Consecutive 429 errors (for backoff)
    pub consecutive_429s: u32,
    /// Backoff until this time
    pub backoff_until: Option<Instant>,
}

impl EndpointState {
    /// Check if a request could start right now.
    pub fn can_proceed(&self) -> bool {
        let now = Instant::now();
        !self.backoff_until.is_some_and(|t| now < t) && !self.next_slot.is_some_and(|t| now < t)
    }

    /// Get time to wait before proceeding.
    pub fn wait_time(&self) -> Duration {
        let now = Instant::now();
        [self.backoff_until, self.next_slot]
            .into_iter()
            .flatten()
            .filter(|&t| t > now)
            .map(|t| t - now)
            .max()
            .unwrap_or(Duration::ZERO)
    }

    /// Record a 429 error and calculate backoff.
    ///
    /// A server supplied Retry-After wins over the computed backoff when longer.
    pub fn record_429(&mut self, retry_after: Option<Duration>) {
        self.consecutive_429s += 1;
        let backoff_secs = 2.0_f64
            .powi(self.consecutive_429s as i32)
            .min(MAX_BACKOFF_SECS);
        let backoff = retry_after
            .unwrap_or_default()
            .max(Duration::from_secs_f64(backoff_secs));
        self.backoff_until = Some(Instant::now() + backoff);
        warn!(
            consecutive_429s = self.consecutive_429s,
            backoff_secs = backoff.as_secs_f64(),
            "Rate limited (429), backing off"
        );
    }

    /// Record a successful request.
    pub fn record_success(&mut self) {
        if self.consecutive_429s > 0 {
            self.consecutive_429s = 0;
            self.backoff_until = None;
        }
    }
}

/// Paces requests per endpoint kind and backs off on 429s.
#[derive(Debug)]
pub struct RateLimiter {
    /// Minimum gap between request starts of the same kind
    min_interval: Duration,
    states: DashMap<String, EndpointState>,
    total_requests: AtomicU64,
    total_429s: AtomicU64,
    total_wait_ms: AtomicU64,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            states: DashMap::new(),
            total_requests: AtomicU64::new(0),
            total_429s: AtomicU64::new(0),
            total_wait_ms: AtomicU64::new(0),
        }
    }

    /// Wait for the next free slot of `kind` and claim it.
    ///
    /// Returns the duration waited.
    pub async fn wait_if_needed(&self, kind: &str) -> Duration {
        let wait_time = {
            let mut state = self.states.entry(kind.to_string()).or_default();
            let wait = state.wait_time();
            // Claim the slot while holding the entry so concurrent callers queue up
            state.next_slot = Some(Instant::now() + wait + self.min_interval);
            wait
        };

        if wait_time > Duration::ZERO {
            debug!(
                kind = kind,
                wait_ms = wait_time.as_millis() as u64,
                "Pacing request"
            );
            self.total_wait_ms
                .fetch_add(wait_time.as_millis() as u64, Ordering::Relaxed);
            tokio::time::sleep(wait_time).await;
        }

        wait_time
    }

    /// Check if we can proceed (non-blocking).
    pub fn can_proceed(&self, kind: &str) -> bool {
        self.states
            .get(kind)
            .is_none_or(|state| state.can_proceed())
    }

    /// Record a request result.
    pub fn record_request(&self, kind: &str, status: u16, retry_after: Option<Duration>) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        let mut state = self.states.entry(kind.to_string()).or_default();

        if status == 429 {
            self.total_429s.fetch_add(1, Ordering::Relaxed);
            state.record_429(retry_after);
        } else if status < 400 {
            state.record_success();
        }
    }

    /// Get statistics.
    pub fn stats(&self) -> RateLimiterStats {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let total_429s = self.total_429s.load(Ordering::Relaxed);
        let total_wait_ms = self.total_wait_ms.load(Ordering::Relaxed);

        RateLimiterStats {
            total_requests,
            total_429s,
            total_wait_secs: total_wait_ms as f64 / 1000.0,
            rate_limit_ratio: if total_requests > 0 {
                total_429s as f64 / total_requests as f64
            } else {
                0.0
            },
            endpoints_tracked: self.states.len(),
        }
    }
}

/// Rate limiter statistics.
#[derive(Debug, Clone)]
pub struct RateLimiterStats {
    pub total_requests: u64,
    pub total_429s: u64,
    pub total_wait_secs: f64,
    pub rate_limit_ratio: f64,
    pub endpoints_tracked: usize,
}
