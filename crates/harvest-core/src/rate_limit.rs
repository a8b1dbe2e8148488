//! Per-domain outbound rate limiting
//!
//! Every network fetch acquires a grant for the target domain before it
//! touches the wire. Grants are budgeted over a rolling window; within one
//! domain, waiters are served FIFO (the per-domain `tokio::sync::Mutex` is
//! fair and is held across the wait, so no caller can starve).
//!
//! Sources that answer 429 shrink the domain's effective budget
//! multiplicatively via `report_throttled`; the budget recovers additively,
//! one slot per cooldown period without further throttling.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;

/// Grants issued in the current window, and the budget they count against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Utilization {
    pub in_window: u32,
    pub effective_limit: u32,
}

struct DomainState {
    /// Grant instants still inside the rolling window, oldest first
    grants: VecDeque<Instant>,
    /// Current budget after back-off; never above the configured maximum
    effective_limit: u32,
    /// Set while the domain is in back-off
    last_throttle: Option<Instant>,
    /// Last additive-recovery step
    last_recovery: Instant,
}

/// Rolling-window rate limiter keyed by domain.
pub struct RateLimiter {
    window: Duration,
    max_requests: u32,
    domains: StdMutex<HashMap<String, Arc<Mutex<DomainState>>>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            window: config.window(),
            max_requests: config.max_requests.max(1),
            domains: StdMutex::new(HashMap::new()),
        }
    }

    fn domain_state(&self, domain: &str) -> Arc<Mutex<DomainState>> {
        let mut domains = self.domains.lock().expect("rate limiter map poisoned");
        domains
            .entry(domain.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(DomainState {
                    grants: VecDeque::new(),
                    effective_limit: self.max_requests,
                    last_throttle: None,
                    last_recovery: Instant::now(),
                }))
            })
            .clone()
    }

    /// Block until a slot is available for `domain`, then take it.
    ///
    /// The domain lock is held across the wait, so concurrent callers are
    /// granted strictly in arrival order.
    pub async fn acquire(&self, domain: &str) {
        let state = self.domain_state(domain);
        let mut state = state.lock().await;

        loop {
            let now = Instant::now();
            self.step_recovery(&mut state, now);
            Self::prune(&mut state, now, self.window);

            if (state.grants.len() as u32) < state.effective_limit {
                state.grants.push_back(now);
                return;
            }

            // Full window: the next slot opens when the oldest grant ages out.
            let wake = *state.grants.front().expect("full window has a front") + self.window;
            tokio::time::sleep_until(wake).await;
        }
    }

    /// Report that a request to `domain` came back throttled (HTTP 429).
    ///
    /// Halves the effective budget (floor 1). Recovery is additive: +1 per
    /// cooldown period (one window length) with no further reports.
    pub async fn report_throttled(&self, domain: &str) {
        let state = self.domain_state(domain);
        let mut state = state.lock().await;

        let now = Instant::now();
        let reduced = (state.effective_limit / 2).max(1);
        if reduced < state.effective_limit {
            warn!(
                domain = %domain,
                from = state.effective_limit,
                to = reduced,
                "Source throttled us, shrinking request budget"
            );
        }
        state.effective_limit = reduced;
        state.last_throttle = Some(now);
        state.last_recovery = now;
    }

    /// Current utilization for `domain`.
    pub async fn utilization(&self, domain: &str) -> Utilization {
        let state = self.domain_state(domain);
        let mut state = state.lock().await;
        let now = Instant::now();
        self.step_recovery(&mut state, now);
        Self::prune(&mut state, now, self.window);
        Utilization {
            in_window: state.grants.len() as u32,
            effective_limit: state.effective_limit,
        }
    }

    fn prune(state: &mut DomainState, now: Instant, window: Duration) {
        while let Some(front) = state.grants.front() {
            if now.duration_since(*front) >= window {
                state.grants.pop_front();
            } else {
                break;
            }
        }
    }

    /// Additive recovery after back-off: one slot per elapsed cooldown
    /// period, up to the configured maximum.
    fn step_recovery(&self, state: &mut DomainState, now: Instant) {
        if state.last_throttle.is_none() || state.effective_limit >= self.max_requests {
            return;
        }
        let cooldown = self.window;
        let mut elapsed = now.duration_since(state.last_recovery);
        while elapsed >= cooldown && state.effective_limit < self.max_requests {
            state.effective_limit += 1;
            state.last_recovery += cooldown;
            elapsed = now.duration_since(state.last_recovery);
            debug!(limit = state.effective_limit, "Rate budget recovered one slot");
        }
        if state.effective_limit >= self.max_requests {
            state.last_throttle = None;
        }
    }
}
