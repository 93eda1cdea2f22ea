//! Per-source request pacing.
//!
//! Wraps a governor rate limiter so consecutive requests to one source are
//! spaced by at least the configured delay.

use governor::{Quota, RateLimiter};
use std::time::Duration;

type DefaultRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Spaces requests by a fixed period. A zero delay never waits.
pub struct RequestPacer {
    limiter: Option<DefaultRateLimiter>,
    delay: Duration,
}

impl RequestPacer {
    /// One request per `delay`, no burst.
    pub fn new(delay: Duration) -> Self {
        Self {
            limiter: Quota::with_period(delay).map(RateLimiter::direct),
            delay,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Wait until the next request may be sent.
    pub async fn until_ready(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }
}

impl std::fmt::Debug for RequestPacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPacer").field("delay", &self.delay).finish()
    }
}
