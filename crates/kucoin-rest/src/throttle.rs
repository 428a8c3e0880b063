//! Minimum-interval request throttle
//!
//! Every REST call made through one throttle is spaced at least
//! `min_interval` apart. Callers reserve the next free slot under a short
//! lock and sleep outside it, so concurrent callers queue in arrival order.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::trace;

/// Default spacing between REST requests
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug)]
pub struct RequestThrottle {
    min_interval: Duration,
    /// Earliest instant the next request may start
    next_slot: Mutex<Option<Instant>>,
}

impl Default for RequestThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_INTERVAL)
    }
}

impl RequestThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Throttle that never waits (tests, private gateways)
    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Reserve a slot without waiting; returns how long the caller must wait
    pub fn reserve(&self) -> Duration {
        let now = Instant::now();
        let mut next = self.next_slot.lock();
        let slot = match *next {
            Some(at) if at > now => at,
            _ => now,
        };
        *next = Some(slot + self.min_interval);
        slot - now
    }

    /// Wait until this caller's slot arrives
    pub async fn acquire(&self) {
        let wait = self.reserve();
        if !wait.is_zero() {
            trace!(?wait, "REST throttle delaying request");
            tokio::time::sleep(wait).await;
        }
    }
}

/// Throttle shared by every client of one exchange account
pub type SharedThrottle = Arc<RequestThrottle>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_request_is_immediate() {
        let throttle = RequestThrottle::new(Duration::from_millis(250));
        assert_eq!(throttle.reserve(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_to_back_requests_are_spaced() {
        let throttle = RequestThrottle::new(Duration::from_millis(250));
        assert_eq!(throttle.reserve(), Duration::ZERO);
        assert_eq!(throttle.reserve(), Duration::from_millis(250));
        assert_eq!(throttle.reserve(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_sleeps_until_slot() {
        let throttle = RequestThrottle::new(Duration::from_millis(250));
        let start = Instant::now();
        throttle.acquire().await;
        throttle.acquire().await;
        throttle.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_time_resets_spacing() {
        let throttle = RequestThrottle::new(Duration::from_millis(250));
        throttle.acquire().await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(throttle.reserve(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlimited() {
        let throttle = RequestThrottle::unlimited();
        for _ in 0..10 {
            assert_eq!(throttle.reserve(), Duration::ZERO);
        }
    }
}
