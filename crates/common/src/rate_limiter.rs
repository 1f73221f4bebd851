//! Outbound send-rate limiter
//!
//! Hubs drop frames when they are written faster than they can process them.
//! [`SendRateLimiter`] is a fixed-window interval limiter: at most one send is
//! admitted per `1000 / max_rate` milliseconds. It never queues; callers choose
//! between proceeding anyway (LWP3) and backing off once (NXT).
//!
//! The limiter reads `tokio::time::Instant`, so tests can drive it with a
//! paused clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Sentinel for "nothing has been sent yet"
const NEVER: u64 = u64::MAX;

/// Rate limiting result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitResult {
    /// The send may proceed now
    Allowed,
    /// The window is still closed for the given duration
    Wait(Duration),
}

impl RateLimitResult {
    /// Returns true if the send is allowed
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// Returns the wait duration if limited
    pub fn wait_duration(&self) -> Option<Duration> {
        match self {
            Self::Allowed => None,
            Self::Wait(d) => Some(*d),
        }
    }
}

/// Counters describing how often the limiter closed the window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendStats {
    pub allowed: u64,
    pub limited: u64,
}

/// Interval limiter admitting one send per window
#[derive(Debug)]
pub struct SendRateLimiter {
    interval: Duration,
    epoch: Instant,
    /// Microseconds since `epoch` of the last admitted send
    last_sent: AtomicU64,
    allowed: AtomicU64,
    limited: AtomicU64,
}

impl SendRateLimiter {
    /// Create a limiter admitting at most `max_rate` sends per second
    ///
    /// A rate of zero is treated as one send per second.
    pub fn new(max_rate: u32) -> Self {
        let interval = Duration::from_millis(1000 / u64::from(max_rate.max(1)));
        Self::with_interval(interval)
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            epoch: Instant::now(),
            last_sent: AtomicU64::new(NEVER),
            allowed: AtomicU64::new(0),
            limited: AtomicU64::new(0),
        }
    }

    /// Minimum spacing between two admitted sends
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Check the window and record the send if it is open
    pub fn check(&self) -> RateLimitResult {
        let now = self.now_micros();
        let interval = self.interval.as_micros() as u64;

        let mut last = self.last_sent.load(Ordering::Acquire);
        loop {
            if last != NEVER {
                let elapsed = now.saturating_sub(last);
                if elapsed < interval {
                    self.limited.fetch_add(1, Ordering::Relaxed);
                    return RateLimitResult::Wait(Duration::from_micros(interval - elapsed));
                }
            }
            match self.last_sent.compare_exchange_weak(
                last,
                now,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.allowed.fetch_add(1, Ordering::Relaxed);
                    return RateLimitResult::Allowed;
                }
                Err(current) => last = current,
            }
        }
    }

    /// True at most once per window
    pub fn okay_to_send(&self) -> bool {
        self.check().is_allowed()
    }

    /// Sleep once for `backoff` when the window is closed, then proceed
    ///
    /// Returns whether the window was open on the first check.
    pub async fn acquire_with_backoff(&self, backoff: Duration) -> bool {
        if self.okay_to_send() {
            return true;
        }
        tokio::time::sleep(backoff).await;
        // Record the send regardless of the outcome
        self.check();
        false
    }

    pub fn stats(&self) -> SendStats {
        SendStats {
            allowed: self.allowed.load(Ordering::Relaxed),
            limited: self.limited.load(Ordering::Relaxed),
        }
    }

    /// Forget the last send, e.g. after a reconnect
    pub fn reset(&self) {
        self.last_sent.store(NEVER, Ordering::Release);
    }

    fn now_micros(&self) -> u64 {
        Instant::now().duration_since(self.epoch).as_micros() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_from_rate() {
        assert_eq!(SendRateLimiter::new(20).interval(), Duration::from_millis(50));
        assert_eq!(SendRateLimiter::new(40).interval(), Duration::from_millis(25));
        assert_eq!(SendRateLimiter::new(0).interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_rate_limit_result() {
        let allowed = RateLimitResult::Allowed;
        assert!(allowed.is_allowed());
        assert!(allowed.wait_duration().is_none());

        let wait = RateLimitResult::Wait(Duration::from_millis(100));
        assert!(!wait.is_allowed());
        assert_eq!(wait.wait_duration(), Some(Duration::from_millis(100)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_send_always_allowed() {
        let limiter = SendRateLimiter::new(20);
        assert!(limiter.okay_to_send());
        assert!(!limiter.okay_to_send());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_reopens() {
        let limiter = SendRateLimiter::new(20);
        assert!(limiter.okay_to_send());

        tokio::time::advance(Duration::from_millis(30)).await;
        let RateLimitResult::Wait(remaining) = limiter.check() else {
            panic!("window should still be closed");
        };
        assert_eq!(remaining, Duration::from_millis(20));

        tokio::time::advance(Duration::from_millis(20)).await;
        assert!(limiter.okay_to_send());

        let stats = limiter.stats();
        assert_eq!(stats.allowed, 2);
        assert_eq!(stats.limited, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_reopens_immediately() {
        let limiter = SendRateLimiter::new(1);
        assert!(limiter.okay_to_send());
        assert!(!limiter.okay_to_send());
        limiter.reset();
        assert!(limiter.okay_to_send());
    }
}
