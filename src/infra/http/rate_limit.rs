use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::util::lock::mutex_lock;

const SOURCE: &str = "infra::http::rate_limit";
/// Buckets kept before expired windows are swept.
const SWEEP_THRESHOLD: usize = 4096;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Limited { retry_after_secs: u64 },
}

/// Fixed-window request counter keyed by client.
#[derive(Debug, Clone)]
pub struct ApiRateLimiter {
    window: Duration,
    max_requests: u32,
    buckets: Arc<DashMap<String, Window>>,
    last_sweep: Arc<Mutex<Instant>>,
}

impl ApiRateLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
            buckets: Arc::new(DashMap::new()),
            last_sweep: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn check(&self, client: &str) -> RateDecision {
        self.check_at(client, Instant::now())
    }

    fn check_at(&self, client: &str, now: Instant) -> RateDecision {
        self.sweep_expired(now);

        let mut bucket = self.buckets.entry(client.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        let elapsed = now.duration_since(bucket.started);
        if elapsed >= self.window {
            *bucket = Window {
                started: now,
                count: 0,
            };
        }

        if bucket.count >= self.max_requests {
            let left = self.window.saturating_sub(now.duration_since(bucket.started));
            // Round up so clients never retry a moment too early.
            let retry_after_secs = left.as_secs() + u64::from(left.subsec_nanos() > 0);
            return RateDecision::Limited {
                retry_after_secs: retry_after_secs.max(1),
            };
        }

        bucket.count += 1;
        RateDecision::Allowed {
            remaining: self.max_requests - bucket.count,
        }
    }

    pub fn limit(&self) -> u32 {
        self.max_requests
    }

    /// Drop expired windows once the map is large, at most once per window.
    fn sweep_expired(&self, now: Instant) {
        if self.buckets.len() <= SWEEP_THRESHOLD {
            return;
        }
        {
            let mut last_sweep = mutex_lock(&self.last_sweep, SOURCE, "sweep_expired");
            if now.duration_since(*last_sweep) < self.window {
                return;
            }
            *last_sweep = now;
        }
        let window = self.window;
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.started) < window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_each_client_within_a_window() {
        let limiter = ApiRateLimiter::new(Duration::from_secs(60), 2);
        let start = Instant::now();

        assert_eq!(
            limiter.check_at("a", start),
            RateDecision::Allowed { remaining: 1 }
        );
        assert_eq!(
            limiter.check_at("a", start + Duration::from_secs(1)),
            RateDecision::Allowed { remaining: 0 }
        );
        assert_eq!(
            limiter.check_at("a", start + Duration::from_millis(30_500)),
            RateDecision::Limited {
                retry_after_secs: 30
            }
        );
        assert_eq!(
            limiter.check_at("b", start + Duration::from_secs(2)),
            RateDecision::Allowed { remaining: 1 }
        );
    }

    #[test]
    fn large_maps_are_swept_once_per_window() {
        let limiter = ApiRateLimiter::new(Duration::from_secs(10), 1);
        let start = Instant::now();
        for client in 0..=SWEEP_THRESHOLD {
            limiter.check_at(&format!("10.0.{}.{}", client / 256, client % 256), start);
        }

        limiter.check_at("late", start + Duration::from_secs(5));
        assert_eq!(limiter.buckets.len(), SWEEP_THRESHOLD + 2);

        limiter.check_at("later", start + Duration::from_secs(11));
        assert_eq!(limiter.buckets.len(), 2);
        assert!(limiter.buckets.contains_key("late"));
    }

    #[test]
    fn window_resets_after_expiry() {
        let limiter = ApiRateLimiter::new(Duration::from_secs(10), 1);
        let start = Instant::now();

        assert!(matches!(
            limiter.check_at("a", start),
            RateDecision::Allowed { .. }
        ));
        assert!(matches!(
            limiter.check_at("a", start + Duration::from_secs(9)),
            RateDecision::Limited { .. }
        ));
        assert_eq!(
            limiter.check_at("a", start + Duration::from_secs(10)),
            RateDecision::Allowed { remaining: 0 }
        );
    }
}
