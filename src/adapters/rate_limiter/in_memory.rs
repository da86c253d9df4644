//! In-memory fixed-window rate limiter.
//!
//! Good enough for a single-process deployment: windows live in a mutexed
//! map keyed by user id and are pruned opportunistically as they roll over.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::ports::{RateDecision, RateLimiter};

/// Limits for one window.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Events allowed per window.
    pub max_events: u32,
    /// Window length.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_events: 120,
            window: Duration::from_secs(10),
        }
    }
}

struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window limiter over a mutexed map.
pub struct InMemoryRateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<String, Window>>,
}

impl InMemoryRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryRateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn check(&self, key: &str) -> RateDecision {
        let now = Instant::now();
        let mut windows = self.windows.lock().expect("rate limiter lock poisoned");

        let window = windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.duration_since(window.started) >= self.config.window {
            window.started = now;
            window.count = 0;
        }

        if window.count >= self.config.max_events {
            let retry_after = self
                .config
                .window
                .saturating_sub(now.duration_since(window.started));
            return RateDecision::Limited { retry_after };
        }

        window.count += 1;
        RateDecision::Allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max: u32, window_ms: u64) -> InMemoryRateLimiter {
        InMemoryRateLimiter::new(RateLimitConfig {
            max_events: max,
            window: Duration::from_millis(window_ms),
        })
    }

    #[tokio::test]
    async fn allows_up_to_limit_then_rejects() {
        let limiter = limiter(3, 60_000);
        for _ in 0..3 {
            assert!(limiter.check("alice").await.is_allowed());
        }
        assert!(!limiter.check("alice").await.is_allowed());
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let limiter = limiter(1, 60_000);
        assert!(limiter.check("alice").await.is_allowed());
        assert!(limiter.check("bob").await.is_allowed());
        assert!(!limiter.check("alice").await.is_allowed());
    }

    #[tokio::test]
    async fn window_rollover_resets_the_count() {
        let limiter = limiter(1, 20);
        assert!(limiter.check("alice").await.is_allowed());
        assert!(!limiter.check("alice").await.is_allowed());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(limiter.check("alice").await.is_allowed());
    }
}
