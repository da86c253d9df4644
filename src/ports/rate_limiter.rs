//! RateLimiter port - per-user inbound event throttling.

use async_trait::async_trait;
use std::time::Duration;

/// Outcome of a rate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Limited { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed)
    }
}

/// Port for inbound event rate limiting, keyed by an opaque string
/// (typically the user id).
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Records one event against the key and decides whether it may proceed.
    async fn check(&self, key: &str) -> RateDecision;
}
