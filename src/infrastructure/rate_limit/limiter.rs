//! Fixed-window limiter over a shared counter backend

use super::storage::CounterStore;
use super::types::{current_time_secs, window_bucket, RateCheck};
use crate::domain::errors::ApiError;
use std::sync::Arc;
use tracing::{debug, warn};

/// Enforces "at most N operations per window" for an extracted identity.
///
/// The counter key encodes the identity, the window length, and the current
/// bucket, so one limiter instance can serve any combination of limits, and
/// every process sharing the backend shares the quota.
#[derive(Clone)]
pub struct WindowLimiter {
    store: Arc<dyn CounterStore>,
    key_prefix: String,
}

impl WindowLimiter {
    pub fn new(store: Arc<dyn CounterStore>, key_prefix: &str) -> Self {
        Self {
            store,
            key_prefix: key_prefix.to_string(),
        }
    }

    /// Consume one operation from `identity`'s quota and report whether the
    /// identity is now over `limit` for the current window.
    ///
    /// A counter-backend failure allows the request and logs a warning: an
    /// unreachable counting service must not take the API down with it.
    pub async fn check(&self, identity: &str, limit: u32, window_secs: u64) -> RateCheck {
        let bucket = window_bucket(current_time_secs(), window_secs);
        let key = format!(
            "{}:{}:{}:{}",
            self.key_prefix, identity, window_secs, bucket
        );

        // TTL of two windows keeps the previous bucket around briefly while
        // clock-skewed processes catch up.
        match self.store.incr(&key, window_secs.saturating_mul(2)).await {
            Ok(count) => RateCheck {
                over: count > u64::from(limit),
                count,
                limit,
            },
            Err(e) => {
                warn!(identity, "rate limit counter unavailable, allowing: {}", e);
                RateCheck {
                    over: false,
                    count: 0,
                    limit,
                }
            }
        }
    }

    /// [`check`](Self::check), mapped to the client-visible rate limit error
    /// when the quota is exhausted.
    pub async fn enforce(
        &self,
        identity: &str,
        limit: u32,
        window_secs: u64,
    ) -> Result<(), ApiError> {
        let check = self.check(identity, limit, window_secs).await;
        if check.over {
            debug!(
                identity,
                limit,
                window_secs,
                count = check.count,
                "rate limit exceeded"
            );
            return Err(ApiError::RateLimited { limit, window_secs });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::rate_limit::InMemoryCounterStore;

    fn limiter() -> WindowLimiter {
        WindowLimiter::new(Arc::new(InMemoryCounterStore::new()), "ratelimit")
    }

    #[tokio::test]
    async fn allows_up_to_limit_then_rejects() {
        let limiter = limiter();

        for _ in 0..3 {
            assert!(limiter.enforce("team-42", 3, 60).await.is_ok());
        }

        let err = limiter.enforce("team-42", 3, 60).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Rate limit exceeded. Limit is 3 per 60 seconds"
        );
    }

    #[tokio::test]
    async fn identities_have_independent_quotas() {
        let limiter = limiter();

        assert!(limiter.enforce("team-a", 1, 60).await.is_ok());
        assert!(limiter.enforce("team-a", 1, 60).await.is_err());
        assert!(limiter.enforce("team-b", 1, 60).await.is_ok());
    }

    #[tokio::test]
    async fn window_lengths_have_independent_counters() {
        let limiter = limiter();

        assert!(limiter.enforce("team-a", 1, 60).await.is_ok());
        // Same identity, different window length: separate bucket key.
        assert!(limiter.enforce("team-a", 1, 3600).await.is_ok());
    }

    #[tokio::test]
    async fn zero_limit_rejects_immediately() {
        let limiter = limiter();
        let check = limiter.check("team-z", 0, 60).await;
        assert!(check.over);
        assert_eq!(check.count, 1);
    }

    struct FailingStore;

    #[async_trait::async_trait]
    impl CounterStore for FailingStore {
        async fn incr(&self, _key: &str, _ttl_secs: u64) -> Result<u64, String> {
            Err("connection refused".to_string())
        }

        async fn cleanup(&self) {}
    }

    #[tokio::test]
    async fn counter_backend_failure_fails_open() {
        let limiter = WindowLimiter::new(Arc::new(FailingStore), "ratelimit");
        assert!(limiter.enforce("team-42", 1, 60).await.is_ok());
        assert!(limiter.enforce("team-42", 1, 60).await.is_ok());
    }
}
