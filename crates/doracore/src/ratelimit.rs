//! Per-user rate limiter, consulted by the request pipeline before it
//! claims a download slot — independent of the four stage semaphores
//! (§4.F). Ungated here: every user gets the same cooldown window.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

#[derive(Clone)]
pub struct RateLimiter {
    limits: Arc<Mutex<HashMap<i64, Instant>>>,
    cooldown: Duration,
}

impl RateLimiter {
    pub fn new(cooldown: Duration) -> Self {
        Self { limits: Arc::new(Mutex::new(HashMap::new())), cooldown }
    }

    /// True if `user_id` issued a request within the cooldown window.
    pub async fn is_rate_limited(&self, user_id: i64) -> bool {
        let limits = self.limits.lock().await;
        matches!(limits.get(&user_id), Some(&unlock_at) if Instant::now() < unlock_at)
    }

    pub async fn remaining(&self, user_id: i64) -> Option<Duration> {
        let limits = self.limits.lock().await;
        let unlock_at = *limits.get(&user_id)?;
        let now = Instant::now();
        (now < unlock_at).then(|| unlock_at - now)
    }

    /// Start a fresh cooldown for `user_id`. Call once a request has
    /// actually been accepted, not on every arrival.
    pub async fn record(&self, user_id: i64) {
        let mut limits = self.limits.lock().await;
        limits.insert(user_id, Instant::now() + self.cooldown);
    }

    pub async fn reset(&self, user_id: i64) {
        self.limits.lock().await.remove(&user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn a_fresh_user_is_never_limited() {
        let limiter = RateLimiter::new(Duration::from_secs(10));
        assert!(!limiter.is_rate_limited(1).await);
    }

    #[tokio::test(start_paused = true)]
    async fn recording_starts_a_cooldown_that_expires() {
        let limiter = RateLimiter::new(Duration::from_secs(10));
        limiter.record(1).await;
        assert!(limiter.is_rate_limited(1).await);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(!limiter.is_rate_limited(1).await);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_clears_an_active_cooldown() {
        let limiter = RateLimiter::new(Duration::from_secs(10));
        limiter.record(1).await;
        limiter.reset(1).await;
        assert!(!limiter.is_rate_limited(1).await);
    }
}
