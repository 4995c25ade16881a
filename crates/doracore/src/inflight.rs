//! In-flight request deduplication (§4.E / PendingDownload in §3): concurrent
//! requests for the same canonical URL join a single leader's work instead
//! of re-downloading.
//!
//! Followers `.clone()` the leader's `Shared` future and may apply their own
//! deadline around the `.await` without cancelling the leader (the
//! cancellation-shield pattern of §4.G/§9) — dropping a follower's clone just
//! drops that follower's waker, the underlying task keeps running to
//! completion for whoever else is waiting.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::{FutureExt, Shared};
use futures_util::Future;
use tokio::sync::Mutex;

use crate::error::EngineError;
use crate::types::FetchOutcome;

type FetchResult = Result<FetchOutcome, Arc<EngineError>>;
type FetchFuture = Shared<std::pin::Pin<Box<dyn Future<Output = FetchResult> + Send>>>;

/// Tracks at most one in-flight `Shared` future per canonical URL (invariant
/// 1 of §8: the map never holds two entries for the same key).
#[derive(Default)]
pub struct InflightRegistry {
    entries: Mutex<HashMap<String, FetchFuture>>,
}

/// Either this caller became the leader for `key` and must drive the fetch
/// to completion (calling [`InflightRegistry::register_leader`] once it
/// starts), or it joined an existing leader's future as a follower.
pub enum Lease {
    Leader,
    Follower { future: FetchFuture },
}

impl InflightRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Atomically check the map for `key`; install nothing yet (the caller
    /// registers its own work via `register_leader` once it has actually
    /// started, so the mutex is only ever held around a plain read/insert,
    /// never across an await of the work itself).
    pub async fn join_or_lead(&self, key: &str) -> Lease {
        let entries = self.entries.lock().await;
        match entries.get(key) {
            Some(future) => Lease::Follower { future: future.clone() },
            None => Lease::Leader,
        }
    }

    /// Register the leader's future so followers arriving after `join_or_lead`
    /// returned `Leader` can find and join it. The future is removed from the
    /// map the instant it resolves, successfully or not — invariant 2 of §8
    /// (every promise is eventually resolved) holds because `work` itself is
    /// an ordinary future with no cancellation hook into this registry.
    pub async fn register_leader<F>(self: &Arc<Self>, key: String, work: F) -> FetchFuture
    where
        F: Future<Output = Result<FetchOutcome, EngineError>> + Send + 'static,
    {
        let boxed: std::pin::Pin<Box<dyn Future<Output = FetchResult> + Send>> =
            Box::pin(async move { work.await.map_err(Arc::new) });
        let shared = boxed.shared();

        let mut entries = self.entries.lock().await;
        entries.insert(key.clone(), shared.clone());
        drop(entries);

        let registry = self.clone();
        let cleanup_future = shared.clone();
        tokio::spawn(async move {
            cleanup_future.await;
            let mut entries = registry.entries.lock().await;
            entries.remove(&key);
        });

        shared
    }

    pub async fn in_flight_count(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::types::MediaKind;

    fn dummy_outcome() -> FetchOutcome {
        FetchOutcome { transport_ids: vec!["fid".to_string()], media_kind: MediaKind::Video }
    }

    #[tokio::test]
    async fn second_caller_joins_first_as_follower() {
        let registry = InflightRegistry::new();

        let lease1 = registry.join_or_lead("k").await;
        assert!(matches!(lease1, Lease::Leader));

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let shared = registry
            .register_leader("k".to_string(), async move {
                rx.await.ok();
                Ok(dummy_outcome())
            })
            .await;

        let lease2 = registry.join_or_lead("k").await;
        assert!(matches!(lease2, Lease::Follower { .. }));
        assert_eq!(registry.in_flight_count().await, 1);

        tx.send(()).unwrap();
        let result = shared.await;
        assert!(result.is_ok());

        // the cleanup task removes the entry once the leader finishes
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(registry.in_flight_count().await, 0);
    }

    #[tokio::test]
    async fn distinct_keys_never_collide() {
        let registry = InflightRegistry::new();
        assert!(matches!(registry.join_or_lead("a").await, Lease::Leader));
        assert!(matches!(registry.join_or_lead("b").await, Lease::Leader));
    }

    #[tokio::test]
    async fn follower_timeout_does_not_cancel_the_leader() {
        let registry = InflightRegistry::new();
        assert!(matches!(registry.join_or_lead("k").await, Lease::Leader));

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let shared = registry
            .register_leader("k".to_string(), async move {
                rx.await.ok();
                Ok(dummy_outcome())
            })
            .await;

        // A follower applies its own short deadline; timing out must not
        // abort the leader's work, only the follower's own wait.
        let follower_wait = tokio::time::timeout(std::time::Duration::from_millis(10), shared.clone()).await;
        assert!(follower_wait.is_err());

        tx.send(()).unwrap();
        let result = shared.await;
        assert!(result.is_ok());
    }
}
