//! Key cache with periodic background refresh.
//!
//! Readers call [`KeyCache::current`] on the hot path; it is a lock-free load
//! of an `Arc` and never touches the network. A background task re-resolves
//! on a fixed interval and swaps the whole set in on success. A failed
//! refresh is logged and the previous set stays in force.
//!
//! ```text
//! refresh tick ──► resolver.resolve() ──ok──► ArcSwap::store(new set)
//!                                    └─err──► warn!, keep old set
//! authorize() ──► ArcSwap::load_full() ──► Arc<VerificationKeySet>
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::keys::{KeyResolver, ResolutionError, VerificationKeySet};

/// Default interval between background refreshes.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Holds the current [`VerificationKeySet`] and refreshes it from a resolver.
pub struct KeyCache {
    current: ArcSwap<VerificationKeySet>,
    resolver: Arc<dyn KeyResolver>,
    refresh_interval: Duration,
    refreshes: AtomicU64,
    refresh_failures: AtomicU64,
}

impl KeyCache {
    /// Create a cache holding the empty set. Nothing is resolved yet.
    #[must_use]
    pub fn new(resolver: Arc<dyn KeyResolver>, refresh_interval: Duration) -> Self {
        Self {
            current: ArcSwap::from_pointee(VerificationKeySet::empty()),
            resolver,
            refresh_interval,
            refreshes: AtomicU64::new(0),
            refresh_failures: AtomicU64::new(0),
        }
    }

    /// The key set currently in force. Never blocks on I/O.
    #[must_use]
    pub fn current(&self) -> Arc<VerificationKeySet> {
        self.current.load_full()
    }

    /// Resolve once and, on success, replace the current set.
    ///
    /// On failure the previous set is retained and the error is returned to
    /// the caller of this method only; readers are never affected.
    pub async fn refresh_now(&self) -> Result<(), ResolutionError> {
        match self.resolver.resolve().await {
            Ok(set) => {
                let ids = set.key_ids().join(",");
                self.current.store(Arc::new(set));
                self.refreshes.fetch_add(1, Ordering::Relaxed);
                debug!(source = %self.resolver.describe(), key_ids = %ids, "Verification keys refreshed");
                Ok(())
            }
            Err(e) => {
                self.refresh_failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Initial resolve performed while the server is initializing.
    ///
    /// Fatal sources propagate the error; the others log it and leave the
    /// cache empty so every token fails verification until a refresh succeeds.
    pub async fn prime(&self) -> Result<(), ResolutionError> {
        match self.refresh_now().await {
            Ok(()) => {
                let current = self.current();
                info!(
                    source = %self.resolver.describe(),
                    keys = current.len(),
                    key_ids = %current.key_ids().join(","),
                    "Verification keys loaded"
                );
                Ok(())
            }
            Err(e) if self.resolver.fatal_on_startup_failure() => Err(e),
            Err(e) => {
                tracing::error!(
                    source = %self.resolver.describe(),
                    error = %e,
                    "Initial key resolution failed; rejecting all tokens until a refresh succeeds"
                );
                Ok(())
            }
        }
    }

    /// Spawn the background refresh loop; it exits when `cancel` fires.
    pub fn spawn_refresh(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(cache.refresh_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; priming already resolved once.
            interval.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!("Key refresh task stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = cache.refresh_now().await {
                            warn!(
                                source = %cache.resolver.describe(),
                                error = %e,
                                "Key refresh failed; keeping previous key set"
                            );
                        }
                    }
                }
            }
        })
    }

    /// Refresh interval.
    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    /// Number of successful resolves so far.
    #[must_use]
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    /// Number of failed resolves so far.
    #[must_use]
    pub fn refresh_failure_count(&self) -> u64 {
        self.refresh_failures.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use jsonwebtoken::DecodingKey;

    use super::*;
    use crate::auth::keys::{KeyFamily, VerificationKey};

    /// Resolver that replays a scripted sequence of outcomes.
    struct Script {
        outcomes: std::sync::Mutex<VecDeque<Result<Vec<&'static str>, ()>>>,
        fatal: bool,
    }

    fn key(id: &str) -> VerificationKey {
        VerificationKey {
            key_id: id.to_string(),
            family: KeyFamily::Rsa,
            decoding_key: DecodingKey::from_rsa_pem(include_bytes!(
                "../../tests/fixtures/k1.pem"
            ))
            .unwrap(),
        }
    }

    #[async_trait]
    impl KeyResolver for Script {
        async fn resolve(&self) -> Result<VerificationKeySet, ResolutionError> {
            let next = self.outcomes.lock().unwrap().pop_front();
            match next {
                Some(Ok(ids)) => VerificationKeySet::from_keys(ids.into_iter().map(key)),
                _ => Err(ResolutionError::MissingKeyId("scripted".to_string())),
            }
        }

        fn describe(&self) -> String {
            "script".to_string()
        }

        fn fatal_on_startup_failure(&self) -> bool {
            self.fatal
        }
    }

    fn cache(outcomes: Vec<Result<Vec<&'static str>, ()>>, fatal: bool) -> KeyCache {
        KeyCache::new(
            Arc::new(Script {
                outcomes: std::sync::Mutex::new(outcomes.into()),
                fatal,
            }),
            Duration::from_millis(20),
        )
    }

    #[tokio::test]
    async fn starts_empty() {
        let cache = cache(vec![], false);
        assert!(cache.current().is_empty());
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_set() {
        let cache = cache(vec![Ok(vec!["k1"]), Err(())], false);
        cache.refresh_now().await.unwrap();
        let before = cache.current();

        assert!(cache.refresh_now().await.is_err());

        let after = cache.current();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(after.key_ids(), vec!["k1"]);
        assert_eq!(cache.refresh_count(), 1);
        assert_eq!(cache.refresh_failure_count(), 1);
    }

    #[tokio::test]
    async fn successful_refresh_replaces_set_wholesale() {
        let cache = cache(vec![Ok(vec!["k1", "k2"]), Ok(vec!["k3"])], false);
        cache.refresh_now().await.unwrap();
        cache.refresh_now().await.unwrap();

        let current = cache.current();
        assert_eq!(current.key_ids(), vec!["k3"]);
        assert!(current.get("k1").is_none());
    }

    #[tokio::test]
    async fn prime_is_fatal_only_for_fatal_sources() {
        let fatal = cache(vec![Err(())], true);
        assert!(fatal.prime().await.is_err());

        let lenient = cache(vec![Err(())], false);
        assert!(lenient.prime().await.is_ok());
        assert!(lenient.current().is_empty());
    }

    #[tokio::test]
    async fn background_refresh_picks_up_new_keys_and_stops_on_cancel() {
        let cache = Arc::new(cache(vec![Ok(vec!["k1"]), Err(()), Ok(vec!["k2"])], false));
        cache.prime().await.unwrap();

        let cancel = CancellationToken::new();
        let handle = cache.spawn_refresh(cancel.clone());

        tokio::time::timeout(Duration::from_secs(2), async {
            while cache.current().get("k2").is_none() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("refresh never applied the new key set");

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(cache.current().key_ids(), vec!["k2"]);
        assert!(cache.refresh_failure_count() >= 1);
    }
}
