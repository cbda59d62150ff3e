// TTL-bounded rule cache
//
// Double-checked refresh under an async RwLock: concurrent misses take the
// read lock, see staleness, and only the first writer refetches. On rule
// store failure the cache serves whatever it last saw; with nothing cached it
// degrades to the built-in default rule set instead of stalling triage.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, warn};

use sentinela_core::rule::{default_rules, EligibilityRule};
use sentinela_core::RuleSource;

struct CacheState {
    rules: Vec<EligibilityRule>,
    fetched_at: Option<Instant>,
}

/// In-process cache over the rule store
pub struct RuleCache {
    source: Arc<dyn RuleSource>,
    ttl: Duration,
    state: RwLock<CacheState>,
}

impl RuleCache {
    pub fn new(source: Arc<dyn RuleSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            state: RwLock::new(CacheState {
                rules: Vec::new(),
                fetched_at: None,
            }),
        }
    }

    /// Current rules, refreshed from the store when the TTL has lapsed
    ///
    /// Never fails: on store failure this serves stale rules when present,
    /// otherwise the built-in defaults.
    pub async fn rules(&self) -> Vec<EligibilityRule> {
        {
            let state = self.state.read().await;
            if Self::is_fresh(&state, self.ttl) {
                return state.rules.clone();
            }
        }

        let mut state = self.state.write().await;
        // Re-check after acquiring the write lock: another task may have
        // refreshed while we waited.
        if Self::is_fresh(&state, self.ttl) {
            return state.rules.clone();
        }

        match self.source.list_active_rules().await {
            Ok(rules) => {
                debug!(count = rules.len(), "rule cache refreshed");
                state.rules = rules;
                state.fetched_at = Some(Instant::now());
                state.rules.clone()
            }
            Err(err) if !state.rules.is_empty() => {
                warn!(%err, "rule store unavailable, serving stale rules");
                state.rules.clone()
            }
            Err(err) => {
                warn!(%err, "rule store unavailable and cache empty, using default rules");
                default_rules()
            }
        }
    }

    /// Force the next read to refetch from the store
    pub async fn invalidate(&self) {
        let mut state = self.state.write().await;
        state.fetched_at = None;
        debug!("rule cache invalidated");
    }

    fn is_fresh(state: &CacheState, ttl: Duration) -> bool {
        state
            .fetched_at
            .is_some_and(|at| at.elapsed() < ttl && !state.rules.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sentinela_core::StoreError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    impl CountingSource {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl RuleSource for CountingSource {
        async fn list_active_rules(&self) -> Result<Vec<EligibilityRule>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(StoreError::database("connection refused"));
            }
            Ok(default_rules())
        }
    }

    #[tokio::test]
    async fn test_second_read_hits_cache() {
        let source = Arc::new(CountingSource::new());
        let cache = RuleCache::new(source.clone(), Duration::from_secs(300));

        assert_eq!(cache.rules().await.len(), 3);
        assert_eq!(cache.rules().await.len(), 3);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let source = Arc::new(CountingSource::new());
        let cache = RuleCache::new(source.clone(), Duration::from_secs(300));

        cache.rules().await;
        cache.invalidate().await;
        cache.rules().await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_expired_ttl_refetches() {
        let source = Arc::new(CountingSource::new());
        let cache = RuleCache::new(source.clone(), Duration::ZERO);

        cache.rules().await;
        cache.rules().await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_store_failure_serves_stale() {
        let source = Arc::new(CountingSource::new());
        let cache = RuleCache::new(source.clone(), Duration::ZERO);

        let fresh = cache.rules().await;
        source.fail.store(true, Ordering::SeqCst);
        let stale = cache.rules().await;
        assert_eq!(stale.len(), fresh.len());
    }

    #[tokio::test]
    async fn test_store_failure_with_empty_cache_uses_defaults() {
        let source = Arc::new(CountingSource::new());
        source.fail.store(true, Ordering::SeqCst);
        let cache = RuleCache::new(source, Duration::from_secs(300));

        let rules = cache.rules().await;
        assert_eq!(rules.len(), 3);
        assert!(rules.iter().any(|r| r.tipo == "idade_maxima"));
    }

    #[tokio::test]
    async fn test_concurrent_misses_fetch_once() {
        let source = Arc::new(CountingSource::new());
        let cache = Arc::new(RuleCache::new(source.clone(), Duration::from_secs(300)));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.rules().await }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }
}
