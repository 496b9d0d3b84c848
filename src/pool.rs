//! Core proxy pool implementation.

use crate::config::ProxyPoolConfig;
use crate::proxy::Proxy;
use crate::source::{ProxySource, RouteSource};

use log::{debug, info, warn};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Point-in-time counters of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of candidate proxies.
    pub total: usize,
    /// Number of candidates currently marked failed.
    pub failed: usize,
    /// Number of candidates not marked failed.
    pub working: usize,
}

/// Mutable pool state. Only ever touched while holding `ProxyPool::state`.
#[derive(Default)]
struct PoolState {
    candidates: HashSet<Proxy>,
    failed: HashSet<Proxy>,
    last_used_at: HashMap<Proxy, Instant>,
    last_refresh_at: Option<Instant>,
}

impl PoolState {
    fn usable(&self) -> Vec<&Proxy> {
        self.candidates.difference(&self.failed).collect()
    }

    fn refresh_due(&self, interval: Duration, now: Instant) -> bool {
        if self.candidates.is_empty() {
            return true;
        }
        match self.last_refresh_at {
            None => true,
            Some(at) => now.duration_since(at) > interval,
        }
    }

    /// Replace the candidate set. Failed routes are forgotten.
    fn replace(&mut self, proxies: Vec<String>, now: Instant) {
        self.candidates = proxies.into_iter().map(Proxy::new).collect();
        self.failed.clear();
        self.last_refresh_at = Some(now);
    }

    /// Cooldown filtering, least-recently-used fallback and random pick, in
    /// one step so the returned proxy's timestamp is recorded atomically.
    fn pick(&mut self, cooldown: Duration, lru_fallback: usize, now: Instant) -> Option<Proxy> {
        let usable = self.usable();
        if usable.is_empty() {
            return None;
        }

        let cooled: Vec<&Proxy> = usable
            .iter()
            .copied()
            .filter(|p| match self.last_used_at.get(*p) {
                Some(at) => now.duration_since(*at) >= cooldown,
                None => true,
            })
            .collect();

        let choices = if cooled.is_empty() {
            let mut by_age = usable;
            // Never-used proxies sort first, then oldest use.
            by_age.sort_by_key(|p| self.last_used_at.get(*p).copied());
            by_age.truncate(lru_fallback.max(1));
            debug!("All usable proxies cooling down, falling back to {} least recently used", by_age.len());
            by_age
        } else {
            cooled
        };

        let idx = rand::rng().random_range(0..choices.len());
        let selected = choices[idx].clone();
        self.last_used_at.insert(selected.clone(), now);
        Some(selected)
    }
}

/// A pool of proxies that can be used for outgoing operations.
///
/// The pool is shared between concurrent callers through an `Arc`. All state
/// lives behind one mutex that is never held across an await point; fetching
/// new candidates happens outside of it and only the final swap is locked.
pub struct ProxyPool {
    /// Pool state.
    state: Mutex<PoolState>,
    /// Serialises refreshes so concurrent callers trigger a single fetch.
    refresh_gate: tokio::sync::Mutex<()>,
    /// Where candidates come from.
    source: Arc<dyn RouteSource>,
    /// Configuration for the pool.
    pub config: ProxyPoolConfig,
}

impl ProxyPool {
    /// Create a new proxy pool with the given configuration.
    /// Candidates are collected from the configured origins on first use.
    pub fn new(config: ProxyPoolConfig) -> Arc<Self> {
        let source = Arc::new(ProxySource::from_config(&config));
        Self::with_source(config, source)
    }

    /// Create a pool fed by a custom source.
    pub fn with_source(config: ProxyPoolConfig, source: Arc<dyn RouteSource>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PoolState::default()),
            refresh_gate: tokio::sync::Mutex::new(()),
            source,
            config,
        })
    }

    /// Repopulate the candidates if forced, if the refresh interval elapsed,
    /// or if there are no candidates at all.
    ///
    /// Returns whether a repopulation took place. A collection that yields no
    /// proxies leaves the current state untouched.
    pub async fn refresh(&self, force: bool) -> bool {
        if !force && !self.refresh_due() {
            return false;
        }

        let _gate = self.refresh_gate.lock().await;
        // Another caller may have refreshed while we waited for the gate.
        if !force && !self.refresh_due() {
            return false;
        }

        let proxies = self.source.collect().await;
        if proxies.is_empty() {
            warn!("Proxy refresh yielded no candidates, keeping current pool");
            return false;
        }

        let count = proxies.len();
        self.state.lock().replace(proxies, Instant::now());
        info!("Proxy pool refreshed with {} candidates", count);
        true
    }

    fn refresh_due(&self) -> bool {
        self.state
            .lock()
            .refresh_due(self.config.refresh_interval, Instant::now())
    }

    /// Administrative refresh: forget all failures and repopulate now.
    pub async fn force_refresh(&self) -> bool {
        self.state.lock().failed.clear();
        self.refresh(true).await
    }

    /// Select a proxy for the next attempt.
    ///
    /// Returns `None` when the pool has nothing usable even after a forced
    /// refresh, meaning the caller should proceed without a proxy.
    pub async fn select(&self) -> Option<Proxy> {
        self.refresh(false).await;

        let exhausted = {
            let mut state = self.state.lock();
            let exhausted = state.usable().is_empty();
            if exhausted {
                state.failed.clear();
            }
            exhausted
        };
        if exhausted {
            warn!("Proxy pool exhausted, forcing refresh");
            self.refresh(true).await;
        }

        let selected = self.state.lock().pick(
            self.config.cooldown,
            self.config.lru_fallback,
            Instant::now(),
        );
        match &selected {
            Some(proxy) => debug!("Selected proxy {}", proxy),
            None => warn!("No proxy available, proceeding without one"),
        }
        selected
    }

    /// Report that an attempt through `proxy` failed.
    ///
    /// Unknown proxies (e.g. dropped by a refresh in the meantime) are
    /// ignored. When the failed share exceeds the stale ratio, the next
    /// selection refreshes the whole pool.
    pub fn mark_failed(&self, proxy: &Proxy) {
        let mut state = self.state.lock();
        if !state.candidates.contains(proxy) {
            return;
        }
        if state.failed.insert(proxy.clone()) {
            warn!("Proxy {} marked failed", proxy);
        }

        let threshold = self.config.stale_ratio * state.candidates.len() as f64;
        if state.failed.len() as f64 > threshold && state.last_refresh_at.is_some() {
            info!(
                "{}/{} proxies failed, scheduling refresh",
                state.failed.len(),
                state.candidates.len()
            );
            state.last_refresh_at = None;
        }
    }

    /// Report that an attempt through `proxy` succeeded.
    pub fn mark_succeeded(&self, proxy: &Proxy) {
        self.state.lock().failed.remove(proxy);
    }

    /// Whether `proxy` is a current candidate.
    pub fn contains(&self, proxy: &Proxy) -> bool {
        self.state.lock().candidates.contains(proxy)
    }

    /// Whether `proxy` is currently marked failed.
    pub fn is_failed(&self, proxy: &Proxy) -> bool {
        self.state.lock().failed.contains(proxy)
    }

    /// Get statistics about the proxy pool.
    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        let total = state.candidates.len();
        let failed = state.failed.len();
        PoolStats {
            total,
            failed,
            working: total - failed,
        }
    }

    #[cfg(test)]
    fn check_invariant(&self) -> bool {
        let state = self.state.lock();
        state.failed.is_subset(&state.candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::StaticSource;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Yields a different batch of proxies on every collection.
    struct Batches {
        batches: Vec<Vec<&'static str>>,
        calls: AtomicUsize,
    }

    impl Batches {
        fn new(batches: Vec<Vec<&'static str>>) -> Arc<Self> {
            Arc::new(Self {
                batches,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RouteSource for Batches {
        async fn collect(&self) -> Vec<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let idx = call.min(self.batches.len() - 1);
            self.batches[idx].iter().map(|s| s.to_string()).collect()
        }
    }

    fn config() -> ProxyPoolConfig {
        ProxyPoolConfig::builder().build()
    }

    fn static_pool(proxies: Vec<&str>) -> Arc<ProxyPool> {
        ProxyPool::with_source(config(), Arc::new(StaticSource::new(proxies)))
    }

    #[tokio::test(start_paused = true)]
    async fn first_select_populates_pool() {
        let pool = static_pool(vec!["http://a:1", "http://b:2"]);
        assert_eq!(pool.stats().total, 0);

        let proxy = pool.select().await.unwrap();
        assert!(pool.contains(&proxy));
        assert_eq!(
            pool.stats(),
            PoolStats {
                total: 2,
                failed: 0,
                working: 2
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn select_skips_failed_proxies() {
        let pool = static_pool(vec!["http://a:1", "http://b:2", "http://c:3"]);
        pool.refresh(true).await;
        let bad = Proxy::new("http://b:2");
        pool.mark_failed(&bad);

        for _ in 0..20 {
            let proxy = pool.select().await.unwrap();
            assert_ne!(proxy, bad);
            tokio::time::advance(Duration::from_secs(11)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_spreads_selection() {
        let pool = static_pool(vec!["http://a:1", "http://b:2"]);
        let first = pool.select().await.unwrap();
        let second = pool.select().await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test(start_paused = true)]
    async fn cooled_down_pool_falls_back_to_least_recently_used() {
        let pool = static_pool(vec!["http://a:1", "http://b:2"]);
        pool.select().await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        pool.select().await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;

        // Both in cooldown: still a proxy, never none.
        assert!(pool.select().await.is_some());

        let pool = ProxyPool::with_source(
            ProxyPoolConfig::builder().lru_fallback(1).build(),
            Arc::new(StaticSource::new(vec!["http://a:1", "http://b:2"])),
        );
        let first_used = pool.select().await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        pool.select().await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(pool.select().await.unwrap(), first_used);
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_expires() {
        let pool = static_pool(vec!["http://a:1"]);
        let first = pool.select().await.unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(pool.select().await.unwrap(), first);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_forces_refresh_with_new_candidates() {
        let source = Batches::new(vec![vec!["http://old:1", "http://old:2"], vec!["http://new:1"]]);
        // Keep the stale-ratio refresh out of the way so exhaustion is what triggers it.
        let pool = ProxyPool::with_source(
            ProxyPoolConfig::builder().stale_ratio(1.0).build(),
            source.clone(),
        );
        pool.refresh(false).await;

        pool.mark_failed(&Proxy::new("http://old:1"));
        pool.mark_failed(&Proxy::new("http://old:2"));

        let proxy = pool.select().await.unwrap();
        assert_eq!(proxy, Proxy::new("http://new:1"));
        assert_eq!(source.calls(), 2);
        assert!(pool.check_invariant());
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_reuses_old_candidates_when_source_is_empty() {
        let source = Batches::new(vec![vec!["http://old:1"], vec![]]);
        let pool = ProxyPool::with_source(config(), source);
        pool.refresh(false).await;
        pool.mark_failed(&Proxy::new("http://old:1"));

        assert_eq!(pool.select().await, Some(Proxy::new("http://old:1")));
        assert_eq!(pool.stats().failed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_source_selects_none() {
        let pool = static_pool(vec![]);
        assert_eq!(pool.select().await, None);
        assert_eq!(pool.stats().total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_only_when_due() {
        let source = Batches::new(vec![vec!["http://a:1"]]);
        let pool = ProxyPool::with_source(config(), source.clone());

        assert!(pool.refresh(false).await);
        assert!(!pool.refresh(false).await);
        assert_eq!(source.calls(), 1);

        tokio::time::advance(Duration::from_secs(30 * 60 + 1)).await;
        assert!(pool.refresh(false).await);
        assert_eq!(source.calls(), 2);

        assert!(pool.refresh(true).await);
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_drops_failed_state() {
        let source = Batches::new(vec![vec!["http://a:1", "http://b:2"], vec!["http://b:2", "http://c:3"]]);
        let pool = ProxyPool::with_source(config(), source);
        pool.refresh(true).await;
        pool.mark_failed(&Proxy::new("http://a:1"));
        assert_eq!(pool.stats().failed, 1);

        pool.refresh(true).await;
        assert!(!pool.contains(&Proxy::new("http://a:1")));
        assert_eq!(pool.stats().failed, 0);

        pool.mark_failed(&Proxy::new("http://a:1"));
        assert_eq!(pool.stats().failed, 0);
        assert!(pool.check_invariant());
    }

    #[tokio::test(start_paused = true)]
    async fn high_failure_ratio_schedules_refresh() {
        let source = Batches::new(vec![vec!["http://a:1", "http://b:2", "http://c:3", "http://d:4"]]);
        let pool = ProxyPool::with_source(config(), source.clone());
        pool.refresh(true).await;

        pool.mark_failed(&Proxy::new("http://a:1"));
        pool.mark_failed(&Proxy::new("http://b:2"));
        assert!(!pool.refresh_due());
        // 3/4 = 0.75 > 0.7
        pool.mark_failed(&Proxy::new("http://c:3"));
        assert!(pool.refresh_due());

        pool.select().await.unwrap();
        assert_eq!(source.calls(), 2);
        assert_eq!(pool.stats().failed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn force_refresh_clears_failures() {
        let pool = static_pool(vec!["http://a:1", "http://b:2"]);
        pool.refresh(true).await;
        pool.mark_failed(&Proxy::new("http://a:1"));

        assert!(pool.force_refresh().await);
        assert_eq!(pool.stats().failed, 0);
        assert!(!pool.is_failed(&Proxy::new("http://a:1")));
    }

    #[tokio::test(start_paused = true)]
    async fn success_clears_failure_mark() {
        let pool = static_pool(vec!["http://a:1", "http://b:2"]);
        pool.refresh(true).await;
        let proxy = Proxy::new("http://a:1");
        pool.mark_failed(&proxy);
        pool.mark_succeeded(&proxy);
        assert!(!pool.is_failed(&proxy));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_use_keeps_failed_within_candidates() {
        let proxies: Vec<String> = (0..10).map(|i| format!("http://10.0.0.{i}:80")).collect();
        let pool = ProxyPool::with_source(
            ProxyPoolConfig::builder().cooldown(Duration::ZERO).build(),
            Arc::new(StaticSource::new(proxies)),
        );

        let mut handles = Vec::new();
        for task in 0..8 {
            let pool = Arc::clone(&pool);
            handles.push(tokio::spawn(async move {
                for i in 0..50 {
                    if let Some(proxy) = pool.select().await {
                        if (task + i) % 3 == 0 {
                            pool.mark_failed(&proxy);
                        }
                    }
                    if i % 17 == 0 {
                        pool.refresh(true).await;
                    }
                    assert!(pool.check_invariant());
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(pool.check_invariant());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_selects_share_one_refresh() {
        let source = Batches::new(vec![vec!["http://a:1", "http://b:2", "http://c:3"]]);
        let pool = ProxyPool::with_source(config(), source.clone());

        let (a, b, c) = tokio::join!(pool.select(), pool.select(), pool.select());
        assert_eq!(source.calls(), 1);

        let picked: HashSet<_> = [a, b, c].into_iter().flatten().collect();
        assert_eq!(picked.len(), 3);
    }
}
