//! Provider health cache with TTL refresh
//!
//! Unknown providers count as healthy. A provider marked unhealthy scores
//! zero availability until a refresh restores it, then regains full
//! availability linearly over the decay window.

use std::future::Future;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy)]
struct HealthEntry {
    healthy: bool,
    checked_at: Instant,
    last_failure: Option<Instant>,
}

/// Shared provider health state
#[derive(Debug)]
pub struct HealthCache {
    entries: DashMap<String, HealthEntry>,
    /// How long a refresh stays fresh
    ttl: Duration,
    /// When the last full refresh ran; also serializes refreshes
    last_refresh: Mutex<Option<Instant>>,
}

impl HealthCache {
    /// Create an empty cache whose refreshes stay fresh for `ttl`
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            last_refresh: Mutex::new(None),
        }
    }

    /// Whether a provider is currently considered healthy
    pub fn is_healthy(&self, name: &str) -> bool {
        self.entries.get(name).is_none_or(|e| e.healthy)
    }

    /// Mark a provider unhealthy after a failure
    pub fn mark_unhealthy(&self, name: &str) {
        self.mark_unhealthy_at(name, Instant::now());
    }

    fn mark_unhealthy_at(&self, name: &str, at: Instant) {
        tracing::warn!(provider = %name, "marking provider unhealthy");
        self.entries.insert(
            name.to_owned(),
            HealthEntry {
                healthy: false,
                checked_at: at,
                last_failure: Some(at),
            },
        );
    }

    /// Record a probe result
    pub fn record(&self, name: &str, healthy: bool) {
        let now = Instant::now();
        let mut entry = self.entries.entry(name.to_owned()).or_insert(HealthEntry {
            healthy,
            checked_at: now,
            last_failure: None,
        });
        if !healthy {
            entry.last_failure = Some(now);
        }
        entry.healthy = healthy;
        entry.checked_at = now;
    }

    /// When a provider was last checked or marked
    pub fn checked_at(&self, name: &str) -> Option<Instant> {
        self.entries.get(name).map(|e| e.checked_at)
    }

    /// Availability sub-score between 0 and 1
    pub fn availability(&self, name: &str, decay: Duration) -> f64 {
        let Some(entry) = self.entries.get(name) else {
            return 1.0;
        };
        if !entry.healthy {
            return 0.0;
        }
        match entry.last_failure {
            Some(failed_at) if !decay.is_zero() && failed_at.elapsed() < decay => {
                failed_at.elapsed().as_secs_f64() / decay.as_secs_f64()
            }
            _ => 1.0,
        }
    }

    /// Whether the last full refresh is older than the TTL
    pub async fn is_stale(&self) -> bool {
        self.last_refresh.lock().await.is_none_or(|at| at.elapsed() >= self.ttl)
    }

    /// Probe every named provider if the cache is stale
    ///
    /// Concurrent callers wait for an in-flight refresh instead of
    /// probing again. Returns whether probes ran.
    pub async fn refresh_if_stale<F, Fut>(&self, names: &[String], probe: F) -> bool
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = bool>,
    {
        let mut last_refresh = self.last_refresh.lock().await;
        if last_refresh.is_some_and(|at| at.elapsed() < self.ttl) {
            return false;
        }

        for name in names {
            let healthy = probe(name.clone()).await;
            tracing::debug!(provider = %name, healthy, "health probe");
            self.record(name, healthy);
        }

        *last_refresh = Some(Instant::now());
        true
    }

    /// Snapshot of every known provider's state
    pub fn snapshot(&self) -> Vec<(String, bool)> {
        self.entries.iter().map(|e| (e.key().clone(), e.healthy)).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn unknown_provider_is_healthy() {
        let cache = HealthCache::new(Duration::from_secs(60));
        assert!(cache.is_healthy("anything"));
        assert!((cache.availability("anything", Duration::from_secs(300)) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unhealthy_scores_zero() {
        let cache = HealthCache::new(Duration::from_secs(60));
        cache.mark_unhealthy("local");
        assert!(!cache.is_healthy("local"));
        assert!(cache.availability("local", Duration::from_secs(300)).abs() < f64::EPSILON);
    }

    #[test]
    fn recovered_provider_decays_back() {
        let cache = HealthCache::new(Duration::from_secs(60));
        cache.mark_unhealthy_at("local", Instant::now() - Duration::from_secs(150));
        cache.entries.get_mut("local").unwrap().healthy = true;

        let availability = cache.availability("local", Duration::from_secs(300));
        assert!(availability > 0.45 && availability < 0.6, "got {availability}");
        assert!((cache.availability("local", Duration::from_secs(100)) - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn refresh_runs_once_within_ttl() {
        let cache = HealthCache::new(Duration::from_secs(60));
        let probes = Arc::new(AtomicUsize::new(0));
        let names = vec!["local".to_owned()];

        for _ in 0..2 {
            let probes = Arc::clone(&probes);
            cache
                .refresh_if_stale(&names, move |_| {
                    let probes = Arc::clone(&probes);
                    async move {
                        probes.fetch_add(1, Ordering::SeqCst);
                        true
                    }
                })
                .await;
        }

        assert_eq!(probes.load(Ordering::SeqCst), 1);
        assert!(!cache.is_stale().await);
    }

    #[tokio::test]
    async fn failed_probe_marks_unhealthy() {
        let cache = HealthCache::new(Duration::ZERO);
        let names = vec!["local".to_owned(), "openai".to_owned()];
        let ran = cache
            .refresh_if_stale(&names, |name| async move { name != "local" })
            .await;

        assert!(ran);
        assert!(!cache.is_healthy("local"));
        assert!(cache.is_healthy("openai"));
        assert!(cache.is_stale().await);
    }
}
