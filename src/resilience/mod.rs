//! Degrades the system to a safe preset when inputs fail repeatedly (§4.10,
//! §7). Tracks consecutive failures per named source and computes the
//! exponential backoff the provider pollers and planner retries should wait.

use std::collections::HashMap;
use std::time::Duration;

use rand::Rng;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceHealth {
    pub consecutive_failures: u32,
    pub healthy: bool,
}

/// Tracks per-source failure streaks and exposes jittered exponential
/// backoff, and the single "is the system currently degraded" signal the
/// arbitrator consults to decide whether arbitrage is allowed.
pub struct HealthManager {
    max_consecutive_failures: u32,
    backoff_initial: Duration,
    backoff_max: Duration,
    sources: RwLock<HashMap<String, u32>>,
}

impl HealthManager {
    pub fn new(max_consecutive_failures: u32, backoff_initial_ms: u64, backoff_max_ms: u64) -> Self {
        Self {
            max_consecutive_failures,
            backoff_initial: Duration::from_millis(backoff_initial_ms),
            backoff_max: Duration::from_millis(backoff_max_ms),
            sources: RwLock::new(HashMap::new()),
        }
    }

    pub async fn record_success(&self, source: &str) {
        self.sources.write().await.remove(source);
    }

    pub async fn record_failure(&self, source: &str) -> SourceHealth {
        let mut sources = self.sources.write().await;
        let count = sources.entry(source.to_string()).or_insert(0);
        *count += 1;
        SourceHealth {
            consecutive_failures: *count,
            healthy: *count < self.max_consecutive_failures,
        }
    }

    pub async fn health(&self, source: &str) -> SourceHealth {
        let count = self.sources.read().await.get(source).copied().unwrap_or(0);
        SourceHealth {
            consecutive_failures: count,
            healthy: count < self.max_consecutive_failures,
        }
    }

    pub async fn any_unhealthy(&self) -> bool {
        self.sources
            .read()
            .await
            .values()
            .any(|&count| count >= self.max_consecutive_failures)
    }

    /// `200ms * 2^failures`, jittered by +/-20%, capped at `backoff_max`.
    pub fn backoff_for(&self, consecutive_failures: u32) -> Duration {
        let exp = consecutive_failures.min(16);
        let unjittered = self.backoff_initial.saturating_mul(1u32 << exp).min(self.backoff_max);
        let jitter_frac = rand::thread_rng().gen_range(0.8..1.2);
        Duration::from_secs_f64(unjittered.as_secs_f64() * jitter_frac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unhealthy_after_threshold() {
        let mgr = HealthManager::new(3, 200, 30_000);
        mgr.record_failure("solar").await;
        mgr.record_failure("solar").await;
        let h = mgr.record_failure("solar").await;
        assert!(!h.healthy);
        assert_eq!(h.consecutive_failures, 3);
    }

    #[tokio::test]
    async fn success_resets_streak() {
        let mgr = HealthManager::new(3, 200, 30_000);
        mgr.record_failure("weather").await;
        mgr.record_success("weather").await;
        let h = mgr.health("weather").await;
        assert_eq!(h.consecutive_failures, 0);
    }

    #[test]
    fn backoff_is_capped() {
        let mgr = HealthManager::new(5, 200, 5_000);
        let backoff = mgr.backoff_for(10);
        assert!(backoff <= Duration::from_millis(6_000));
    }
}
