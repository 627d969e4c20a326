use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::{ProviderError, ProviderOutcome};

/// A fetched series that knows when it was produced, so the cache doesn't
/// need to track a second clock reading that could drift from the payload.
pub trait Timestamped {
    fn produced_at(&self) -> DateTime<Utc>;
}

/// Typed parse layer entry point: each concrete provider (HTTP, FTP, mock)
/// implements this for its own sample type. Failures are returned, never
/// thrown, matching spec's "degraded-sample result, not an exception".
#[async_trait]
pub trait Provider<T>: Send + Sync {
    async fn fetch(&self) -> ProviderOutcome<T>;
}

struct CacheState<T> {
    last_good: Option<T>,
    consecutive_failures: u32,
    last_error: Option<String>,
}

impl<T> Default for CacheState<T> {
    fn default() -> Self {
        Self {
            last_good: None,
            consecutive_failures: 0,
            last_error: None,
        }
    }
}

/// Holds the last successfully-parsed sample plus health bookkeeping for one
/// provider. `record` never discards `Degraded` data — it still becomes the
/// `last_good` value, just with a recorded reason for the health endpoint.
pub struct ProviderCache<T> {
    state: RwLock<CacheState<T>>,
}

impl<T: Clone> ProviderCache<T> {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
        }
    }

    pub async fn record(&self, outcome: ProviderOutcome<T>) {
        let mut st = self.state.write().await;
        match outcome {
            ProviderOutcome::Ok(v) => {
                st.last_good = Some(v);
                st.consecutive_failures = 0;
                st.last_error = None;
            }
            ProviderOutcome::Degraded(v, reason) => {
                st.last_good = Some(v);
                st.consecutive_failures += 1;
                st.last_error = Some(reason);
            }
            ProviderOutcome::Err(ProviderError::Timeout { provider, timeout_s }) => {
                st.consecutive_failures += 1;
                st.last_error = Some(format!("{provider} timed out after {timeout_s}s"));
            }
            ProviderOutcome::Err(ProviderError::Degraded { provider, reason }) => {
                st.consecutive_failures += 1;
                st.last_error = Some(format!("{provider}: {reason}"));
            }
            ProviderOutcome::Err(ProviderError::Failed { provider, source }) => {
                st.consecutive_failures += 1;
                st.last_error = Some(format!("{provider}: {source}"));
            }
        }
    }

    pub async fn snapshot(&self) -> Option<T> {
        self.state.read().await.last_good.clone()
    }

    pub async fn consecutive_failures(&self) -> u32 {
        self.state.read().await.consecutive_failures
    }

    pub async fn last_error(&self) -> Option<String> {
        self.state.read().await.last_error.clone()
    }
}

impl<T: Clone> Default for ProviderCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-provider snapshot exposed at `GET /api/providers/status`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProviderHealth {
    pub healthy: bool,
    pub configured: bool,
    pub data_age_seconds: Option<i64>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

impl<T: Clone + Timestamped> ProviderCache<T> {
    pub async fn health(&self, now: DateTime<Utc>, hard_ttl: chrono::Duration) -> ProviderHealth {
        let st = self.state.read().await;
        let data_age_seconds = st.last_good.as_ref().map(|v| (now - v.produced_at()).num_seconds());
        let healthy = match data_age_seconds {
            Some(age) => age <= hard_ttl.num_seconds(),
            None => false,
        };
        ProviderHealth {
            healthy,
            configured: true,
            data_age_seconds,
            consecutive_failures: st.consecutive_failures,
            last_error: st.last_error.clone(),
        }
    }
}
