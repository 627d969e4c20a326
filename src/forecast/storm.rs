use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration as StdDuration;

use super::provider::{Provider, Timestamped};
use crate::domain::Slot;
use crate::error::{ProviderError, ProviderOutcome};

#[derive(Debug, Clone, Copy)]
pub struct StormWarning {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub probability: f64,
}

impl StormWarning {
    fn intersects(&self, slot: Slot) -> bool {
        slot.start < self.end && slot.end() > self.start
    }
}

#[derive(Debug, Clone)]
pub struct StormSeries {
    pub produced_at: DateTime<Utc>,
    pub warnings: Vec<StormWarning>,
}

impl Timestamped for StormSeries {
    fn produced_at(&self) -> DateTime<Utc> {
        self.produced_at
    }
}

impl StormSeries {
    /// Maximum probability across all warnings intersecting `slot`, per §4.1.
    pub fn max_probability_intersecting(&self, slot: Slot) -> f64 {
        self.warnings
            .iter()
            .filter(|w| w.intersects(slot))
            .map(|w| w.probability)
            .fold(0.0, f64::max)
    }
}

#[derive(Debug, Deserialize)]
struct RawStormWarning {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    probability: f64,
}

#[derive(Clone)]
pub struct HttpStormProvider {
    base_url: String,
    client: reqwest::Client,
    timeout_s: u64,
}

impl HttpStormProvider {
    pub fn new(base_url: String, timeout: StdDuration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url,
            client,
            timeout_s: timeout.as_secs(),
        })
    }
}

#[async_trait]
impl Provider<StormSeries> for HttpStormProvider {
    async fn fetch(&self) -> ProviderOutcome<StormSeries> {
        let url = format!("{}/storm/warnings", self.base_url.trim_end_matches('/'));
        let resp = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                return ProviderOutcome::Err(ProviderError::Timeout {
                    provider: "storm".into(),
                    timeout_s: self.timeout_s,
                })
            }
            Err(e) => {
                return ProviderOutcome::Err(ProviderError::Failed {
                    provider: "storm".into(),
                    source: e.into(),
                })
            }
        };
        if !resp.status().is_success() {
            return ProviderOutcome::Err(ProviderError::Failed {
                provider: "storm".into(),
                source: anyhow::anyhow!("HTTP {}", resp.status()),
            });
        }
        match resp.json::<Vec<RawStormWarning>>().await {
            Ok(raw) => {
                let warnings = raw
                    .into_iter()
                    .map(|r| StormWarning {
                        start: r.start,
                        end: r.end,
                        probability: r.probability.clamp(0.0, 1.0),
                    })
                    .collect();
                ProviderOutcome::Ok(StormSeries {
                    produced_at: Utc::now(),
                    warnings,
                })
            }
            Err(e) => ProviderOutcome::Err(ProviderError::Failed {
                provider: "storm".into(),
                source: e.into(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn takes_max_of_overlapping_warnings() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap();
        let slot = Slot::containing(t0);
        let series = StormSeries {
            produced_at: t0,
            warnings: vec![
                StormWarning { start: t0, end: t0 + chrono::Duration::hours(1), probability: 0.3 },
                StormWarning { start: t0, end: t0 + chrono::Duration::hours(1), probability: 0.7 },
            ],
        };
        assert_eq!(series.max_probability_intersecting(slot), 0.7);
    }

    #[test]
    fn ignores_non_intersecting_warning() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap();
        let slot = Slot::containing(t0);
        let series = StormSeries {
            produced_at: t0,
            warnings: vec![StormWarning {
                start: t0 + chrono::Duration::hours(5),
                end: t0 + chrono::Duration::hours(6),
                probability: 0.9,
            }],
        };
        assert_eq!(series.max_probability_intersecting(slot), 0.0);
    }
}
