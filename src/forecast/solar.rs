use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration as StdDuration;

use super::provider::{Provider, Timestamped};
use crate::domain::SolarPercentile;
use crate::error::{ProviderError, ProviderOutcome};

#[derive(Debug, Clone, Copy)]
pub struct SolarPoint {
    pub at: DateTime<Utc>,
    pub p10_w: f64,
    pub p50_w: f64,
    pub p90_w: f64,
}

#[derive(Debug, Clone)]
pub struct SolarSeries {
    pub produced_at: DateTime<Utc>,
    pub points: Vec<SolarPoint>,
}

impl Timestamped for SolarSeries {
    fn produced_at(&self) -> DateTime<Utc> {
        self.produced_at
    }
}

impl SolarSeries {
    /// Linear interpolation of the requested percentile at `at`, clamped to
    /// the series' first/last sample outside its covered range.
    pub fn interpolate(&self, at: DateTime<Utc>, percentile: SolarPercentile) -> Option<f64> {
        let n = self.points.len();
        if n == 0 {
            return None;
        }
        if at <= self.points[0].at {
            return Some(pick(&self.points[0], percentile));
        }
        if at >= self.points[n - 1].at {
            return Some(pick(&self.points[n - 1], percentile));
        }
        for w in self.points.windows(2) {
            let (a, b) = (&w[0], &w[1]);
            if at >= a.at && at <= b.at {
                let span = (b.at - a.at).num_seconds() as f64;
                let frac = if span > 0.0 {
                    (at - a.at).num_seconds() as f64 / span
                } else {
                    0.0
                };
                let (va, vb) = (pick(a, percentile), pick(b, percentile));
                return Some(va + (vb - va) * frac);
            }
        }
        None
    }
}

fn pick(p: &SolarPoint, percentile: SolarPercentile) -> f64 {
    match percentile {
        SolarPercentile::P10 => p.p10_w,
        SolarPercentile::P50 => p.p50_w,
        SolarPercentile::P90 => p.p90_w,
    }
}

#[derive(Debug, Deserialize)]
struct RawSolarPoint {
    time: DateTime<Utc>,
    p10_w: f64,
    p50_w: f64,
    p90_w: f64,
}

/// HTTP solar-irradiance-forecast client. Unknown response fields are
/// ignored by `serde` rather than rejected, per the provider versioning note.
#[derive(Clone)]
pub struct HttpSolarProvider {
    base_url: String,
    client: reqwest::Client,
    timeout_s: u64,
}

impl HttpSolarProvider {
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
impl Provider<SolarSeries> for HttpSolarProvider {
    async fn fetch(&self) -> ProviderOutcome<SolarSeries> {
        let url = format!("{}/solar/forecast", self.base_url.trim_end_matches('/'));
        let resp = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                return ProviderOutcome::Err(ProviderError::Timeout {
                    provider: "solar".into(),
                    timeout_s: self.timeout_s,
                })
            }
            Err(e) => {
                return ProviderOutcome::Err(ProviderError::Failed {
                    provider: "solar".into(),
                    source: e.into(),
                })
            }
        };
        if !resp.status().is_success() {
            return ProviderOutcome::Err(ProviderError::Failed {
                provider: "solar".into(),
                source: anyhow::anyhow!("HTTP {}", resp.status()),
            });
        }
        match resp.json::<Vec<RawSolarPoint>>().await {
            Ok(raw) => {
                let points = raw
                    .into_iter()
                    .map(|r| SolarPoint {
                        at: r.time,
                        p10_w: r.p10_w.max(0.0),
                        p50_w: r.p50_w.max(0.0),
                        p90_w: r.p90_w.max(0.0),
                    })
                    .collect();
                ProviderOutcome::Ok(SolarSeries {
                    produced_at: Utc::now(),
                    points,
                })
            }
            Err(e) => ProviderOutcome::Err(ProviderError::Failed {
                provider: "solar".into(),
                source: e.into(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn series() -> SolarSeries {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();
        SolarSeries {
            produced_at: t0,
            points: vec![
                SolarPoint { at: t0, p10_w: 0.0, p50_w: 100.0, p90_w: 200.0 },
                SolarPoint {
                    at: t0 + chrono::Duration::hours(2),
                    p10_w: 400.0,
                    p50_w: 500.0,
                    p90_w: 600.0,
                },
            ],
        }
    }

    #[test]
    fn interpolates_midpoint() {
        let s = series();
        let mid = s.points[0].at + chrono::Duration::hours(1);
        assert_eq!(s.interpolate(mid, SolarPercentile::P50), Some(300.0));
    }

    #[test]
    fn clamps_outside_range() {
        let s = series();
        let before = s.points[0].at - chrono::Duration::hours(1);
        assert_eq!(s.interpolate(before, SolarPercentile::P50), Some(100.0));
    }
}
