use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration as StdDuration;

use super::provider::{Provider, Timestamped};
use crate::error::{ProviderError, ProviderOutcome};

#[derive(Debug, Clone, Copy)]
pub struct WeatherPoint {
    pub at: DateTime<Utc>,
    pub temp_c: f64,
    pub cloud_frac: f64,
    pub wind_mps: f64,
    pub rain_mm: f64,
}

#[derive(Debug, Clone)]
pub struct WeatherSeries {
    pub produced_at: DateTime<Utc>,
    pub points: Vec<WeatherPoint>,
}

impl Timestamped for WeatherSeries {
    fn produced_at(&self) -> DateTime<Utc> {
        self.produced_at
    }
}

impl WeatherSeries {
    /// Nearest-sample lookup (weather fields are carried for display/planner
    /// context, not interpolated to sub-sample precision).
    pub fn nearest(&self, at: DateTime<Utc>) -> Option<WeatherPoint> {
        self.points
            .iter()
            .min_by_key(|p| (p.at - at).num_seconds().abs())
            .copied()
    }
}

#[derive(Debug, Deserialize)]
struct RawWeatherPoint {
    time: DateTime<Utc>,
    temp_c: f64,
    cloud_frac: f64,
    wind_mps: f64,
    rain_mm: f64,
}

#[derive(Clone)]
pub struct HttpWeatherProvider {
    base_url: String,
    client: reqwest::Client,
    timeout_s: u64,
}

impl HttpWeatherProvider {
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
impl Provider<WeatherSeries> for HttpWeatherProvider {
    async fn fetch(&self) -> ProviderOutcome<WeatherSeries> {
        let url = format!("{}/weather/forecast", self.base_url.trim_end_matches('/'));
        let resp = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                return ProviderOutcome::Err(ProviderError::Timeout {
                    provider: "weather".into(),
                    timeout_s: self.timeout_s,
                })
            }
            Err(e) => {
                return ProviderOutcome::Err(ProviderError::Failed {
                    provider: "weather".into(),
                    source: e.into(),
                })
            }
        };
        if !resp.status().is_success() {
            return ProviderOutcome::Err(ProviderError::Failed {
                provider: "weather".into(),
                source: anyhow::anyhow!("HTTP {}", resp.status()),
            });
        }
        match resp.json::<Vec<RawWeatherPoint>>().await {
            Ok(raw) => {
                let points = raw
                    .into_iter()
                    .map(|r| WeatherPoint {
                        at: r.time,
                        temp_c: r.temp_c,
                        cloud_frac: r.cloud_frac.clamp(0.0, 1.0),
                        wind_mps: r.wind_mps.max(0.0),
                        rain_mm: r.rain_mm.max(0.0),
                    })
                    .collect();
                ProviderOutcome::Ok(WeatherSeries {
                    produced_at: Utc::now(),
                    points,
                })
            }
            Err(e) => ProviderOutcome::Err(ProviderError::Failed {
                provider: "weather".into(),
                source: e.into(),
            }),
        }
    }
}
