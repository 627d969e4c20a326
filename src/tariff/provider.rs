use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration as StdDuration;

use crate::error::{ProviderError, ProviderOutcome};
use crate::forecast::{Provider, Timestamped};

#[derive(Debug, Clone, Copy)]
pub struct RawTariffPoint {
    pub time: DateTime<Utc>,
    pub import_c: f64,
    pub export_c: f64,
}

#[derive(Debug, Clone)]
pub struct TariffSample {
    pub produced_at: DateTime<Utc>,
    pub points: Vec<RawTariffPoint>,
}

impl Timestamped for TariffSample {
    fn produced_at(&self) -> DateTime<Utc> {
        self.produced_at
    }
}

#[derive(Debug, Deserialize)]
struct RawPoint {
    time: DateTime<Utc>,
    import_c_per_kwh: f64,
    export_c_per_kwh: f64,
}

/// HTTP tariff client. `import_c` may legitimately be negative; the series
/// layer, not this client, applies spike-hysteresis semantics.
#[derive(Clone)]
pub struct HttpTariffProvider {
    base_url: String,
    client: reqwest::Client,
    timeout_s: u64,
}

impl HttpTariffProvider {
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
impl Provider<TariffSample> for HttpTariffProvider {
    async fn fetch(&self) -> ProviderOutcome<TariffSample> {
        let url = format!("{}/tariff/forecast", self.base_url.trim_end_matches('/'));
        let resp = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                return ProviderOutcome::Err(ProviderError::Timeout {
                    provider: "tariff".into(),
                    timeout_s: self.timeout_s,
                })
            }
            Err(e) => {
                return ProviderOutcome::Err(ProviderError::Failed {
                    provider: "tariff".into(),
                    source: e.into(),
                })
            }
        };
        if !resp.status().is_success() {
            return ProviderOutcome::Err(ProviderError::Failed {
                provider: "tariff".into(),
                source: anyhow::anyhow!("HTTP {}", resp.status()),
            });
        }
        match resp.json::<Vec<RawPoint>>().await {
            Ok(raw) => {
                let points = raw
                    .into_iter()
                    .map(|r| RawTariffPoint {
                        time: r.time,
                        import_c: r.import_c_per_kwh,
                        export_c: r.export_c_per_kwh,
                    })
                    .collect();
                ProviderOutcome::Ok(TariffSample {
                    produced_at: Utc::now(),
                    points,
                })
            }
            Err(e) => ProviderOutcome::Err(ProviderError::Failed {
                provider: "tariff".into(),
                source: e.into(),
            }),
        }
    }
}
