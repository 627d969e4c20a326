use chrono::{DateTime, Datelike, Utc};
use std::collections::BTreeSet;
use tokio::sync::RwLock;

use super::load_history::LoadHistory;
use super::provider::ProviderCache;
use super::solar::SolarSeries;
use super::storm::StormSeries;
use super::weather::WeatherSeries;
use crate::config::ProvidersConfig;
use crate::domain::{DegradedReason, Forecast48h, ForecastPoint, Slot, SolarPercentile, Weekday};
use crate::error::ProviderOutcome;

/// Merges solar, weather and storm provider samples plus the rolling load
/// history into a single 48h/96-slot snapshot (§4.1).
pub struct ForecastAggregator {
    solar: ProviderCache<SolarSeries>,
    weather: ProviderCache<WeatherSeries>,
    storm: ProviderCache<StormSeries>,
    load_history: RwLock<LoadHistory>,
    solar_hard_ttl: chrono::Duration,
    weather_hard_ttl: chrono::Duration,
    storm_hard_ttl: chrono::Duration,
    baseline_load_w: f64,
    percentile: SolarPercentile,
}

impl ForecastAggregator {
    pub fn new(providers: &ProvidersConfig, percentile: SolarPercentile) -> Self {
        Self {
            solar: ProviderCache::new(),
            weather: ProviderCache::new(),
            storm: ProviderCache::new(),
            load_history: RwLock::new(LoadHistory::new()),
            solar_hard_ttl: chrono::Duration::seconds(providers.solar.hard_ttl_secs as i64),
            weather_hard_ttl: chrono::Duration::seconds(providers.weather.hard_ttl_secs as i64),
            storm_hard_ttl: chrono::Duration::seconds(providers.storm.hard_ttl_secs as i64),
            baseline_load_w: providers.baseline_load_w,
            percentile,
        }
    }

    pub async fn ingest_solar(&self, outcome: ProviderOutcome<SolarSeries>) {
        self.solar.record(outcome).await;
    }

    pub async fn ingest_weather(&self, outcome: ProviderOutcome<WeatherSeries>) {
        self.weather.record(outcome).await;
    }

    pub async fn ingest_storm(&self, outcome: ProviderOutcome<StormSeries>) {
        self.storm.record(outcome).await;
    }

    pub async fn record_load_sample(&self, at: DateTime<Utc>, load_w: f64) {
        self.load_history.write().await.record(at, load_w);
    }

    pub async fn provider_health(
        &self,
        now: DateTime<Utc>,
    ) -> Vec<(&'static str, super::provider::ProviderHealth)> {
        vec![
            ("solar", self.solar.health(now, self.solar_hard_ttl).await),
            ("weather", self.weather.health(now, self.weather_hard_ttl).await),
            ("storm", self.storm.health(now, self.storm_hard_ttl).await),
        ]
    }

    pub fn configured_percentile(&self) -> SolarPercentile {
        self.percentile
    }

    /// Build the 96-slot, 48h forecast snapshot starting at `now`.
    pub async fn snapshot(&self, now: DateTime<Utc>) -> Forecast48h {
        let solar = self.solar.snapshot().await;
        let weather = self.weather.snapshot().await;
        let storm = self.storm.snapshot().await;
        let history = self.load_history.read().await;

        let mut degraded = BTreeSet::new();
        let solar_fresh = solar
            .as_ref()
            .map(|s| now - s.produced_at <= self.solar_hard_ttl)
            .unwrap_or(false);
        if !solar_fresh {
            degraded.insert(DegradedReason::SolarStale);
        }
        let weather_fresh = weather
            .as_ref()
            .map(|w| now - w.produced_at <= self.weather_hard_ttl)
            .unwrap_or(false);
        if !weather_fresh {
            degraded.insert(DegradedReason::WeatherStale);
        }
        let storm_fresh = storm
            .as_ref()
            .map(|s| now - s.produced_at <= self.storm_hard_ttl)
            .unwrap_or(false);
        if !storm_fresh {
            degraded.insert(DegradedReason::StormStale);
        }
        let sufficient_history = history.has_min_history();
        if !sufficient_history {
            degraded.insert(DegradedReason::LoadHistoryInsufficient);
        }

        let mut points = Vec::with_capacity(Slot::horizon_from(now).len());
        for slot in Slot::horizon_from(now) {
            let mid = slot.start + chrono::Duration::minutes(15);

            let mut tri = solar
                .as_ref()
                .map(|s| {
                    [
                        s.interpolate(mid, SolarPercentile::P10).unwrap_or(0.0),
                        s.interpolate(mid, SolarPercentile::P50).unwrap_or(0.0),
                        s.interpolate(mid, SolarPercentile::P90).unwrap_or(0.0),
                    ]
                })
                .unwrap_or([0.0, 0.0, 0.0]);
            tri.sort_by(|a, b| a.partial_cmp(b).unwrap());
            let (solar_p10_w, solar_p50_w, solar_p90_w) = (tri[0], tri[1], tri[2]);

            let weather_point = weather.as_ref().and_then(|w| w.nearest(mid));
            let (temp_c, cloud_frac, wind_mps, rain_mm) = weather_point
                .map(|p| (p.temp_c, p.cloud_frac, p.wind_mps, p.rain_mm))
                .unwrap_or((15.0, 0.5, 0.0, 0.0));

            let storm_prob = storm
                .as_ref()
                .map(|s| s.max_probability_intersecting(slot))
                .unwrap_or(0.0);

            let weekday = Weekday::from(slot.start.weekday());
            let hh = half_hour_of_day(slot);
            let load_forecast_w = if sufficient_history {
                history.median_for(weekday, hh).unwrap_or(self.baseline_load_w)
            } else {
                self.baseline_load_w
            };

            points.push(ForecastPoint {
                slot,
                solar_p10_w,
                solar_p50_w,
                solar_p90_w,
                load_forecast_w,
                temp_c,
                cloud_frac,
                wind_mps,
                rain_mm,
                storm_prob,
                produced_at: solar.as_ref().map(|s| s.produced_at).unwrap_or(now),
            });
        }

        Forecast48h {
            built_at: now,
            points,
            degraded_reasons: degraded,
        }
    }
}

fn half_hour_of_day(slot: Slot) -> u8 {
    use chrono::Timelike;
    (slot.start.hour() * 2 + u32::from(slot.start.minute() >= 30)) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderEndpointConfig;
    use chrono::TimeZone;

    fn providers_cfg() -> ProvidersConfig {
        let ep = ProviderEndpointConfig {
            base_url: "http://example.invalid".into(),
            http_timeout_secs: 10,
            fresh_ttl_secs: 900,
            hard_ttl_secs: 7200,
        };
        ProvidersConfig {
            solar: ep.clone(),
            weather: ep.clone(),
            storm: ep.clone(),
            tariff: ep,
            baseline_load_w: 400.0,
        }
    }

    #[tokio::test]
    async fn snapshot_without_any_provider_is_fully_degraded() {
        let agg = ForecastAggregator::new(&providers_cfg(), SolarPercentile::P50);
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let snap = agg.snapshot(now).await;
        assert_eq!(snap.points.len(), 96);
        assert!(snap.is_degraded());
        assert!(snap.degraded_reasons.contains(&DegradedReason::SolarStale));
        assert!(snap.points.iter().all(|p| p.load_forecast_w == 400.0));
    }

    #[tokio::test]
    async fn fresh_solar_feeds_into_points() {
        let agg = ForecastAggregator::new(&providers_cfg(), SolarPercentile::P50);
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        agg.ingest_solar(ProviderOutcome::Ok(SolarSeries {
            produced_at: now,
            points: vec![
                super::super::solar::SolarPoint { at: now, p10_w: 100.0, p50_w: 200.0, p90_w: 300.0 },
                super::super::solar::SolarPoint {
                    at: now + chrono::Duration::hours(48),
                    p10_w: 100.0,
                    p50_w: 200.0,
                    p90_w: 300.0,
                },
            ],
        }))
        .await;
        let snap = agg.snapshot(now).await;
        assert!(!snap.degraded_reasons.contains(&DegradedReason::SolarStale));
        assert!(snap.points[0].solar_p50_w > 0.0);
    }
}
