use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::time::Slot;

/// A single 30-minute forecast sample.
///
/// Invariant: `solar_p10_w <= solar_p50_w <= solar_p90_w` and all are `>= 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub slot: Slot,
    pub solar_p10_w: f64,
    pub solar_p50_w: f64,
    pub solar_p90_w: f64,
    pub load_forecast_w: f64,
    pub temp_c: f64,
    pub cloud_frac: f64,
    pub wind_mps: f64,
    pub rain_mm: f64,
    pub storm_prob: f64,
    pub produced_at: DateTime<Utc>,
}

impl ForecastPoint {
    pub fn is_well_ordered(&self) -> bool {
        self.solar_p10_w >= 0.0
            && self.solar_p10_w <= self.solar_p50_w
            && self.solar_p50_w <= self.solar_p90_w
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, fresh_ttl: Duration) -> bool {
        now - self.produced_at <= fresh_ttl
    }

    /// Solar estimate for the configured percentile choice.
    pub fn solar_for(&self, percentile: SolarPercentile) -> f64 {
        match percentile {
            SolarPercentile::P10 => self.solar_p10_w,
            SolarPercentile::P50 => self.solar_p50_w,
            SolarPercentile::P90 => self.solar_p90_w,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolarPercentile {
    P10,
    P50,
    P90,
}

impl std::str::FromStr for SolarPercentile {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "p10" => Ok(SolarPercentile::P10),
            "p90" => Ok(SolarPercentile::P90),
            "p50" => Ok(SolarPercentile::P50),
            _ => Err(()),
        }
    }
}

/// Which inputs were degraded (stale past hard TTL) when a snapshot was built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DegradedReason {
    SolarStale,
    WeatherStale,
    StormStale,
    LoadHistoryInsufficient,
}

/// A full 48h, 96-slot forecast snapshot built by the aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Forecast48h {
    pub built_at: DateTime<Utc>,
    pub points: Vec<ForecastPoint>,
    pub degraded_reasons: BTreeSet<DegradedReason>,
}

impl Forecast48h {
    pub fn get(&self, slot: Slot) -> Option<&ForecastPoint> {
        self.points.iter().find(|p| p.slot == slot)
    }

    pub fn is_degraded(&self) -> bool {
        !self.degraded_reasons.is_empty()
    }

    /// Content hash used by the rebuild evaluator and plan determinism check.
    ///
    /// Built from a coarse quantization of the solar/load series so that
    /// floating point jitter below the planner's resolution doesn't trigger
    /// spurious rebuilds.
    pub fn content_hash(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        for p in &self.points {
            p.slot.start.timestamp().hash(&mut hasher);
            (p.solar_p10_w.round() as i64).hash(&mut hasher);
            (p.solar_p50_w.round() as i64).hash(&mut hasher);
            (p.solar_p90_w.round() as i64).hash(&mut hasher);
            (p.load_forecast_w.round() as i64).hash(&mut hasher);
            ((p.storm_prob * 1000.0).round() as i64).hash(&mut hasher);
        }
        hasher.finish()
    }
}
