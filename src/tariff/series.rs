use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

use crate::domain::{Slot, TariffPoint};

/// 48h history + forward-looking tariff points, with spike entry/exit
/// hysteresis applied as points are ingested in slot order (§4.2).
pub struct TariffSeries {
    points: BTreeMap<DateTime<Utc>, TariffPoint>,
    spike_threshold_c: f64,
    hysteresis_ratio: f64,
    spike_active: bool,
}

impl TariffSeries {
    pub fn new(spike_threshold_c: f64, hysteresis_ratio: f64) -> Self {
        Self {
            points: BTreeMap::new(),
            spike_threshold_c,
            hysteresis_ratio,
            spike_active: false,
        }
    }

    /// Ingest one slot's price. Must be called in non-decreasing slot order
    /// for the hysteresis state machine to track history correctly; ingesting
    /// the same slot twice re-evaluates hysteresis from the current state.
    pub fn ingest(&mut self, slot: Slot, import_c: f64, export_c: f64) {
        let would_enter = import_c >= self.spike_threshold_c;
        let would_exit = import_c < self.spike_threshold_c * self.hysteresis_ratio;
        self.spike_active = if self.spike_active { !would_exit } else { would_enter };
        self.points.insert(
            slot.start,
            TariffPoint {
                slot,
                import_c,
                export_c,
                spike_flag: self.spike_active,
            },
        );
    }

    pub fn get(&self, slot: Slot) -> Option<&TariffPoint> {
        self.points.get(&slot.start)
    }

    pub fn retain_window(&mut self, now: DateTime<Utc>, history: Duration) {
        let cutoff = now - history;
        self.points.retain(|start, _| *start >= cutoff);
    }

    /// True if the series covers at least `hours` of points from `now` onward.
    pub fn has_forecast_through(&self, now: DateTime<Utc>, hours: i64) -> bool {
        let target = now + Duration::hours(hours);
        self.points.keys().next_back().is_some_and(|last| *last >= target)
    }

    /// Hash used by the rebuild evaluator to detect a changed tariff series.
    pub fn content_hash(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        for (start, p) in &self.points {
            start.timestamp().hash(&mut hasher);
            ((p.import_c * 1000.0).round() as i64).hash(&mut hasher);
            ((p.export_c * 1000.0).round() as i64).hash(&mut hasher);
        }
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn slot_at(hour: u32) -> Slot {
        let t = Utc.with_ymd_and_hms(2026, 1, 1, hour, 0, 0).unwrap();
        Slot::containing(t)
    }

    #[test]
    fn spike_flag_set_above_threshold() {
        let mut s = TariffSeries::new(80.0, 0.9);
        s.ingest(slot_at(10), 90.0, 10.0);
        assert!(s.get(slot_at(10)).unwrap().spike_flag);
    }

    #[test]
    fn spike_has_hysteresis_on_exit() {
        let mut s = TariffSeries::new(80.0, 0.9);
        s.ingest(slot_at(10), 90.0, 10.0);
        // Drops below threshold but above 0.9*80=72: hysteresis keeps it active.
        s.ingest(slot_at(11), 75.0, 10.0);
        assert!(s.get(slot_at(11)).unwrap().spike_flag);
        // Drops below 72: now exits.
        s.ingest(slot_at(12), 70.0, 10.0);
        assert!(!s.get(slot_at(12)).unwrap().spike_flag);
    }

    #[test]
    fn retain_window_drops_old_points() {
        let mut s = TariffSeries::new(80.0, 0.9);
        s.ingest(slot_at(0), 10.0, 1.0);
        s.ingest(slot_at(49), 10.0, 1.0);
        let now = slot_at(49).start;
        s.retain_window(now, Duration::hours(48));
        assert!(s.get(slot_at(0)).is_none());
        assert!(s.get(slot_at(49)).is_some());
    }
}
