use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::domain::Weekday;

const WEEKS_KEPT: usize = 4;
const MIN_HISTORY_DAYS: usize = 7;

/// Rolling per-(weekday, half-hour) load history used to forecast
/// non-deferrable load when no explicit model is configured (§4.1).
pub struct LoadHistory {
    buckets: HashMap<(Weekday, u8), VecDeque<f64>>,
    distinct_days: BTreeSet<NaiveDate>,
}

impl LoadHistory {
    pub fn new() -> Self {
        Self {
            buckets: HashMap::new(),
            distinct_days: BTreeSet::new(),
        }
    }

    pub fn record(&mut self, at: DateTime<Utc>, load_w: f64) {
        let weekday = Weekday::from(at.weekday());
        let half_hour = half_hour_index(at);
        let bucket = self.buckets.entry((weekday, half_hour)).or_default();
        bucket.push_back(load_w);
        while bucket.len() > WEEKS_KEPT {
            bucket.pop_front();
        }
        self.distinct_days.insert(at.date_naive());
    }

    pub fn median_for(&self, weekday: Weekday, half_hour: u8) -> Option<f64> {
        let bucket = self.buckets.get(&(weekday, half_hour))?;
        if bucket.is_empty() {
            return None;
        }
        let mut sorted: Vec<f64> = bucket.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let mid = sorted.len() / 2;
        Some(if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        })
    }

    /// True once at least a week's worth of distinct calendar days has been
    /// observed; below this the aggregator falls back to `baseline_load_w`.
    pub fn has_min_history(&self) -> bool {
        self.distinct_days.len() >= MIN_HISTORY_DAYS
    }
}

impl Default for LoadHistory {
    fn default() -> Self {
        Self::new()
    }
}

fn half_hour_index(at: DateTime<Utc>) -> u8 {
    (at.hour() * 2 + u32::from(at.minute() >= 30)) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn median_of_four_weekly_samples() {
        let mut h = LoadHistory::new();
        let base = Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap(); // a Monday
        for (i, w) in [100.0, 200.0, 300.0, 400.0].iter().enumerate() {
            h.record(base + chrono::Duration::weeks(i as i64), *w);
        }
        let median = h.median_for(Weekday::from(base.weekday()), half_hour_index(base));
        assert_eq!(median, Some(250.0));
    }

    #[test]
    fn insufficient_history_below_a_week() {
        let mut h = LoadHistory::new();
        let base = Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap();
        for i in 0..3 {
            h.record(base + chrono::Duration::days(i), 100.0);
        }
        assert!(!h.has_min_history());
    }

    #[test]
    fn caps_bucket_at_four_weeks() {
        let mut h = LoadHistory::new();
        let base = Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap();
        for i in 0..6 {
            h.record(base + chrono::Duration::weeks(i), 100.0 + i as f64);
        }
        let bucket = h
            .buckets
            .get(&(Weekday::from(base.weekday()), half_hour_index(base)))
            .unwrap();
        assert_eq!(bucket.len(), WEEKS_KEPT);
    }
}
