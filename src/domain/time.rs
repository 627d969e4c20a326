use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Length of a planning slot.
pub const SLOT_MINUTES: i64 = 30;
/// Number of slots in a 48h planning horizon.
pub const HORIZON_SLOTS: usize = 96;

/// A half-open `[start, start + 30min)` interval aligned to wall-clock half hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Slot {
    pub start: DateTime<Utc>,
}

impl Slot {
    pub fn containing(instant: DateTime<Utc>) -> Self {
        Self {
            start: floor_half_hour(instant),
        }
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.start + Duration::minutes(SLOT_MINUTES)
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end()
    }

    pub fn next(&self) -> Self {
        Self {
            start: self.start + Duration::minutes(SLOT_MINUTES),
        }
    }

    pub fn offset(&self, slots: i64) -> Self {
        Self {
            start: self.start + Duration::minutes(SLOT_MINUTES * slots),
        }
    }

    /// Build the 96-slot horizon starting at the slot containing `now`.
    pub fn horizon_from(now: DateTime<Utc>) -> Vec<Self> {
        let first = Self::containing(now);
        (0..HORIZON_SLOTS as i64).map(|i| first.offset(i)).collect()
    }
}

/// Round a timestamp down to the start of the half-hour it falls in.
pub fn floor_half_hour(instant: DateTime<Utc>) -> DateTime<Utc> {
    let minute = instant.minute();
    let floored_minute = (minute / 30) * 30;
    instant
        .with_minute(floored_minute)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(instant)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn floors_to_half_hour() {
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 10, 47, 12).unwrap();
        let floored = floor_half_hour(t);
        assert_eq!(floored, Utc.with_ymd_and_hms(2026, 1, 1, 10, 30, 0).unwrap());
    }

    #[test]
    fn slot_contains_its_interval() {
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 10, 47, 12).unwrap();
        let slot = Slot::containing(t);
        assert!(slot.contains(t));
        assert!(!slot.contains(slot.end()));
    }

    #[test]
    fn horizon_has_96_contiguous_slots() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let horizon = Slot::horizon_from(now);
        assert_eq!(horizon.len(), HORIZON_SLOTS);
        for pair in horizon.windows(2) {
            assert_eq!(pair[0].end(), pair[1].start);
        }
    }
}
