use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Weekday {
    Mon = 0,
    Tue = 1,
    Wed = 2,
    Thu = 3,
    Fri = 4,
    Sat = 5,
    Sun = 6,
}

impl From<chrono::Weekday> for Weekday {
    fn from(w: chrono::Weekday) -> Self {
        match w {
            chrono::Weekday::Mon => Weekday::Mon,
            chrono::Weekday::Tue => Weekday::Tue,
            chrono::Weekday::Wed => Weekday::Wed,
            chrono::Weekday::Thu => Weekday::Thu,
            chrono::Weekday::Fri => Weekday::Fri,
            chrono::Weekday::Sat => Weekday::Sat,
            chrono::Weekday::Sun => Weekday::Sun,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadDefinitionError {
    #[error("min_runtime_min ({min}) must be <= ideal_runtime_min ({ideal}) <= max_runtime_min ({max})")]
    RuntimeOrdering { min: u32, ideal: u32, max: u32 },
    #[error("earliest_h ({earliest}) must differ from latest_h ({latest})")]
    WindowDegenerate { earliest: u8, latest: u8 },
}

/// A deferrable household load the scheduler may turn on/off.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LoadDefinition {
    pub name: String,
    #[validate(range(min = 0.0))]
    pub power_w: f64,
    #[validate(range(min = 1, max = 10))]
    pub priority_class: u8,
    pub min_runtime_min: u32,
    pub ideal_runtime_min: u32,
    pub max_runtime_min: u32,
    #[validate(range(max = 23))]
    pub earliest_h: u8,
    #[validate(range(max = 23))]
    pub latest_h: u8,
    pub days_of_week: BTreeSet<Weekday>,
    pub prefer_solar: bool,
    pub allow_split_shifts: bool,
    pub enabled: bool,
}

impl LoadDefinition {
    pub fn validate_invariants(&self) -> Result<(), LoadDefinitionError> {
        if !(self.min_runtime_min <= self.ideal_runtime_min
            && self.ideal_runtime_min <= self.max_runtime_min)
        {
            return Err(LoadDefinitionError::RuntimeOrdering {
                min: self.min_runtime_min,
                ideal: self.ideal_runtime_min,
                max: self.max_runtime_min,
            });
        }
        if self.earliest_h == self.latest_h {
            return Err(LoadDefinitionError::WindowDegenerate {
                earliest: self.earliest_h,
                latest: self.latest_h,
            });
        }
        Ok(())
    }

    /// True if `hour` falls inside `[earliest_h, latest_h)` modulo 24.
    pub fn hour_in_window(&self, hour: u8) -> bool {
        if self.earliest_h < self.latest_h {
            hour >= self.earliest_h && hour < self.latest_h
        } else {
            hour >= self.earliest_h || hour < self.latest_h
        }
    }

    pub fn eligible_on(&self, weekday: Weekday) -> bool {
        self.enabled && self.days_of_week.contains(&weekday)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadState {
    Idle,
    Running,
    Completed,
    LockedOut,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadRuntimeState {
    pub name: String,
    pub state: LoadState,
    pub runtime_minutes_today: u32,
    pub last_transition_at: DateTime<Utc>,
    pub current_shift_start: Option<DateTime<Utc>>,
}

impl LoadRuntimeState {
    pub fn idle(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            state: LoadState::Idle,
            runtime_minutes_today: 0,
            last_transition_at: now,
            current_shift_start: None,
        }
    }

    pub fn reset_for_new_day(&mut self, now: DateTime<Utc>) {
        self.state = LoadState::Idle;
        self.runtime_minutes_today = 0;
        self.last_transition_at = now;
        self.current_shift_start = None;
    }
}
