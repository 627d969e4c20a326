//! Per-device deferrable load state machine (§4.7). Runs inside the tick
//! loop after arbitration: the planner already decided which loads should
//! be on for the current slot, and the scheduler turns that plan intent
//! into `{turn_on, turn_off}` actions while enforcing runtime bounds.

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::domain::{LoadDefinition, LoadRuntimeState, LoadState, Weekday};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadAction {
    TurnOn,
    TurnOff,
    None,
}

pub struct LoadScheduler;

impl LoadScheduler {
    /// Advances one load's state machine for the current tick and returns
    /// the action the driver should take, if any.
    ///
    /// `plan_says_on` is the planner's decision for the slot covering `now`;
    /// `fault` signals the driver reported a hard failure for this device.
    pub fn tick(
        def: &LoadDefinition,
        state: &mut LoadRuntimeState,
        now: DateTime<Utc>,
        tick_minutes: u32,
        plan_says_on: bool,
        fault: bool,
    ) -> LoadAction {
        if state.last_transition_at.date_naive() != now.date_naive() {
            state.reset_for_new_day(now);
        }

        if fault {
            let was_running = state.state == LoadState::Running;
            state.state = LoadState::LockedOut;
            state.last_transition_at = now;
            return if was_running { LoadAction::TurnOff } else { LoadAction::None };
        }

        let weekday = Weekday::from(now.weekday());
        let within_window = def.hour_in_window(now.hour() as u8);
        let day_ok = def.eligible_on(weekday);
        let reached_max = state.runtime_minutes_today >= def.max_runtime_min;

        match state.state {
            LoadState::Idle => {
                if reached_max {
                    state.state = LoadState::Completed;
                    state.last_transition_at = now;
                    LoadAction::None
                } else if plan_says_on && within_window && day_ok {
                    state.state = LoadState::Running;
                    state.last_transition_at = now;
                    state.current_shift_start = Some(now);
                    LoadAction::TurnOn
                } else {
                    LoadAction::None
                }
            }
            LoadState::Running => {
                state.runtime_minutes_today += tick_minutes;
                if state.runtime_minutes_today >= def.max_runtime_min {
                    state.state = LoadState::Completed;
                    state.last_transition_at = now;
                    state.current_shift_start = None;
                    return LoadAction::TurnOff;
                }

                let shift_minutes = state
                    .current_shift_start
                    .map(|start| (now - start).num_minutes() as u32)
                    .unwrap_or(0);
                let min_satisfied = shift_minutes >= def.min_runtime_min;

                if !plan_says_on && min_satisfied {
                    if def.allow_split_shifts {
                        state.state = LoadState::Idle;
                        state.current_shift_start = None;
                    } else {
                        state.state = LoadState::LockedOut;
                    }
                    state.last_transition_at = now;
                    LoadAction::TurnOff
                } else {
                    LoadAction::None
                }
            }
            LoadState::Completed | LoadState::LockedOut => LoadAction::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeSet;

    fn dishwasher() -> LoadDefinition {
        LoadDefinition {
            name: "dishwasher".into(),
            power_w: 1200.0,
            priority_class: 5,
            min_runtime_min: 60,
            ideal_runtime_min: 120,
            max_runtime_min: 180,
            earliest_h: 10,
            latest_h: 18,
            days_of_week: BTreeSet::from([Weekday::Thu]),
            prefer_solar: true,
            allow_split_shifts: false,
            enabled: true,
        }
    }

    #[test]
    fn idle_starts_running_when_plan_says_on_within_window() {
        let def = dishwasher();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 11, 0, 0).unwrap(); // Thursday
        let mut state = LoadRuntimeState::idle("dishwasher", now - chrono::Duration::hours(1));
        let action = LoadScheduler::tick(&def, &mut state, now, 30, true, false);
        assert_eq!(action, LoadAction::TurnOn);
        assert_eq!(state.state, LoadState::Running);
    }

    #[test]
    fn running_locks_out_if_plan_turns_off_before_min_runtime_without_split_shifts() {
        let def = dishwasher();
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 11, 0, 0).unwrap();
        let mut state = LoadRuntimeState::idle("dishwasher", start);
        state.state = LoadState::Running;
        state.current_shift_start = Some(start);
        state.runtime_minutes_today = 30;

        let now = start + chrono::Duration::minutes(30);
        let action = LoadScheduler::tick(&def, &mut state, now, 30, false, false);
        // Only 30 minutes elapsed, below min_runtime_min=60, so it must keep running.
        assert_eq!(action, LoadAction::None);
        assert_eq!(state.state, LoadState::Running);
    }

    #[test]
    fn running_turns_off_and_locks_out_after_min_runtime_reached_without_split_shifts() {
        let def = dishwasher();
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 11, 0, 0).unwrap();
        let mut state = LoadRuntimeState::idle("dishwasher", start);
        state.state = LoadState::Running;
        state.current_shift_start = Some(start);
        state.runtime_minutes_today = 60;

        let now = start + chrono::Duration::minutes(60);
        let action = LoadScheduler::tick(&def, &mut state, now, 30, false, false);
        assert_eq!(action, LoadAction::TurnOff);
        assert_eq!(state.state, LoadState::LockedOut);
    }

    #[test]
    fn fault_locks_out_immediately() {
        let def = dishwasher();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 11, 0, 0).unwrap();
        let mut state = LoadRuntimeState::idle("dishwasher", now);
        state.state = LoadState::Running;
        let action = LoadScheduler::tick(&def, &mut state, now, 30, true, true);
        assert_eq!(action, LoadAction::TurnOff);
        assert_eq!(state.state, LoadState::LockedOut);
    }

    #[test]
    fn reaching_max_runtime_completes_the_load() {
        let def = dishwasher();
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 11, 0, 0).unwrap();
        let mut state = LoadRuntimeState::idle("dishwasher", start);
        state.state = LoadState::Running;
        state.current_shift_start = Some(start);
        state.runtime_minutes_today = 150;

        let now = start + chrono::Duration::minutes(30);
        let action = LoadScheduler::tick(&def, &mut state, now, 30, true, false);
        assert_eq!(action, LoadAction::TurnOff);
        assert_eq!(state.state, LoadState::Completed);
    }
}
