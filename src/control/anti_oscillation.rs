//! Suppresses mode churn before a decision reaches the inverter (§4.6).
//! SAFETY and OVERRIDE decisions always pass through immediately; everything
//! else is subject to a minimum dwell time, a rolling hourly change budget,
//! and power-hysteresis so small re-optimizations don't chatter the relay.

use std::collections::VecDeque;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::warn;

use crate::domain::{ArbitratorDecision, Mode, Source};

struct GuardState {
    current_mode: Mode,
    current_power_w: f64,
    last_mode_change_at: DateTime<Utc>,
    recent_mode_changes: VecDeque<DateTime<Utc>>,
}

pub struct AntiOscillationGuard {
    min_mode_dwell: chrono::Duration,
    power_hysteresis_w: f64,
    max_mode_changes_per_hour: u32,
    state: RwLock<GuardState>,
}

fn bypasses_guard(source: Source) -> bool {
    matches!(source, Source::Safety | Source::Override)
}

impl AntiOscillationGuard {
    pub fn new(min_mode_dwell_s: i64, power_hysteresis_w: f64, max_mode_changes_per_hour: u32, now: DateTime<Utc>) -> Self {
        Self {
            min_mode_dwell: chrono::Duration::seconds(min_mode_dwell_s),
            power_hysteresis_w,
            max_mode_changes_per_hour,
            state: RwLock::new(GuardState {
                current_mode: Mode::SelfUse,
                current_power_w: 0.0,
                last_mode_change_at: now - chrono::Duration::days(1),
                recent_mode_changes: VecDeque::new(),
            }),
        }
    }

    /// Returns the decision actually safe to apply: either `decision` as-is,
    /// or a suppressed variant holding the previous mode/power in place.
    pub async fn apply(&self, decision: ArbitratorDecision, now: DateTime<Utc>) -> ArbitratorDecision {
        let mut state = self.state.write().await;
        let mode_changed = decision.target_mode != state.current_mode;
        let bypass = bypasses_guard(decision.source);

        if mode_changed && !bypass {
            let since_last = now - state.last_mode_change_at;
            if since_last < self.min_mode_dwell {
                let remaining = (self.min_mode_dwell - since_last).num_seconds();
                warn!(remaining_s = remaining, target = %decision.target_mode, "anti-oscillation: dwell not satisfied, holding mode");
                return ArbitratorDecision {
                    target_mode: state.current_mode,
                    power_w: state.current_power_w,
                    export_cap_w: decision.export_cap_w,
                    source: decision.source,
                    rationale: format!("suppressed ({}, dwell {}s remaining)", decision.rationale, remaining),
                };
            }

            prune_older_than_hour(&mut state.recent_mode_changes, now);
            if state.recent_mode_changes.len() as u32 >= self.max_mode_changes_per_hour {
                warn!(target = %decision.target_mode, "anti-oscillation: hourly mode change budget exhausted, holding mode");
                return ArbitratorDecision {
                    target_mode: state.current_mode,
                    power_w: state.current_power_w,
                    export_cap_w: decision.export_cap_w,
                    source: decision.source,
                    rationale: format!("suppressed ({}, hourly change budget exhausted)", decision.rationale),
                };
            }

            state.recent_mode_changes.push_back(now);
            state.current_mode = decision.target_mode;
            state.current_power_w = decision.power_w;
            state.last_mode_change_at = now;
            return decision;
        }

        if mode_changed && bypass {
            state.current_mode = decision.target_mode;
            state.current_power_w = decision.power_w;
            state.last_mode_change_at = now;
            prune_older_than_hour(&mut state.recent_mode_changes, now);
            state.recent_mode_changes.push_back(now);
            return decision;
        }

        if (decision.power_w - state.current_power_w).abs() < self.power_hysteresis_w {
            return ArbitratorDecision {
                power_w: state.current_power_w,
                ..decision
            };
        }

        state.current_power_w = decision.power_w;
        decision
    }
}

fn prune_older_than_hour(changes: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>) {
    let cutoff = now - chrono::Duration::hours(1);
    while changes.front().map(|t| *t < cutoff).unwrap_or(false) {
        changes.pop_front();
    }
}

pub fn refresh_interval(seconds: u64) -> StdDuration {
    StdDuration::from_secs(seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn decision(mode: Mode, power_w: f64, source: Source) -> ArbitratorDecision {
        ArbitratorDecision {
            target_mode: mode,
            power_w,
            export_cap_w: None,
            source,
            rationale: "test".into(),
        }
    }

    #[tokio::test]
    async fn mode_change_within_dwell_is_suppressed() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let guard = AntiOscillationGuard::new(600, 200.0, 6, now);
        let d = decision(Mode::ForceCharge, 1000.0, Source::Plan);
        let applied = guard.apply(d, now + chrono::Duration::seconds(60)).await;
        assert_eq!(applied.target_mode, Mode::SelfUse);
    }

    #[tokio::test]
    async fn mode_change_after_dwell_is_applied() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let guard = AntiOscillationGuard::new(600, 200.0, 6, now);
        let d = decision(Mode::ForceCharge, 1000.0, Source::Plan);
        let applied = guard.apply(d, now + chrono::Duration::hours(1)).await;
        assert_eq!(applied.target_mode, Mode::ForceCharge);
    }

    #[tokio::test]
    async fn safety_bypasses_dwell() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let guard = AntiOscillationGuard::new(600, 200.0, 6, now);
        let d = decision(Mode::SelfUse, 0.0, Source::Safety);
        let applied = guard.apply(d, now + chrono::Duration::seconds(5)).await;
        assert_eq!(applied.target_mode, Mode::SelfUse);
    }

    #[tokio::test]
    async fn small_power_delta_is_held_at_previous_value() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let guard = AntiOscillationGuard::new(600, 200.0, 6, now);
        let first = decision(Mode::ForceCharge, 1000.0, Source::Safety);
        guard.apply(first, now).await;

        let second = decision(Mode::ForceCharge, 1050.0, Source::Plan);
        let applied = guard.apply(second, now + chrono::Duration::seconds(10)).await;
        assert_eq!(applied.power_w, 1000.0);
    }

    #[tokio::test]
    async fn hourly_budget_limits_mode_changes() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let guard = AntiOscillationGuard::new(0, 200.0, 2, now);
        let modes = [Mode::ForceCharge, Mode::SelfUse, Mode::ForceDischarge];
        let mut last = None;
        for (i, m) in modes.iter().enumerate() {
            let t = now + chrono::Duration::minutes(i as i64);
            last = Some(guard.apply(decision(*m, 500.0, Source::Plan), t).await);
        }
        // Budget of 2 changes/hour: the third distinct-mode request is suppressed.
        assert_eq!(last.unwrap().target_mode, Mode::SelfUse);
    }
}
