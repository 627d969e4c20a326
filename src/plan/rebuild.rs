use chrono::{DateTime, Duration, Utc};

use crate::domain::Plan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum RebuildReason {
    NoPlanYet,
    Aged,
    SocDrift,
    ForecastChanged,
    TariffChanged,
    OverrideExpired,
    RetryBackoffElapsed,
}

/// Everything the rebuild evaluator needs, gathered by the tick loop before
/// each decision (§4.4).
pub struct RebuildContext<'a> {
    pub now: DateTime<Utc>,
    pub current_soc: f64,
    pub forecast_hash: u64,
    pub tariff_hash: u64,
    pub override_just_expired: bool,
    pub plan: Option<&'a Plan>,
    pub max_age: Duration,
    pub soc_drift_threshold: f64,
    pub last_status_non_optimal: bool,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub retry_backoff: Duration,
}

/// Returns the first-matched reason a rebuild is needed, or `None` if the
/// cached plan is still valid. Checked in the order listed in §4.4.
pub fn rebuild_needed(ctx: &RebuildContext) -> Option<RebuildReason> {
    let plan = match ctx.plan {
        Some(p) => p,
        None => return Some(RebuildReason::NoPlanYet),
    };
    if ctx.now >= plan.built_at + ctx.max_age {
        return Some(RebuildReason::Aged);
    }
    if (ctx.current_soc - plan.expected_soc_at(ctx.now)).abs() > ctx.soc_drift_threshold {
        return Some(RebuildReason::SocDrift);
    }
    if ctx.forecast_hash != plan.forecast_hash {
        return Some(RebuildReason::ForecastChanged);
    }
    if ctx.tariff_hash != plan.tariff_hash {
        return Some(RebuildReason::TariffChanged);
    }
    if ctx.override_just_expired {
        return Some(RebuildReason::OverrideExpired);
    }
    if ctx.last_status_non_optimal {
        let backoff_elapsed = match ctx.last_attempt_at {
            Some(attempt) => ctx.now >= attempt + ctx.retry_backoff,
            None => true,
        };
        if backoff_elapsed {
            return Some(RebuildReason::RetryBackoffElapsed);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Slot;
    use chrono::TimeZone;

    fn built_plan(built_at: DateTime<Utc>, soc: f64) -> Plan {
        Plan::fallback(built_at, soc, Slot::horizon_from(built_at))
    }

    fn base_ctx(now: DateTime<Utc>, plan: &Plan) -> RebuildContext<'_> {
        RebuildContext {
            now,
            current_soc: plan.battery_soc_at_build,
            forecast_hash: plan.forecast_hash,
            tariff_hash: plan.tariff_hash,
            override_just_expired: false,
            plan: Some(plan),
            max_age: Duration::minutes(30),
            soc_drift_threshold: 0.10,
            last_status_non_optimal: false,
            last_attempt_at: None,
            retry_backoff: Duration::minutes(10),
        }
    }

    #[test]
    fn no_plan_triggers_rebuild() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let ctx = RebuildContext {
            now,
            current_soc: 0.5,
            forecast_hash: 1,
            tariff_hash: 1,
            override_just_expired: false,
            plan: None,
            max_age: Duration::minutes(30),
            soc_drift_threshold: 0.10,
            last_status_non_optimal: false,
            last_attempt_at: None,
            retry_backoff: Duration::minutes(10),
        };
        assert_eq!(rebuild_needed(&ctx), Some(RebuildReason::NoPlanYet));
    }

    #[test]
    fn fresh_matching_plan_needs_no_rebuild() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let plan = built_plan(now, 0.5);
        let ctx = base_ctx(now, &plan);
        assert_eq!(rebuild_needed(&ctx), None);
    }

    #[test]
    fn aged_plan_triggers_rebuild() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let plan = built_plan(now, 0.5);
        let mut ctx = base_ctx(now + Duration::minutes(31), &plan);
        ctx.now = now + Duration::minutes(31);
        assert_eq!(rebuild_needed(&ctx), Some(RebuildReason::Aged));
    }

    #[test]
    fn soc_drift_triggers_rebuild() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let plan = built_plan(now, 0.5);
        let mut ctx = base_ctx(now, &plan);
        ctx.current_soc = 0.65;
        assert_eq!(rebuild_needed(&ctx), Some(RebuildReason::SocDrift));
    }

    #[test]
    fn hash_mismatch_triggers_rebuild() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let plan = built_plan(now, 0.5);
        let mut ctx = base_ctx(now, &plan);
        ctx.forecast_hash = plan.forecast_hash + 1;
        assert_eq!(rebuild_needed(&ctx), Some(RebuildReason::ForecastChanged));
    }

    #[test]
    fn non_optimal_respects_backoff() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let plan = built_plan(now, 0.5);
        let mut ctx = base_ctx(now, &plan);
        ctx.last_status_non_optimal = true;
        ctx.last_attempt_at = Some(now);
        assert_eq!(rebuild_needed(&ctx), None);

        ctx.now = now + Duration::minutes(11);
        assert_eq!(rebuild_needed(&ctx), Some(RebuildReason::RetryBackoffElapsed));
    }
}
