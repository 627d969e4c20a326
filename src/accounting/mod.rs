//! Weighted-average cost basis tracking and billing-cycle rollup (§4.8).

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use tokio::sync::RwLock;

use crate::domain::{AccountingState, BillingCycle, CycleArchiveEvent, Mode};

const SECONDS_PER_HOUR: f64 = 3600.0;

/// One tick's worth of measured power and price, as consumed by the
/// accounting engine. `Δt` is the elapsed time since the previous tick.
pub struct TickEnergySample {
    pub elapsed_s: f64,
    pub grid_w: f64,
    pub solar_w: f64,
    pub load_w: f64,
    pub battery_w: f64,
    pub import_c: f64,
    pub export_c: f64,
    pub applied_mode: Mode,
}

pub struct AccountingEngine {
    capacity_kwh: f64,
    billing_cycle_day_of_month: u32,
    daily_standing_charge_c: f64,
    state: RwLock<AccountingState>,
    last_standing_charge_date: RwLock<Option<NaiveDate>>,
}

impl AccountingEngine {
    pub fn new(
        capacity_kwh: f64,
        billing_cycle_day_of_month: u32,
        daily_standing_charge_c: f64,
        initial_stored_kwh: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            capacity_kwh,
            billing_cycle_day_of_month,
            daily_standing_charge_c,
            state: RwLock::new(AccountingState::new(now.date_naive(), initial_stored_kwh)),
            last_standing_charge_date: RwLock::new(None),
        }
    }

    pub async fn snapshot(&self) -> AccountingState {
        self.state.read().await.clone()
    }

    /// Applies one tick's energy deltas (§4.8) and rolls the billing cycle
    /// over at local midnight on the configured day of month.
    pub async fn apply_tick(&self, now: DateTime<Utc>, sample: &TickEnergySample) -> Option<CycleArchiveEvent> {
        let mut state = self.state.write().await;
        let dt_h = sample.elapsed_s / SECONDS_PER_HOUR;

        let imported_kwh = sample.grid_w.max(0.0) * dt_h / 1000.0;
        let exported_kwh = (-sample.grid_w).max(0.0) * dt_h / 1000.0;
        let charged_kwh = sample.battery_w.max(0.0) * dt_h / 1000.0;
        let discharged_kwh = (-sample.battery_w).max(0.0) * dt_h / 1000.0;

        state.cycle.import_c += imported_kwh * sample.import_c;
        state.cycle.export_c += exported_kwh * sample.export_c;

        let self_consumed_kwh = sample.solar_w.min(sample.load_w).max(0.0) * dt_h / 1000.0;
        state.cycle.self_consumption_c += self_consumed_kwh * sample.import_c;

        if charged_kwh > 0.0 {
            let grid_sourced = imported_kwh.min(charged_kwh);
            let pv_sourced = charged_kwh - grid_sourced;
            let cost_c = grid_sourced * sample.import_c + pv_sourced * sample.export_c;
            let new_stored = state.stored_energy_kwh + charged_kwh;
            if new_stored > 0.0 {
                state.wacb_c_per_kwh =
                    (state.wacb_c_per_kwh * state.stored_energy_kwh + cost_c) / new_stored;
            }
            state.stored_energy_kwh = new_stored.min(self.capacity_kwh);
        }

        if discharged_kwh > 0.0 {
            state.stored_energy_kwh = (state.stored_energy_kwh - discharged_kwh).max(0.0);
            if sample.applied_mode == Mode::ForceDischarge && exported_kwh > 0.0 {
                state.cycle.arbitrage_c += (sample.export_c - state.wacb_c_per_kwh) * exported_kwh;
            }
        }

        state.stored_energy_kwh = state.stored_energy_kwh.clamp(0.0, self.capacity_kwh);

        let today = now.date_naive();
        let mut last_charge_date = self.last_standing_charge_date.write().await;
        if last_charge_date.map(|d| d != today).unwrap_or(true) {
            state.cycle.fixed_c += self.daily_standing_charge_c;
            *last_charge_date = Some(today);
        }
        drop(last_charge_date);

        if today.day() == self.billing_cycle_day_of_month && state.cycle.start_date != today {
            let archived = CycleArchiveEvent {
                cycle: state.cycle,
                archived_at: now,
            };
            state.cycle = BillingCycle::new(today);
            return Some(archived);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample(grid_w: f64, battery_w: f64, import_c: f64, export_c: f64) -> TickEnergySample {
        TickEnergySample {
            elapsed_s: 300.0,
            grid_w,
            solar_w: 0.0,
            load_w: 500.0,
            battery_w,
            import_c,
            export_c,
            applied_mode: Mode::SelfUse,
        }
    }

    #[tokio::test]
    async fn import_accumulates_cost() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let engine = AccountingEngine::new(10.0, 1, 0.0, 5.0, now);
        engine.apply_tick(now, &sample(500.0, 0.0, 30.0, 5.0)).await;
        let state = engine.snapshot().await;
        assert!(state.cycle.import_c > 0.0);
    }

    #[tokio::test]
    async fn charging_updates_wacb() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let engine = AccountingEngine::new(10.0, 1, 0.0, 0.0, now);
        let mut s = sample(1000.0, 1000.0, 30.0, 5.0);
        s.applied_mode = Mode::ForceCharge;
        engine.apply_tick(now, &s).await;
        let state = engine.snapshot().await;
        assert!(state.wacb_c_per_kwh > 0.0);
        assert!(state.stored_energy_kwh > 0.0);
    }

    #[tokio::test]
    async fn discharge_clears_stored_energy_without_going_negative() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let engine = AccountingEngine::new(10.0, 1, 0.0, 0.05, now);
        let mut s = sample(-500.0, -2000.0, 30.0, 5.0);
        s.applied_mode = Mode::ForceDischarge;
        engine.apply_tick(now, &s).await;
        let state = engine.snapshot().await;
        assert_eq!(state.stored_energy_kwh, 0.0);
    }
}
