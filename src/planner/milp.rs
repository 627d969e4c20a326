use std::time::Duration as StdDuration;

use good_lp::{constraint, variable, Expression, ProblemVariables, Solution, SolverModel, Variable};
use tracing::{info, warn};

use crate::domain::{Mode, Plan, PlanSlot, PlanStatus, Slot};
use crate::error::PlannerError;

use super::types::{PlanInput, KWH_PER_W_SLOT, SLOT_HOURS};

/// MILP-based plan generator (§4.3). Owns no state; every call is a pure
/// function of `PlanInput` plus solver configuration.
pub struct MilpPlanner {
    pub wall_timeout: StdDuration,
}

impl MilpPlanner {
    pub fn new(wall_timeout: StdDuration) -> Self {
        Self { wall_timeout }
    }

    /// Runs the solver on a blocking thread (the planner is CPU-bound and
    /// must not stall the tick/refresh tasks) and enforces the wall clock
    /// budget from outside, since CBC has no portable time-limit knob.
    pub async fn build_plan(&self, input: PlanInput, now_built_at: chrono::DateTime<chrono::Utc>) -> Result<Plan, PlannerError> {
        if input.forecast.points.is_empty() {
            return Err(PlannerError::EmptyForecast);
        }
        let wall_timeout = self.wall_timeout;
        let handle = tokio::task::spawn_blocking(move || solve_with_retry(input, now_built_at));
        match tokio::time::timeout(wall_timeout, handle).await {
            Ok(Ok(plan)) => Ok(plan),
            Ok(Err(_join_err)) => Err(PlannerError::Solver("planner task panicked".into())),
            Err(_elapsed) => Err(PlannerError::Timeout {
                wall_ms: wall_timeout.as_millis() as u64,
            }),
        }
    }
}

fn solve_with_retry(input: PlanInput, built_at: chrono::DateTime<chrono::Utc>) -> Plan {
    if let Some(plan) = solve_once(&input, built_at, false) {
        return plan;
    }
    warn!("MILP infeasible at nominal bounds, retrying with relaxed SOC floor and storm reserve");
    if let Some(plan) = solve_once(&input, built_at, true) {
        return plan;
    }
    warn!("MILP infeasible after relaxation, emitting fallback SELF_USE plan");
    let slots: Vec<Slot> = input.forecast.points.iter().map(|p| p.slot).collect();
    Plan::fallback(built_at, input.soc_0, slots)
}

struct LoadVars {
    x: Vec<Variable>,
    start: Vec<Variable>,
}

fn solve_once(input: &PlanInput, built_at: chrono::DateTime<chrono::Utc>, relaxed: bool) -> Option<Plan> {
    let n = input.forecast.points.len();
    let (eta_c, eta_d) = input.battery.split_efficiency();
    let soc_min_soft = if relaxed { input.battery.soc_min_hard } else { input.battery.soc_min_soft };
    let storm_reserve = if relaxed { input.battery.soc_min_soft.max(input.storm_reserve_soc * 0.9) } else { input.storm_reserve_soc };

    let percentile = if input.forecast.is_degraded()
        && input
            .forecast
            .degraded_reasons
            .contains(&crate::domain::DegradedReason::SolarStale)
    {
        crate::domain::SolarPercentile::P10
    } else {
        input.percentile
    };

    let solar_w: Vec<f64> = input
        .forecast
        .points
        .iter()
        .map(|p| p.solar_for(percentile))
        .collect();
    let load_w: Vec<f64> = input.forecast.points.iter().map(|p| p.load_forecast_w).collect();

    let mut vars = ProblemVariables::new();
    let c_grid = vars.add_vector(variable().min(0.0), n);
    let c_pv = vars.add_vector(variable().min(0.0), n);
    let d_load = vars.add_vector(variable().min(0.0), n);
    let d_grid = vars.add_vector(variable().min(0.0), n);
    let imp = vars.add_vector(variable().min(0.0), n);
    let exp = vars.add_vector(variable().min(0.0), n);
    let soc = vars.add_vector(variable().min(0.0).max(1.0), n + 1);

    let mut y_mode: Vec<[Variable; 5]> = Vec::with_capacity(n);
    for _ in 0..n {
        y_mode.push(std::array::from_fn(|_| vars.add(variable().binary())));
    }

    let eligible: Vec<Vec<bool>> = input
        .forecast
        .points
        .iter()
        .map(|p| {
            let weekday = crate::domain::Weekday::from(chrono::Datelike::weekday(&p.slot.start));
            input
                .loads
                .iter()
                .map(|l| l.eligible_on(weekday) && l.hour_in_window(chrono::Timelike::hour(&p.slot.start) as u8))
                .collect()
        })
        .collect();

    let mut load_vars: Vec<LoadVars> = Vec::with_capacity(input.loads.len());
    for _ in &input.loads {
        let x = vars.add_vector(variable().binary(), n);
        let start = vars.add_vector(variable().binary(), n);
        load_vars.push(LoadVars { x, start });
    }

    // Objective.
    let mut objective = Expression::from(0.0);
    for t in 0..n {
        let import_c = input.tariff.get(t).map(|p| p.import_c).unwrap_or(0.0);
        let export_c = input.tariff.get(t).map(|p| p.export_c).unwrap_or(0.0);
        objective += imp[t] * (KWH_PER_W_SLOT * import_c);
        objective -= exp[t] * (KWH_PER_W_SLOT * export_c);
        objective += (c_grid[t] + c_pv[t] + d_load[t] + d_grid[t])
            * (KWH_PER_W_SLOT * input.battery.degradation_c_per_kwh);

        let spread_ok = export_c - import_c > 2.0 * input.battery.degradation_c_per_kwh / input.battery.round_trip_eff;
        if spread_ok {
            objective -= y_mode[t][Mode::ForceDischarge.as_u8() as usize - 1] * input.arbitrage_lambda_c;
        }

        for (l_idx, load) in input.loads.iter().enumerate() {
            let w = load.priority_class as f64 * input.load_shed_weight_c;
            objective -= load_vars[l_idx].x[t] * w;
            if load.prefer_solar {
                objective -= load_vars[l_idx].x[t] * (input.prefer_solar_rho * solar_w[t]);
            }
        }
    }

    let mut problem = vars.minimise(objective).using(good_lp::default_solver);

    problem = problem.with(constraint!(soc[0] == input.soc_0));

    for t in 0..n {
        let scheduled_load_sum: Expression = input
            .loads
            .iter()
            .enumerate()
            .map(|(l_idx, load)| load_vars[l_idx].x[t] * load.power_w)
            .sum();

        problem = problem.with(constraint!(
            solar_w[t] + imp[t] + d_load[t] == load_w[t] + scheduled_load_sum.clone() + c_pv[t] + exp[t]
        ));
        problem = problem.with(constraint!(c_grid[t] <= imp[t]));
        problem = problem.with(constraint!(d_grid[t] <= exp[t]));

        let soc_delta = (eta_c * (c_pv[t] + c_grid[t]) - (d_load[t] + d_grid[t]) / eta_d)
            * (SLOT_HOURS / (input.battery.capacity_kwh * 1000.0));
        problem = problem.with(constraint!(soc[t + 1] == soc[t] + soc_delta));

        problem = problem.with(constraint!(soc[t + 1] >= soc_min_soft));
        problem = problem.with(constraint!(soc[t + 1] <= input.battery.soc_max));
        if input.forecast.points[t].storm_prob >= input.storm_probability_threshold {
            problem = problem.with(constraint!(soc[t + 1] >= storm_reserve));
        }

        problem = problem.with(constraint!(c_pv[t] + c_grid[t] <= input.battery.max_charge_w));
        problem = problem.with(constraint!(d_load[t] + d_grid[t] <= input.battery.max_discharge_w));

        let m = input.battery.max_charge_w.max(input.battery.max_discharge_w) + solar_w[t] + load_w[t] + 1.0;
        // Mode gating, Big-M per spec.
        problem = problem.with(constraint!(c_grid[t] <= m * (1.0 - y_mode[t][0]))); // SELF_USE
        problem = problem.with(constraint!(c_grid[t] <= m * (1.0 - y_mode[t][1]))); // SELF_USE_ZERO_EXPORT
        problem = problem.with(constraint!(exp[t] <= m * (1.0 - y_mode[t][1])));
        problem = problem.with(constraint!(d_load[t] <= m * (1.0 - y_mode[t][2]))); // FORCE_CHARGE
        problem = problem.with(constraint!(d_grid[t] <= m * (1.0 - y_mode[t][2])));
        problem = problem.with(constraint!(c_pv[t] <= m * (1.0 - y_mode[t][3]))); // FORCE_DISCHARGE
        problem = problem.with(constraint!(c_grid[t] <= m * (1.0 - y_mode[t][3])));
        problem = problem.with(constraint!(c_grid[t] <= m * (1.0 - y_mode[t][4]))); // CHARGE_NO_IMPORT

        let mode_sum: Expression = y_mode[t].iter().copied().sum();
        problem = problem.with(constraint!(mode_sum == 1.0));

        for (l_idx, load) in input.loads.iter().enumerate() {
            if !eligible[t][l_idx] {
                problem = problem.with(constraint!(load_vars[l_idx].x[t] == 0.0));
            }
            let _ = load;
        }
    }

    for (l_idx, load) in input.loads.iter().enumerate() {
        let minutes_per_slot = SLOT_HOURS * 60.0;
        let runtime: Expression = (0..n).map(|t| load_vars[l_idx].x[t] * minutes_per_slot).sum();
        if eligible.iter().any(|row| row[l_idx]) {
            problem = problem.with(constraint!(runtime.clone() >= load.min_runtime_min as f64));
        }
        problem = problem.with(constraint!(runtime <= load.max_runtime_min as f64));

        if !load.allow_split_shifts {
            for t in 0..n {
                let prev: Expression = if t == 0 {
                    Expression::from(0.0)
                } else {
                    load_vars[l_idx].x[t - 1].into()
                };
                problem = problem.with(constraint!(
                    load_vars[l_idx].start[t] >= load_vars[l_idx].x[t] - prev
                ));
            }
            let starts: Expression = load_vars[l_idx].start.iter().copied().sum();
            problem = problem.with(constraint!(starts <= 1.0));
        }
    }

    let solution = match problem.solve() {
        Ok(s) => s,
        Err(e) => {
            info!(error = %e, relaxed, "MILP solve did not return a usable solution");
            return None;
        }
    };

    let mut slots = Vec::with_capacity(n);
    let mut objective_cents = 0.0f64;
    for (t, point) in input.forecast.points.iter().enumerate() {
        let mode = (1..=5u8)
            .find(|&m| solution.value(y_mode[t][(m - 1) as usize]) > 0.5)
            .and_then(|m| match m {
                1 => Some(Mode::SelfUse),
                2 => Some(Mode::SelfUseZeroExport),
                3 => Some(Mode::ForceCharge),
                4 => Some(Mode::ForceDischarge),
                5 => Some(Mode::ChargeNoImport),
                _ => None,
            })
            .unwrap_or(Mode::SelfUse);

        let scheduled_loads: std::collections::BTreeSet<String> = input
            .loads
            .iter()
            .enumerate()
            .filter(|(l_idx, _)| solution.value(load_vars[*l_idx].x[t]) > 0.5)
            .map(|(_, l)| l.name.clone())
            .collect();

        let import_c = input.tariff.get(t).map(|p| p.import_c).unwrap_or(0.0);
        let export_c = input.tariff.get(t).map(|p| p.export_c).unwrap_or(0.0);
        let c_grid_v = solution.value(c_grid[t]);
        let c_pv_v = solution.value(c_pv[t]);
        let d_load_v = solution.value(d_load[t]);
        let d_grid_v = solution.value(d_grid[t]);
        objective_cents += solution.value(imp[t]) * KWH_PER_W_SLOT * import_c;
        objective_cents -= solution.value(exp[t]) * KWH_PER_W_SLOT * export_c;
        objective_cents +=
            (c_grid_v + c_pv_v + d_load_v + d_grid_v) * KWH_PER_W_SLOT * input.battery.degradation_c_per_kwh;
        let spread_ok = export_c - import_c > 2.0 * input.battery.degradation_c_per_kwh / input.battery.round_trip_eff;
        if spread_ok && solution.value(y_mode[t][Mode::ForceDischarge.as_u8() as usize - 1]) > 0.5 {
            objective_cents -= input.arbitrage_lambda_c;
        }
        for (l_idx, load) in input.loads.iter().enumerate() {
            if solution.value(load_vars[l_idx].x[t]) > 0.5 {
                objective_cents -= load.priority_class as f64 * input.load_shed_weight_c;
                if load.prefer_solar {
                    objective_cents -= input.prefer_solar_rho * solar_w[t];
                }
            }
        }

        slots.push(PlanSlot {
            slot: point.slot,
            mode,
            charge_w: c_pv_v + c_grid_v,
            discharge_w: d_load_v + d_grid_v,
            expected_soc: solution.value(soc[t + 1]),
            scheduled_loads,
        });
    }

    let horizon_end = slots.last().map(|s| s.slot.end()).unwrap_or(built_at);
    Some(Plan {
        slots,
        built_at,
        horizon_end,
        forecast_hash: input.forecast.content_hash(),
        tariff_hash: tariff_content_hash(&input.tariff),
        battery_soc_at_build: input.soc_0,
        objective_cents,
        status: if relaxed { PlanStatus::Feasible } else { PlanStatus::Optimal },
    })
}

fn tariff_content_hash(points: &[crate::domain::TariffPoint]) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    for p in points {
        p.slot.start.timestamp().hash(&mut hasher);
        ((p.import_c * 1000.0).round() as i64).hash(&mut hasher);
        ((p.export_c * 1000.0).round() as i64).hash(&mut hasher);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Forecast48h, ForecastPoint, LoadDefinition, TariffPoint, Weekday};
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use std::collections::BTreeSet;

    fn battery(soc_min_hard: f64, soc_min_soft: f64, soc_max: f64) -> crate::domain::BatteryParams {
        crate::domain::BatteryParams {
            capacity_kwh: 10.0,
            soc_min_hard,
            soc_min_soft,
            soc_max,
            max_charge_w: 3000.0,
            max_discharge_w: 3000.0,
            round_trip_eff: 0.9,
            degradation_c_per_kwh: 2.0,
        }
    }

    fn day_forecast(start: chrono::DateTime<Utc>, solar_peak_w: f64) -> Forecast48h {
        let points = (0..48)
            .map(|i| {
                let slot = Slot::containing(start + ChronoDuration::minutes(i * 30));
                let hour = chrono::Timelike::hour(&slot.start) as f64;
                let bell = ((hour - 13.0).powi(2) / -18.0).exp();
                let solar = (solar_peak_w * bell).max(0.0);
                ForecastPoint {
                    slot,
                    solar_p10_w: solar * 0.7,
                    solar_p50_w: solar,
                    solar_p90_w: solar * 1.2,
                    load_forecast_w: 400.0,
                    temp_c: 20.0,
                    cloud_frac: 0.2,
                    wind_mps: 3.0,
                    rain_mm: 0.0,
                    storm_prob: 0.0,
                    produced_at: start,
                }
            })
            .collect();
        Forecast48h {
            built_at: start,
            points,
            degraded_reasons: BTreeSet::new(),
        }
    }

    fn flat_tariff(forecast: &Forecast48h, import_c: f64, export_c: f64) -> Vec<TariffPoint> {
        forecast
            .points
            .iter()
            .map(|p| TariffPoint {
                slot: p.slot,
                import_c,
                export_c,
                spike_flag: false,
            })
            .collect()
    }

    fn base_input(forecast: Forecast48h, battery: crate::domain::BatteryParams, loads: Vec<LoadDefinition>) -> PlanInput {
        let tariff = flat_tariff(&forecast, 25.0, 8.0);
        PlanInput {
            forecast,
            tariff,
            battery,
            loads,
            percentile: crate::domain::SolarPercentile::P50,
            soc_0: 0.5,
            storm_probability_threshold: 0.5,
            storm_reserve_soc: 0.6,
            load_shed_weight_c: 1.0,
            prefer_solar_rho: 0.01,
            arbitrage_lambda_c: 1.0,
        }
    }

    #[tokio::test]
    async fn infeasible_bounds_fall_back_to_self_use() {
        let start = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        let forecast = day_forecast(start, 2000.0);
        // soc_min_hard above soc_max makes both the nominal and relaxed
        // solve infeasible, per the injected-config-bug scenario.
        let battery = battery(0.99, 0.99, 0.5);
        let input = base_input(forecast, battery, vec![]);
        let planner = MilpPlanner::new(StdDuration::from_secs(10));
        let plan = planner.build_plan(input, start).await.expect("fallback plan, not an error");
        assert_eq!(plan.status, PlanStatus::Fallback);
        assert!(plan.slots.iter().all(|s| s.mode == Mode::SelfUse));
        assert!(plan.slots.iter().all(|s| s.charge_w == 0.0 && s.discharge_w == 0.0));
    }

    #[tokio::test]
    async fn load_runtime_stays_within_bounds_and_window() {
        let start = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        let forecast = day_forecast(start, 4000.0);
        let battery = battery(0.05, 0.15, 0.95);
        let load = LoadDefinition {
            name: "dishwasher".into(),
            power_w: 1200.0,
            priority_class: 3,
            min_runtime_min: 60,
            ideal_runtime_min: 120,
            max_runtime_min: 180,
            earliest_h: 10,
            latest_h: 18,
            days_of_week: [
                Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri, Weekday::Sat, Weekday::Sun,
            ]
            .into_iter()
            .collect(),
            prefer_solar: true,
            allow_split_shifts: false,
            enabled: true,
        };
        let input = base_input(forecast, battery, vec![load]);
        let planner = MilpPlanner::new(StdDuration::from_secs(15));
        let plan = planner.build_plan(input, start).await.expect("feasible plan");

        let on_slots: Vec<&PlanSlot> = plan
            .slots
            .iter()
            .filter(|s| s.scheduled_loads.contains("dishwasher"))
            .collect();
        let minutes: u32 = on_slots.len() as u32 * 30;
        assert!(minutes >= 60 && minutes <= 180, "runtime {minutes} out of bounds");
        for s in &on_slots {
            let hour = chrono::Timelike::hour(&s.slot.start);
            assert!(hour >= 10 && hour < 18, "load ran outside its window at hour {hour}");
        }
        // allow_split_shifts = false: the on-slots must be one contiguous run.
        if !on_slots.is_empty() {
            let mut starts: Vec<chrono::DateTime<Utc>> = on_slots.iter().map(|s| s.slot.start).collect();
            starts.sort();
            for w in starts.windows(2) {
                assert_eq!(w[1] - w[0], ChronoDuration::minutes(30), "split shift detected");
            }
        }
    }
}
