use serde::{Deserialize, Serialize};
use validator::Validate;

/// Static battery/inverter parameters the planner and arbitrator reason about.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Validate)]
pub struct BatteryParams {
    #[validate(range(min = 0.1))]
    pub capacity_kwh: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub soc_min_hard: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub soc_min_soft: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub soc_max: f64,
    #[validate(range(min = 0.0))]
    pub max_charge_w: f64,
    #[validate(range(min = 0.0))]
    pub max_discharge_w: f64,
    #[validate(range(exclusive_min = 0.0, max = 1.0))]
    pub round_trip_eff: f64,
    #[validate(range(min = 0.0))]
    pub degradation_c_per_kwh: f64,
}

impl BatteryParams {
    /// Split round-trip efficiency into equal charge/discharge legs so that
    /// `eta_c * eta_d == round_trip_eff`, matching the MILP SOC-update formula.
    pub fn split_efficiency(&self) -> (f64, f64) {
        let leg = self.round_trip_eff.sqrt();
        (leg, leg)
    }

    pub fn is_consistent(&self) -> bool {
        self.soc_min_hard <= self.soc_min_soft
            && self.soc_min_soft <= self.soc_max
            && self.capacity_kwh > 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub soc: f64,
    pub solar_w: f64,
    pub load_w: f64,
    /// Positive = import, negative = export.
    pub grid_w: f64,
    /// Positive = charge, negative = discharge.
    pub battery_w: f64,
    pub inverter_mode: super::mode::Mode,
    pub fault_flags: u32,
    pub read_at: chrono::DateTime<chrono::Utc>,
}

impl Telemetry {
    pub fn has_fault(&self) -> bool {
        self.fault_flags != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> BatteryParams {
        BatteryParams {
            capacity_kwh: 10.0,
            soc_min_hard: 0.05,
            soc_min_soft: 0.15,
            soc_max: 0.95,
            max_charge_w: 5000.0,
            max_discharge_w: 5000.0,
            round_trip_eff: 0.9,
            degradation_c_per_kwh: 2.0,
        }
    }

    #[test]
    fn split_efficiency_multiplies_back_to_round_trip() {
        let p = params();
        let (c, d) = p.split_efficiency();
        assert!((c * d - p.round_trip_eff).abs() < 1e-9);
    }

    #[test]
    fn consistent_bounds_pass() {
        assert!(params().is_consistent());
    }
}
