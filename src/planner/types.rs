use crate::domain::{BatteryParams, Forecast48h, LoadDefinition, SolarPercentile, TariffPoint};

/// Everything the MILP planner needs for one `build_plan` call. Assembled by
/// the tick loop from the forecast aggregator, tariff series and current
/// config snapshot so the planner itself stays a pure function of its input.
pub struct PlanInput {
    pub forecast: Forecast48h,
    /// Tariff points aligned 1:1 with `forecast.points` by slot.
    pub tariff: Vec<TariffPoint>,
    pub battery: BatteryParams,
    pub loads: Vec<LoadDefinition>,
    pub percentile: SolarPercentile,
    pub soc_0: f64,
    pub storm_probability_threshold: f64,
    pub storm_reserve_soc: f64,
    pub load_shed_weight_c: f64,
    pub prefer_solar_rho: f64,
    pub arbitrage_lambda_c: f64,
}

pub const SLOT_HOURS: f64 = 0.5;
pub const KWH_PER_W_SLOT: f64 = SLOT_HOURS / 1000.0;
