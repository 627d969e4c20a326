#![allow(dead_code)]
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use validator::Validate;

/// Top-level, hot-reloadable configuration document (spec.md §6).
///
/// A tick reads one `Arc<Config>` snapshot at tick start so a mid-tick
/// reload can never split a single decision across two configurations.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct Config {
    #[validate(nested)]
    pub server: ServerConfig,
    #[validate(nested)]
    pub hardware: HardwareConfig,
    #[validate(nested)]
    pub battery: BatteryConfig,
    #[validate(nested)]
    pub providers: ProvidersConfig,
    #[validate(nested)]
    pub tariff: TariffConfig,
    #[validate(nested)]
    pub storm: StormConfig,
    #[validate(nested)]
    pub planning: PlanningConfig,
    #[serde(default)]
    pub loads: Vec<crate::domain::LoadDefinition>,
    #[validate(nested)]
    pub mqtt: MqttConfig,
    #[validate(nested)]
    pub dashboard: DashboardConfig,
    #[validate(nested)]
    pub accounting: AccountingConfig,
    #[validate(nested)]
    pub fixed_costs: FixedCostsConfig,
    #[validate(nested)]
    pub resilience: ResilienceConfig,
    #[validate(nested)]
    pub anti_oscillation: AntiOscillationConfig,
    #[validate(nested)]
    pub database: DatabaseConfig,
    #[validate(nested)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1, max = 65535))]
    pub port: u16,
    #[serde(default = "default_bearer_token")]
    pub bearer_token: String,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .context("failed to parse server.host:port")
    }
}

/// Fields in this struct require a process restart to take effect; the
/// hot-reload watcher refuses to apply a snapshot where these differ.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct HardwareConfig {
    #[serde(default = "default_hardware_mode")]
    pub mode: HardwareMode,
    #[validate(range(min = 1, max = 30000))]
    pub modbus_read_timeout_ms: u64,
    #[serde(default)]
    pub modbus_address: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareMode {
    Simulated,
    Modbus,
    Mock,
}

fn default_hardware_mode() -> HardwareMode {
    HardwareMode::Simulated
}

/// `capacity_kwh` requires a restart (changing it mid-cycle would invalidate
/// the accounting engine's `stored_energy_kwh` invariant).
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct BatteryConfig {
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
    #[validate(range(min = 0.0, max = 1.0))]
    pub initial_soc: f64,
}

impl BatteryConfig {
    pub fn to_params(&self) -> crate::domain::BatteryParams {
        crate::domain::BatteryParams {
            capacity_kwh: self.capacity_kwh,
            soc_min_hard: self.soc_min_hard,
            soc_min_soft: self.soc_min_soft,
            soc_max: self.soc_max,
            max_charge_w: self.max_charge_w,
            max_discharge_w: self.max_discharge_w,
            round_trip_eff: self.round_trip_eff,
            degradation_c_per_kwh: self.degradation_c_per_kwh,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ProvidersConfig {
    #[validate(nested)]
    pub solar: ProviderEndpointConfig,
    #[validate(nested)]
    pub weather: ProviderEndpointConfig,
    #[validate(nested)]
    pub storm: ProviderEndpointConfig,
    #[validate(nested)]
    pub tariff: ProviderEndpointConfig,
    #[serde(default = "default_baseline_load_w")]
    pub baseline_load_w: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ProviderEndpointConfig {
    #[validate(length(min = 1))]
    pub base_url: String,
    #[validate(range(min = 1, max = 300))]
    pub http_timeout_secs: u64,
    #[validate(range(min = 60))]
    pub fresh_ttl_secs: u64,
    #[validate(range(min = 60))]
    pub hard_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct TariffConfig {
    pub spike_threshold_c: f64,
    #[serde(default = "default_spike_hysteresis_ratio")]
    pub spike_hysteresis_ratio: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct StormConfig {
    #[validate(range(min = 0.0, max = 1.0))]
    pub probability_threshold: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub reserve_soc: f64,
    #[validate(range(min = 0.0))]
    pub charge_w: f64,
    #[validate(range(min = 1, max = 48))]
    pub horizon_hours: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct PlanningConfig {
    #[serde(default = "default_percentile")]
    pub solar_percentile: String,
    #[validate(range(min = 60))]
    pub max_age_secs: i64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub soc_drift_threshold: f64,
    #[validate(range(min = 1, max = 300))]
    pub solver_wall_timeout_secs: u64,
    #[validate(range(min = 60))]
    pub retry_backoff_secs: i64,
    #[serde(default = "default_load_shed_weight")]
    pub load_shed_weight_c: f64,
    #[serde(default = "default_prefer_solar_rho")]
    pub prefer_solar_rho: f64,
    #[serde(default = "default_arbitrage_lambda")]
    pub arbitrage_lambda_c: f64,
    #[serde(default = "default_soc_floor_rate_w")]
    pub soc_floor_charge_w: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub opportunistic_min_soc: f64,
    #[serde(default = "default_opportunistic_w")]
    pub opportunistic_discharge_w: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct MqttConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub broker_url: Option<String>,
    #[serde(default)]
    pub discovery_prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct DashboardConfig {
    #[serde(default = "default_sse_hz")]
    pub sse_hz: f64,
    #[serde(default = "default_history_hours")]
    pub default_history_hours: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct AccountingConfig {
    #[validate(range(min = 1, max = 28))]
    pub billing_cycle_day_of_month: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct FixedCostsConfig {
    #[serde(default)]
    pub daily_standing_charge_c: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ResilienceConfig {
    #[validate(range(min = 1))]
    pub max_consecutive_failures: u32,
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct AntiOscillationConfig {
    #[serde(default = "default_min_mode_dwell_s")]
    pub min_mode_dwell_s: i64,
    #[serde(default = "default_power_hysteresis_w")]
    pub power_hysteresis_w: f64,
    #[serde(default = "default_max_mode_changes")]
    pub max_mode_changes_per_hour: u32,
    #[serde(default = "default_refresh_interval_s")]
    pub refresh_interval_s: u64,
    #[serde(default = "default_tick_interval_s")]
    pub tick_interval_s: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct DatabaseConfig {
    #[validate(length(min = 1))]
    pub path: String,
    #[serde(default = "default_wal_checkpoint_secs")]
    pub wal_checkpoint_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_bearer_token() -> String {
    "change-me".to_string()
}
fn default_baseline_load_w() -> f64 {
    400.0
}
fn default_spike_hysteresis_ratio() -> f64 {
    0.9
}
fn default_percentile() -> String {
    "p50".to_string()
}
fn default_load_shed_weight() -> f64 {
    0.0
}
fn default_prefer_solar_rho() -> f64 {
    0.01
}
fn default_arbitrage_lambda() -> f64 {
    0.0
}
fn default_soc_floor_rate_w() -> f64 {
    500.0
}
fn default_opportunistic_w() -> f64 {
    2000.0
}
fn default_sse_hz() -> f64 {
    2.0
}
fn default_history_hours() -> u32 {
    48
}
fn default_backoff_initial_ms() -> u64 {
    200
}
fn default_backoff_max_ms() -> u64 {
    30_000
}
fn default_min_mode_dwell_s() -> i64 {
    600
}
fn default_power_hysteresis_w() -> f64 {
    200.0
}
fn default_max_mode_changes() -> u32 {
    6
}
fn default_refresh_interval_s() -> u64 {
    20
}
fn default_tick_interval_s() -> u64 {
    300
}
fn default_wal_checkpoint_secs() -> u64 {
    1800
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_with_env(None)
    }

    pub fn load_with_env(environment: Option<&str>) -> Result<Self> {
        let mut figment = Figment::new().merge(Toml::file("config/default.toml"));
        if let Some(env) = environment {
            figment = figment.merge(Toml::file(format!("config/{env}.toml")));
        } else {
            figment = figment.merge(Toml::file("config/local.toml").nested());
        }
        figment = figment.merge(Env::prefixed("PM__").split("__"));

        let config: Config = figment.extract().context("failed to parse configuration")?;
        config
            .validate()
            .context("configuration failed validation")?;
        Ok(config)
    }

    /// Fields that require a process restart if they differ from `other`.
    pub fn restart_required_diff(&self, other: &Config) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if self.battery.capacity_kwh != other.battery.capacity_kwh {
            changed.push("battery.capacity_kwh");
        }
        if self.hardware.mode != other.hardware.mode {
            changed.push("hardware.mode");
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_battery() -> BatteryConfig {
        BatteryConfig {
            capacity_kwh: 10.0,
            soc_min_hard: 0.05,
            soc_min_soft: 0.15,
            soc_max: 0.95,
            max_charge_w: 5000.0,
            max_discharge_w: 5000.0,
            round_trip_eff: 0.9,
            degradation_c_per_kwh: 2.0,
            initial_soc: 0.5,
        }
    }

    #[test]
    fn battery_config_converts_to_params() {
        let cfg = minimal_battery();
        let params = cfg.to_params();
        assert_eq!(params.capacity_kwh, 10.0);
        assert!(params.is_consistent());
    }

    #[test]
    fn restart_required_flags_capacity_change() {
        let a = minimal_battery();
        let mut b = minimal_battery();
        b.capacity_kwh = 12.0;
        assert_ne!(a.capacity_kwh, b.capacity_kwh);
    }
}
