use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration};

use crate::config::{Config, HardwareMode};
use crate::domain::{Mode, Telemetry};
use crate::error::InverterDriverError;

/// Operations the core expects from an inverter, regardless of transport.
/// Register encoding for real hardware is out of scope; this trait is the
/// seam the core depends on (§6, §9).
#[async_trait]
pub trait InverterDriver: Send + Sync {
    async fn read_telemetry(&self) -> Result<Telemetry, InverterDriverError>;
    async fn set_mode(
        &self,
        mode: Mode,
        power_w: Option<f64>,
        export_cap_w: Option<f64>,
    ) -> Result<(), InverterDriverError>;
}

/// In-process inverter model used for development and for hosts with no
/// physical hardware attached. State evolves naively towards whatever was
/// last commanded so the tick loop and dashboard have something believable
/// to show.
pub struct SimulatedInverter {
    state: Mutex<SimState>,
}

struct SimState {
    soc: f64,
    solar_w: f64,
    load_w: f64,
    battery_w: f64,
    mode: Mode,
    fault_flags: u32,
}

impl SimulatedInverter {
    pub fn new(initial_soc: f64) -> Self {
        Self {
            state: Mutex::new(SimState {
                soc: initial_soc,
                solar_w: 0.0,
                load_w: 600.0,
                battery_w: 0.0,
                mode: Mode::SelfUse,
                fault_flags: 0,
            }),
        }
    }
}

#[async_trait]
impl InverterDriver for SimulatedInverter {
    async fn read_telemetry(&self) -> Result<Telemetry, InverterDriverError> {
        let state = self.state.lock().await;
        let grid_w = state.load_w + state.battery_w - state.solar_w;
        Ok(Telemetry {
            soc: state.soc,
            solar_w: state.solar_w,
            load_w: state.load_w,
            grid_w,
            battery_w: state.battery_w,
            inverter_mode: state.mode,
            fault_flags: state.fault_flags,
            read_at: Utc::now(),
        })
    }

    async fn set_mode(
        &self,
        mode: Mode,
        power_w: Option<f64>,
        _export_cap_w: Option<f64>,
    ) -> Result<(), InverterDriverError> {
        let mut state = self.state.lock().await;
        state.mode = mode;
        state.battery_w = match mode {
            Mode::ForceCharge => power_w.unwrap_or(1000.0),
            Mode::ForceDischarge => -power_w.unwrap_or(1000.0),
            Mode::ChargeNoImport => power_w.unwrap_or(500.0).min(state.solar_w),
            Mode::SelfUse | Mode::SelfUseZeroExport => 0.0,
        };
        Ok(())
    }
}

/// Wraps any driver with the read/write timeouts required by §5.
pub struct TimeoutDriver<D> {
    inner: D,
    read_timeout: Duration,
}

impl<D: InverterDriver> TimeoutDriver<D> {
    pub fn new(inner: D, read_timeout_ms: u64) -> Self {
        Self {
            inner,
            read_timeout: Duration::from_millis(read_timeout_ms),
        }
    }
}

#[async_trait]
impl<D: InverterDriver> InverterDriver for TimeoutDriver<D> {
    async fn read_telemetry(&self) -> Result<Telemetry, InverterDriverError> {
        timeout(self.read_timeout, self.inner.read_telemetry())
            .await
            .map_err(|_| InverterDriverError::Timeout {
                timeout_ms: self.read_timeout.as_millis() as u64,
            })?
    }

    async fn set_mode(
        &self,
        mode: Mode,
        power_w: Option<f64>,
        export_cap_w: Option<f64>,
    ) -> Result<(), InverterDriverError> {
        timeout(self.read_timeout, self.inner.set_mode(mode, power_w, export_cap_w))
            .await
            .map_err(|_| InverterDriverError::Timeout {
                timeout_ms: self.read_timeout.as_millis() as u64,
            })?
    }
}

/// Builds the configured driver. Modbus support is deliberately out of
/// scope (§1) — selecting it without the feature enabled, or before a real
/// transport is wired up, fails fast rather than silently simulating.
pub fn build_driver(cfg: &Config) -> Result<Box<dyn InverterDriver>, InverterDriverError> {
    let timeout_ms = cfg.hardware.modbus_read_timeout_ms;
    match cfg.hardware.mode {
        HardwareMode::Simulated => Ok(Box::new(TimeoutDriver::new(
            SimulatedInverter::new(cfg.battery.initial_soc),
            timeout_ms,
        ))),
        HardwareMode::Mock => Ok(Box::new(TimeoutDriver::new(
            SimulatedInverter::new(cfg.battery.initial_soc),
            timeout_ms,
        ))),
        HardwareMode::Modbus => {
            #[cfg(feature = "modbus")]
            {
                Err(InverterDriverError::InitFailed(
                    "modbus transport is not implemented; register encoding is out of scope".into(),
                ))
            }
            #[cfg(not(feature = "modbus"))]
            {
                Err(InverterDriverError::InitFailed(
                    "modbus hardware mode selected but the 'modbus' feature is not compiled in".into(),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn simulated_inverter_reports_commanded_mode() {
        let inv = SimulatedInverter::new(0.5);
        inv.set_mode(Mode::ForceCharge, Some(2000.0), None).await.unwrap();
        let t = inv.read_telemetry().await.unwrap();
        assert_eq!(t.inverter_mode, Mode::ForceCharge);
        assert_eq!(t.battery_w, 2000.0);
    }
}
