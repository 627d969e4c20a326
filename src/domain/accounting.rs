use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BillingCycle {
    pub start_date: NaiveDate,
    pub import_c: f64,
    pub export_c: f64,
    pub self_consumption_c: f64,
    pub arbitrage_c: f64,
    pub fixed_c: f64,
}

impl BillingCycle {
    pub fn new(start_date: NaiveDate) -> Self {
        Self {
            start_date,
            ..Default::default()
        }
    }

    pub fn total_c(&self) -> f64 {
        self.import_c - self.export_c - self.self_consumption_c - self.arbitrage_c + self.fixed_c
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountingState {
    pub wacb_c_per_kwh: f64,
    pub stored_energy_kwh: f64,
    pub cycle: BillingCycle,
}

impl AccountingState {
    pub fn new(start_date: NaiveDate, initial_stored_kwh: f64) -> Self {
        Self {
            wacb_c_per_kwh: 0.0,
            stored_energy_kwh: initial_stored_kwh,
            cycle: BillingCycle::new(start_date),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnergySource {
    Grid,
    Pv,
}

/// An archived billing-cycle P&L event, emitted on rollover.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleArchiveEvent {
    pub cycle: BillingCycle,
    pub archived_at: DateTime<Utc>,
}
