use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::mode::Mode;
use super::time::Slot;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSlot {
    pub slot: Slot,
    pub mode: Mode,
    pub charge_w: f64,
    pub discharge_w: f64,
    pub expected_soc: f64,
    pub scheduled_loads: BTreeSet<String>,
}

/// An immutable, ordered 96-slot plan. Never mutated after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub slots: Vec<PlanSlot>,
    pub built_at: DateTime<Utc>,
    pub horizon_end: DateTime<Utc>,
    pub forecast_hash: u64,
    pub tariff_hash: u64,
    pub battery_soc_at_build: f64,
    pub objective_cents: f64,
    pub status: PlanStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanStatus {
    Optimal,
    Feasible,
    /// Infeasible even after relaxation; slots are the all-SELF_USE fallback.
    Fallback,
}

impl Plan {
    pub fn slot_covering(&self, now: DateTime<Utc>) -> Option<&PlanSlot> {
        self.slots.iter().find(|s| s.slot.contains(now))
    }

    /// Linear lookup of expected SOC at an arbitrary instant, used by the
    /// rebuild evaluator's drift check. Falls back to the nearest slot's
    /// expected SOC if `now` is outside the horizon.
    pub fn expected_soc_at(&self, now: DateTime<Utc>) -> f64 {
        if let Some(slot) = self.slot_covering(now) {
            return slot.expected_soc;
        }
        if let Some(first) = self.slots.first() {
            if now < first.slot.start {
                return first.expected_soc;
            }
        }
        self.slots.last().map(|s| s.expected_soc).unwrap_or(0.0)
    }

    pub fn fallback(built_at: DateTime<Utc>, battery_soc: f64, slots: Vec<Slot>) -> Self {
        let horizon_end = slots.last().map(|s| s.end()).unwrap_or(built_at);
        let plan_slots = slots
            .into_iter()
            .map(|slot| PlanSlot {
                slot,
                mode: Mode::SelfUse,
                charge_w: 0.0,
                discharge_w: 0.0,
                expected_soc: battery_soc,
                scheduled_loads: BTreeSet::new(),
            })
            .collect();
        Self {
            slots: plan_slots,
            built_at,
            horizon_end,
            forecast_hash: 0,
            tariff_hash: 0,
            battery_soc_at_build: battery_soc,
            objective_cents: 0.0,
            status: PlanStatus::Fallback,
        }
    }
}
