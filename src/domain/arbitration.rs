use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::mode::Mode;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Override {
    pub mode: Mode,
    pub power_w: Option<f64>,
    pub expires_at: DateTime<Utc>,
}

impl Override {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Priority levels of the control hierarchy, highest first. Declaration order
/// doubles as the tie-break order required by §4.5/§7 (Arbitration Conflict).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Source {
    Safety = 0,
    Storm = 1,
    SocFloor = 2,
    Override = 3,
    Plan = 4,
    Opportunistic = 5,
    Default = 6,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitratorDecision {
    pub target_mode: Mode,
    pub power_w: f64,
    pub export_cap_w: Option<f64>,
    pub source: Source,
    pub rationale: String,
}
