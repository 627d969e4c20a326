use serde::{Deserialize, Serialize};
use std::fmt;

/// Inverter operating mode.
///
/// Numeric values match the data model in spec.md so wire encodings (Modbus
/// registers, HTTP payloads) stay stable across a rename.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Mode {
    /// PV first to load, then battery, then export.
    SelfUse = 1,
    /// Same as `SelfUse` but export is capped at zero.
    SelfUseZeroExport = 2,
    /// Import-to-battery at a commanded charge rate.
    ForceCharge = 3,
    /// Battery-to-grid at a commanded discharge rate.
    ForceDischarge = 4,
    /// Charge from PV surplus only; never imports from the grid.
    ChargeNoImport = 5,
}

impl Mode {
    pub const ALL: [Mode; 5] = [
        Mode::SelfUse,
        Mode::SelfUseZeroExport,
        Mode::ForceCharge,
        Mode::ForceDischarge,
        Mode::ChargeNoImport,
    ];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// True if this mode forbids grid import for charging.
    pub fn forbids_grid_charge(self) -> bool {
        matches!(self, Mode::SelfUse | Mode::ChargeNoImport)
    }

    /// True if this mode forbids battery discharge entirely.
    pub fn forbids_discharge(self) -> bool {
        matches!(self, Mode::ForceCharge)
    }

    /// True if this mode forbids battery charge entirely.
    pub fn forbids_charge(self) -> bool {
        matches!(self, Mode::ForceDischarge)
    }

    /// True if this mode forces export to zero.
    pub fn zero_export(self) -> bool {
        matches!(self, Mode::SelfUseZeroExport)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mode::SelfUse => "SELF_USE",
            Mode::SelfUseZeroExport => "SELF_USE_ZERO_EXPORT",
            Mode::ForceCharge => "FORCE_CHARGE",
            Mode::ForceDischarge => "FORCE_DISCHARGE",
            Mode::ChargeNoImport => "CHARGE_NO_IMPORT",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Mode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SELF_USE" => Ok(Mode::SelfUse),
            "SELF_USE_ZERO_EXPORT" => Ok(Mode::SelfUseZeroExport),
            "FORCE_CHARGE" => Ok(Mode::ForceCharge),
            "FORCE_DISCHARGE" => Ok(Mode::ForceDischarge),
            "CHARGE_NO_IMPORT" => Ok(Mode::ChargeNoImport),
            other => Err(format!("unknown mode: {other}")),
        }
    }
}
