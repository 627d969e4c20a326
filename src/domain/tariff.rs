use serde::{Deserialize, Serialize};

use super::time::Slot;

/// Import/export price and spike flag for one slot.
///
/// `import_c` may be negative (the grid pays the household to consume).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TariffPoint {
    pub slot: Slot,
    pub import_c: f64,
    pub export_c: f64,
    pub spike_flag: bool,
}

impl TariffPoint {
    pub fn new(slot: Slot, import_c: f64, export_c: f64, spike_threshold_c: f64) -> Self {
        Self {
            slot,
            import_c,
            export_c,
            spike_flag: import_c >= spike_threshold_c,
        }
    }
}
