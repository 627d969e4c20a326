pub mod anti_oscillation;
pub mod arbitrator;
pub mod tick;

pub use anti_oscillation::AntiOscillationGuard;
pub use arbitrator::{decide, ArbitrationInput};
pub use tick::{ingest_tariff_point, TickLoop, TickSnapshot};
