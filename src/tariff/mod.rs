pub mod provider;
pub mod series;

pub use provider::{HttpTariffProvider, RawTariffPoint, TariffSample};
pub use series::TariffSeries;
