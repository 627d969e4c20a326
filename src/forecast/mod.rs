pub mod aggregator;
pub mod load_history;
pub mod provider;
pub mod solar;
pub mod storm;
pub mod weather;

pub use aggregator::ForecastAggregator;
pub use provider::{Provider, ProviderCache, ProviderHealth, Timestamped};
pub use solar::{HttpSolarProvider, SolarPoint, SolarSeries};
pub use storm::{HttpStormProvider, StormSeries, StormWarning};
pub use weather::{HttpWeatherProvider, WeatherPoint, WeatherSeries};
