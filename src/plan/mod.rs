pub mod cache;
pub mod rebuild;

pub use cache::PlanCache;
pub use rebuild::{rebuild_needed, RebuildContext, RebuildReason};
