pub mod milp;
pub mod types;

pub use milp::MilpPlanner;
pub use types::PlanInput;
