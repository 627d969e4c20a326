use thiserror::Error;

/// Process exit codes, per spec.md §6.
pub mod exit_code {
    pub const OK: i32 = 0;
    pub const FATAL_CONFIG: i32 = 2;
    pub const DATABASE_CORRUPT: i32 = 3;
    pub const INVERTER_INIT_FAILED: i32 = 4;
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider {provider} request timed out after {timeout_s}s")]
    Timeout { provider: String, timeout_s: u64 },
    #[error("provider {provider} returned degraded data: {reason}")]
    Degraded { provider: String, reason: String },
    #[error("provider {provider} failed: {source}")]
    Failed {
        provider: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Outcome of a single provider fetch, preserving degraded data rather than
/// discarding it the way a thrown exception would (see spec.md §9).
#[derive(Debug)]
pub enum ProviderOutcome<T> {
    Ok(T),
    Degraded(T, String),
    Err(ProviderError),
}

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("solver returned infeasible status even after relaxation")]
    Infeasible,
    #[error("solver did not converge within {wall_ms}ms")]
    Timeout { wall_ms: u64 },
    #[error("solver error: {0}")]
    Solver(String),
    #[error("no forecast points available to plan against")]
    EmptyForecast,
}

#[derive(Debug, Error)]
pub enum ArbitrationWarning {
    #[error("two sources at priority {priority:?} disagreed; earlier-enumerated source {winner} won")]
    Conflict {
        priority: crate::domain::Source,
        winner: String,
    },
}

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("database integrity check failed: {0}")]
    IntegrityCheckFailed(String),
    #[error("row-level recovery failed: {0}")]
    RecoveryFailed(String),
    #[error("database I/O error: {0}")]
    Io(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration failed validation: {0}")]
    Invalid(String),
    #[error("restart-only field {field} changed in a hot-reload; ignoring until restart")]
    RestartRequired { field: String },
}

#[derive(Debug, Error)]
pub enum InverterDriverError {
    #[error("inverter reported fault: {0}")]
    Fault(String),
    #[error("inverter communication timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("inverter driver failed to initialise: {0}")]
    InitFailed(String),
}
