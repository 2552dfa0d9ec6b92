use thiserror::Error;

/// Faults detected while ingesting parameters or a footstep plan.
///
/// These are only ever produced at construction or plan-build time. The
/// per-tick evaluation path works on already-validated inputs and cannot fail.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationFault {
    #[error("natural frequency must be finite and positive, got {0}")]
    InvalidNaturalFrequency(f64),
    #[error("center of mass height must be finite and positive, got {0}")]
    InvalidComHeight(f64),
    #[error("gravity must be finite and positive, got {0}")]
    InvalidGravity(f64),
    #[error("step {step}: {field} must be {expected}, got {value}")]
    InvalidTiming {
        step: usize,
        field: &'static str,
        expected: &'static str,
        value: f64,
    },
    #[error("{name} must lie in (0, 1), got {value}")]
    InvalidSplitFraction { name: &'static str, value: f64 },
    #[error("horizon must be between 1 and {max} steps, got {requested}")]
    InvalidHorizon { requested: usize, max: usize },
    #[error("footstep plan contains a non-finite {0}")]
    NonFinitePlan(&'static str),
    #[error("footstep plan has no upcoming step")]
    EmptyPlan,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, ConfigurationFault>;
