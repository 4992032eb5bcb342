//! Error type shared by the sampler, the scheduler and the orchestrator.

use thiserror::Error;

/// Everything that can abort a sampling run.
///
/// Recoverable conditions (a non-finite density met while searching for a
/// slice edge, an optimizer that stopped early) never surface here; they are
/// handled locally or logged.
#[derive(Error, Debug)]
pub enum ShredderError {
    #[error("{value} found where a finite value was expected ({context})")]
    NonFinite { value: f64, context: &'static str },

    #[error("slice edge search is not making progress after {attempts} bisections")]
    EdgeSearchStalled { attempts: usize },

    #[error("invalid domain: lower limit {lower} is greater than upper limit {upper}")]
    InvalidDomain { lower: f64, upper: f64 },

    #[error("invalid sampling distribution: {0}")]
    Distribution(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{what}: expected length {expected}, found {found}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("work queue for group `{group}` disconnected")]
    Disconnected { group: &'static str },

    #[error("worker thread of group `{group}` panicked")]
    WorkerPanicked { group: &'static str },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[cfg(feature = "csv")]
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, ShredderError>;

/// Returns `value` if finite, otherwise a [`ShredderError::NonFinite`] tagged with `context`.
pub(crate) fn ensure_finite(value: f64, context: &'static str) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ShredderError::NonFinite { value, context })
    }
}
