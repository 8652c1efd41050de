//! Error types for aulos-dsp.

use thiserror::Error;

/// Result type alias for aulos-dsp operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in aulos-dsp.
#[derive(Debug, Error)]
pub enum Error {
    /// Offline envelope analysis did not reach the terminal state
    /// within the safety bound.
    #[error("envelope analysis exceeded {0} steps without terminating")]
    StepLimitExceeded(usize),
}
