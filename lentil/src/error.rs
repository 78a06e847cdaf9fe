//! Error types for mixed-model fitting

use thiserror::Error;

/// Failures raised by model construction, fitting and prediction.
///
/// Numerical trouble during a step (non-finite loss or gradient) is not an
/// error; it is reported through [`crate::inference::StepStatus`].
#[derive(Error, Debug)]
pub enum LmmError {
    /// Invalid model declaration or input arrays
    #[error("configuration error: {0}")]
    Config(String),

    /// Operation called in the wrong engine state
    #[error("sequencing error: {0}")]
    Sequencing(String),

    /// Tensor backend failure
    #[error("tensor error: {0}")]
    Candle(#[from] candle_core::Error),
}

impl LmmError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn sequencing(msg: impl Into<String>) -> Self {
        Self::Sequencing(msg.into())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, LmmError>;
