pub mod cli;
pub mod data;
pub mod error;
pub mod inference;
pub mod predict;
pub mod sgvb;
pub mod simulate;

pub use data::{GroupedData, Observation};
pub use error::{LmmError, Result};
pub use inference::{
    Diagnostics, EngineState, Estimates, FitConfig, GroupEstimate, StepStatus, VariationalEm,
};
pub use predict::{predict, Prediction, ResidualSummary};
pub use sgvb::{GroupSpec, MixedModelSpec};

pub use candle_core;
pub use candle_nn;
