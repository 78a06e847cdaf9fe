//! Posterior-mean predictions on held-out data.
//!
//! ```text
//! ŷ(i) = b0 + sum_j b(j) x(i,j) + sum_g μ_g[G_g(i)]
//! r(i) = ŷ(i) - y(i)
//! ```

use serde::{Deserialize, Serialize};

use crate::data::GroupedData;
use crate::error::{LmmError, Result};
use crate::inference::Estimates;
use crate::sgvb::MixedModelSpec;

/// Predicted responses aligned with the input rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub predictions: Vec<f32>,
    /// prediction - observed, present when the data carry a response
    pub residuals: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResidualSummary {
    pub num_obs: usize,
    pub mean: f32,
    pub mean_abs: f32,
    pub rmse: f32,
}

impl Prediction {
    pub fn summary(&self) -> Option<ResidualSummary> {
        let residuals = self.residuals.as_ref()?;
        let nn = residuals.len();
        if nn == 0 {
            return None;
        }
        let denom = nn as f64;
        let sum: f64 = residuals.iter().map(|&r| r as f64).sum();
        let sum_abs: f64 = residuals.iter().map(|&r| (r as f64).abs()).sum();
        let sum_sq: f64 = residuals.iter().map(|&r| (r as f64).powi(2)).sum();
        Some(ResidualSummary {
            num_obs: nn,
            mean: (sum / denom) as f32,
            mean_abs: (sum_abs / denom) as f32,
            rmse: (sum_sq / denom).sqrt() as f32,
        })
    }
}

/// Substitute variational means for the random effects and evaluate the
/// linear predictor on `data`. Pure: nothing in `estimates` changes.
///
/// Zero rows give empty predictions.
pub fn predict(
    estimates: &Estimates,
    spec: &MixedModelSpec,
    data: &GroupedData,
) -> Result<Prediction> {
    spec.validate()?;
    check_estimates(estimates, spec)?;
    let nn = data.check_layout(spec)?;

    let mut predictions = vec![estimates.intercept; nn];

    for (&coef, column) in estimates.coef.iter().zip(data.covariates.iter()) {
        for (pred, &x) in predictions.iter_mut().zip(column.iter()) {
            *pred += coef * x;
        }
    }

    for (group, index) in estimates.groups.iter().zip(data.group_index.iter()) {
        for (pred, &g) in predictions.iter_mut().zip(index.iter()) {
            *pred += group.loc[g as usize];
        }
    }

    let residuals = data.response.as_ref().map(|y| {
        predictions
            .iter()
            .zip(y.iter())
            .map(|(pred, obs)| pred - obs)
            .collect()
    });

    Ok(Prediction {
        predictions,
        residuals,
    })
}

fn check_estimates(estimates: &Estimates, spec: &MixedModelSpec) -> Result<()> {
    if estimates.coef.len() != spec.num_fixed {
        return Err(LmmError::config(format!(
            "{} fixed-effect estimates for {} covariates",
            estimates.coef.len(),
            spec.num_fixed
        )));
    }
    if estimates.groups.len() != spec.groups.len() {
        return Err(LmmError::config(format!(
            "{} group estimates for {} groups",
            estimates.groups.len(),
            spec.groups.len()
        )));
    }
    for (est, group) in estimates.groups.iter().zip(spec.groups.iter()) {
        if est.name != group.name || est.loc.len() != group.size {
            return Err(LmmError::config(format!(
                "estimate `{}` with {} members does not match group `{}` with {}",
                est.name,
                est.loc.len(),
                group.name,
                group.size
            )));
        }
    }
    Ok(())
}
