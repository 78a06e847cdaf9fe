use candle_core::{Device, Tensor};
use serde::{Deserialize, Serialize};

use crate::error::{LmmError, Result};
use crate::sgvb::MixedModelSpec;

/// One row of grouped data
///
/// * `groups` - member index for each random-effect group, in declaration order
/// * `covariates` - fixed-effect covariate values
/// * `response` - observed response (absent for pure prediction)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub groups: Vec<u32>,
    pub covariates: Vec<f32>,
    pub response: Option<f32>,
}

/// Columnar grouped data set
///
/// `group_index[g][i]` is the member of group `g` that observation `i`
/// belongs to; `covariates[j][i]` is the `j`-th fixed covariate of
/// observation `i`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupedData {
    pub group_index: Vec<Vec<u32>>,
    pub covariates: Vec<Vec<f32>>,
    pub response: Option<Vec<f32>>,
}

/// Tensors handed to the model: design matrix and per-group index vectors
pub struct DesignTensors {
    /// fixed covariates, shape (n, p); `None` when p = 0
    pub x_np: Option<Tensor>,
    /// one u32 index vector of shape (n,) per group
    pub group_index: Vec<Tensor>,
    pub num_obs: usize,
}

impl GroupedData {
    pub fn new(
        group_index: Vec<Vec<u32>>,
        covariates: Vec<Vec<f32>>,
        response: Option<Vec<f32>>,
    ) -> Self {
        Self {
            group_index,
            covariates,
            response,
        }
    }

    /// Collect rows into columns. All rows must agree on the number of
    /// groups and covariates, and either all or none carry a response.
    pub fn from_observations(rows: &[Observation]) -> Result<Self> {
        let Some(first) = rows.first() else {
            return Ok(Self::default());
        };

        let num_groups = first.groups.len();
        let num_fixed = first.covariates.len();
        let with_response = first.response.is_some();

        let mut group_index = vec![Vec::with_capacity(rows.len()); num_groups];
        let mut covariates = vec![Vec::with_capacity(rows.len()); num_fixed];
        let mut response = Vec::with_capacity(rows.len());

        for (i, row) in rows.iter().enumerate() {
            if row.groups.len() != num_groups || row.covariates.len() != num_fixed {
                return Err(LmmError::config(format!(
                    "row {} has {} groups and {} covariates, expected {} and {}",
                    i,
                    row.groups.len(),
                    row.covariates.len(),
                    num_groups,
                    num_fixed
                )));
            }
            for (col, &g) in group_index.iter_mut().zip(row.groups.iter()) {
                col.push(g);
            }
            for (col, &x) in covariates.iter_mut().zip(row.covariates.iter()) {
                col.push(x);
            }
            match (with_response, row.response) {
                (true, Some(y)) => response.push(y),
                (false, None) => {}
                _ => {
                    return Err(LmmError::config(format!(
                        "row {} disagrees with row 0 on having a response",
                        i
                    )))
                }
            }
        }

        Ok(Self {
            group_index,
            covariates,
            response: with_response.then_some(response),
        })
    }

    pub fn num_obs(&self) -> usize {
        self.group_index
            .first()
            .map(|v| v.len())
            .or_else(|| self.covariates.first().map(|v| v.len()))
            .or_else(|| self.response.as_ref().map(|v| v.len()))
            .unwrap_or(0)
    }

    pub fn num_groups(&self) -> usize {
        self.group_index.len()
    }

    pub fn num_fixed(&self) -> usize {
        self.covariates.len()
    }

    /// Check the arrays against a model declaration and require at least
    /// one observation. Returns the number of observations.
    pub fn validate(&self, spec: &MixedModelSpec) -> Result<usize> {
        let nn = self.check_layout(spec)?;
        if nn == 0 {
            return Err(LmmError::config("no observations"));
        }
        Ok(nn)
    }

    /// Like [`GroupedData::validate`] but an empty data set passes.
    ///
    /// Every index vector and covariate column must have one entry per
    /// observation, indices must lie in `[0, n_g)` and all values must be
    /// finite.
    pub fn check_layout(&self, spec: &MixedModelSpec) -> Result<usize> {
        if self.num_groups() != spec.groups.len() {
            return Err(LmmError::config(format!(
                "data has {} group index vectors, model declares {} groups",
                self.num_groups(),
                spec.groups.len()
            )));
        }
        if self.num_fixed() != spec.num_fixed {
            return Err(LmmError::config(format!(
                "data has {} covariates, model declares {}",
                self.num_fixed(),
                spec.num_fixed
            )));
        }

        let nn = self.num_obs();

        for (group, index) in spec.groups.iter().zip(self.group_index.iter()) {
            if index.len() != nn {
                return Err(LmmError::config(format!(
                    "group `{}`: {} indices for {} observations",
                    group.name,
                    index.len(),
                    nn
                )));
            }
            if let Some((i, &g)) = index
                .iter()
                .enumerate()
                .find(|(_, &g)| g as usize >= group.size)
            {
                return Err(LmmError::config(format!(
                    "group `{}`: index {} at row {} is outside [0, {})",
                    group.name, g, i, group.size
                )));
            }
        }

        for (j, column) in self.covariates.iter().enumerate() {
            if column.len() != nn {
                return Err(LmmError::config(format!(
                    "covariate {}: {} values for {} observations",
                    j,
                    column.len(),
                    nn
                )));
            }
            if column.iter().any(|x| !x.is_finite()) {
                return Err(LmmError::config(format!(
                    "covariate {} has non-finite values",
                    j
                )));
            }
        }

        if let Some(y) = self.response.as_ref() {
            if y.len() != nn {
                return Err(LmmError::config(format!(
                    "{} responses for {} observations",
                    y.len(),
                    nn
                )));
            }
            if y.iter().any(|v| !v.is_finite()) {
                return Err(LmmError::config("response has non-finite values"));
            }
        }

        Ok(nn)
    }

    /// Response vector, required for training
    pub fn require_response(&self) -> Result<&[f32]> {
        self.response
            .as_deref()
            .ok_or_else(|| LmmError::config("training data must carry a response"))
    }

    /// Move the arrays onto `device`. Call after [`GroupedData::validate`].
    pub fn to_design(&self, device: &Device) -> Result<DesignTensors> {
        let nn = self.num_obs();
        let pp = self.num_fixed();

        let x_np = if pp > 0 {
            let mut x_row_major = Vec::with_capacity(nn * pp);
            for i in 0..nn {
                x_row_major.extend(self.covariates.iter().map(|column| column[i]));
            }
            Some(Tensor::from_vec(x_row_major, (nn, pp), device)?)
        } else {
            None
        };

        let group_index = self
            .group_index
            .iter()
            .map(|index| Tensor::from_vec(index.clone(), nn, device))
            .collect::<candle_core::Result<Vec<_>>>()?;

        Ok(DesignTensors {
            x_np,
            group_index,
            num_obs: nn,
        })
    }
}
