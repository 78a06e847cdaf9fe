use candle_core::{Device, Result, Tensor};
use candle_nn::VarMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::group_prior::GroupScalePrior;
use super::param_init::seeded_var;
use super::traits::{Likelihood, Prior, VariationalDistribution};
use super::variational_gaussian::GaussianVar;
use crate::data::DesignTensors;
use crate::error::LmmError;

/// A random-effect grouping factor with `size` members
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSpec {
    pub name: String,
    pub size: usize,
}

impl GroupSpec {
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }
}

/// Declaration of a linear mixed-effects model
///
/// ```text
/// y(i) ~ N( b0 + sum_j b(j) x(i,j) + sum_g u_g[G_g(i)], 1 )
/// u_g  ~ N( 0, σ_g² I ),  g = 1 .. #groups
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixedModelSpec {
    pub groups: Vec<GroupSpec>,
    /// number of fixed covariates, not counting the intercept
    pub num_fixed: usize,
}

impl MixedModelSpec {
    pub fn new(groups: Vec<GroupSpec>, num_fixed: usize) -> Self {
        Self { groups, num_fixed }
    }

    /// At least one group, every group non-empty, names unique.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.groups.is_empty() {
            return Err(LmmError::config("at least one random-effect group is required"));
        }
        let mut seen = HashSet::new();
        for group in &self.groups {
            if group.size == 0 {
                return Err(LmmError::config(format!(
                    "group `{}` must have a positive number of members",
                    group.name
                )));
            }
            if group.name.is_empty() || !seen.insert(group.name.as_str()) {
                return Err(LmmError::config(format!(
                    "group names must be unique and non-empty: `{}`",
                    group.name
                )));
            }
        }
        Ok(())
    }

    pub fn group_sizes(&self) -> Vec<usize> {
        self.groups.iter().map(|g| g.size).collect()
    }
}

/// Initial values of the trainable parameters
#[derive(Debug, Clone, Copy)]
pub struct ParamInit {
    /// standard deviation of the N(0, ·) draws for variational locations
    pub loc_std: f32,
    /// initial ln(σ_g) of every group prior
    pub ln_scale: f32,
}

impl Default for ParamInit {
    fn default() -> Self {
        Self {
            loc_std: 1.0,
            ln_scale: 0.0,
        }
    }
}

/// Intercept and covariate coefficients, point-estimated
pub struct FixedEffects {
    /// shape (1,)
    intercept: Tensor,
    /// shape (p, 1); `None` when p = 0
    coef: Option<Tensor>,
}

impl FixedEffects {
    fn new(varmap: &mut VarMap, num_fixed: usize, device: &Device) -> Result<Self> {
        let intercept = seeded_var(varmap, "fixed.intercept", vec![0.0], device)?;
        let coef = if num_fixed > 0 {
            Some(seeded_var(varmap, "fixed.coef", vec![0.0; num_fixed], device)?.unsqueeze(1)?)
        } else {
            None
        };
        Ok(Self { intercept, coef })
    }

    /// b0 + X b, shape (n,)
    pub fn predictor(&self, x_np: Option<&Tensor>, num_obs: usize) -> Result<Tensor> {
        match (x_np, self.coef.as_ref()) {
            (Some(x_np), Some(coef)) => x_np.matmul(coef)?.squeeze(1)?.broadcast_add(&self.intercept),
            (None, None) => self.intercept.broadcast_as(num_obs),
            _ => candle_core::bail!("design matrix does not match the fixed effects"),
        }
    }

    pub fn intercept(&self) -> Result<f32> {
        self.intercept.squeeze(0)?.to_scalar::<f32>()
    }

    pub fn coef(&self) -> Result<Vec<f32>> {
        match self.coef.as_ref() {
            Some(coef) => coef.squeeze(1)?.to_vec1::<f32>(),
            None => Ok(vec![]),
        }
    }
}

/// One random-effect group: its prior and its variational approximation
pub struct RandomEffect {
    pub name: String,
    pub prior: GroupScalePrior,
    pub variational: GaussianVar,
}

/// Random-effect groups keyed by name, in declaration order
pub struct RandomEffects {
    effects: Vec<RandomEffect>,
}

impl RandomEffects {
    pub fn get(&self, name: &str) -> Option<&RandomEffect> {
        self.effects.iter().find(|e| e.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RandomEffect> {
        self.effects.iter()
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }
}

/// Joint model p(y, u) together with the mean-field family q(u)
pub struct MixedModel {
    pub spec: MixedModelSpec,
    pub fixed: FixedEffects,
    pub random: RandomEffects,
}

impl MixedModel {
    /// Register all trainable parameters in `varmap`.
    ///
    /// Variational locations and raw scales are drawn from `rng` group by
    /// group in declaration order; fixed effects start at zero.
    pub fn new<R: Rng + ?Sized>(
        spec: &MixedModelSpec,
        varmap: &mut VarMap,
        init: ParamInit,
        rng: &mut R,
        device: &Device,
    ) -> crate::error::Result<Self> {
        spec.validate()?;

        let fixed = FixedEffects::new(varmap, spec.num_fixed, device)?;

        let mut effects = Vec::with_capacity(spec.groups.len());
        for group in &spec.groups {
            let prior = GroupScalePrior::new(varmap, &group.name, init.ln_scale, device)?;
            let variational =
                GaussianVar::new(varmap, &group.name, group.size, init.loc_std, rng, device)?;
            effects.push(RandomEffect {
                name: group.name.clone(),
                prior,
                variational,
            });
        }

        Ok(Self {
            spec: spec.clone(),
            fixed,
            random: RandomEffects { effects },
        })
    }

    /// Reparameterized draws u_g = μ_g + s_g ε_g, one (S, n_g) tensor per group
    pub fn sample_random_effects(&self, epsilon: &[Tensor]) -> Result<Vec<Tensor>> {
        if epsilon.len() != self.random.len() {
            candle_core::bail!(
                "expected {} noise tensors, got {}",
                self.random.len(),
                epsilon.len()
            );
        }
        self.random
            .iter()
            .zip(epsilon.iter())
            .map(|(effect, eps)| effect.variational.sample(eps))
            .collect()
    }

    /// Linear predictor η for each draw, shape (S, n)
    ///
    /// * `design` - fixed covariates and group memberships
    /// * `draws` - one (S, n_g) tensor per group
    pub fn linear_predictor(&self, design: &DesignTensors, draws: &[Tensor]) -> Result<Tensor> {
        let fixed_n = self.fixed.predictor(design.x_np.as_ref(), design.num_obs)?;

        let mut eta_sn: Option<Tensor> = None;
        for (u_sm, index_n) in draws.iter().zip(design.group_index.iter()) {
            let u_sn = u_sm.index_select(index_n, 1)?;
            eta_sn = Some(match eta_sn {
                Some(acc) => (acc + u_sn)?,
                None => u_sn,
            });
        }

        match eta_sn {
            Some(eta_sn) => eta_sn.broadcast_add(&fixed_n),
            None => fixed_n.unsqueeze(0),
        }
    }

    /// log p(y|η) + Σ_g log p(u_g|σ_g), shape (S,)
    pub fn log_joint<L: Likelihood>(
        &self,
        design: &DesignTensors,
        likelihood: &L,
        draws: &[Tensor],
    ) -> Result<Tensor> {
        let eta_sn = self.linear_predictor(design, draws)?;
        let mut log_joint = likelihood.log_likelihood(&eta_sn)?;
        for (effect, u_sm) in self.random.iter().zip(draws.iter()) {
            log_joint = (log_joint + effect.prior.log_prob(u_sm)?)?;
        }
        Ok(log_joint)
    }

    /// Σ_g log q(u_g), shape (S,)
    pub fn log_q(&self, draws: &[Tensor]) -> Result<Tensor> {
        let mut terms = self
            .random
            .iter()
            .zip(draws.iter())
            .map(|(effect, u_sm)| effect.variational.log_prob(u_sm));
        let mut log_q = match terms.next() {
            Some(first) => first?,
            None => candle_core::bail!("no random-effect groups"),
        };
        for term in terms {
            log_q = (log_q + term?)?;
        }
        Ok(log_q)
    }
}
