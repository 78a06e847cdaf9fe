use candle_core::{Device, Result, Tensor};
use candle_nn::VarMap;
use rand::Rng;

use super::param_init::{randn_vec, seeded_var};
use super::traits::VariationalDistribution;

/// Floor added to the softplus so the scale never underflows to zero
const MIN_SCALE: f64 = 1e-5;

/// Gaussian variational distribution q(u) = N(μ, diag(s²))
///
/// Uses mean-field approximation: one independent Normal per member.
/// Parameters are stored as location μ and an unconstrained raw scale r
/// with s = softplus(r) + 1e-5.
pub struct GaussianVar {
    /// Variational location μ: shape (m,)
    loc: Tensor,
    /// Unconstrained scale r: shape (m,)
    raw_scale: Tensor,
}

impl GaussianVar {
    /// Create a new Gaussian variational distribution.
    ///
    /// # Arguments
    /// * `varmap` - variable registry; parameters are `{prefix}.loc` and `{prefix}.raw_scale`
    /// * `prefix` - group name
    /// * `m` - number of members
    /// * `init_loc_std` - standard deviation of the initial locations
    /// * `rng` - random source for the initial values
    ///
    /// # Returns
    /// GaussianVar with μ ~ N(0, init_loc_std²) and r ~ N(0, 1)
    pub fn new<R: Rng + ?Sized>(
        varmap: &mut VarMap,
        prefix: &str,
        m: usize,
        init_loc_std: f32,
        rng: &mut R,
        device: &Device,
    ) -> Result<Self> {
        let loc_init = randn_vec(rng, m, 0.0, init_loc_std);
        let raw_init = randn_vec(rng, m, 0.0, 1.0);
        let loc = seeded_var(varmap, &format!("{}.loc", prefix), loc_init, device)?;
        let raw_scale = seeded_var(varmap, &format!("{}.raw_scale", prefix), raw_init, device)?;
        Ok(Self { loc, raw_scale })
    }

    /// Number of members m
    pub fn len(&self) -> usize {
        self.loc.elem_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the variational standard deviation s = softplus(r) + 1e-5.
    pub fn std(&self) -> Result<Tensor> {
        softplus(&self.raw_scale)? + MIN_SCALE
    }
}

/// ln(1 + exp(x)) written as max(x, 0) + ln(1 + exp(-|x|)) to stay finite
pub fn softplus(x: &Tensor) -> Result<Tensor> {
    let tail = (x.abs()?.neg()?.exp()? + 1.0)?.log()?;
    x.relu()? + tail
}

impl VariationalDistribution for GaussianVar {
    fn mean(&self) -> Result<Tensor> {
        Ok(self.loc.clone())
    }

    fn var(&self) -> Result<Tensor> {
        self.std()?.sqr()
    }

    /// Reparameterization: u = μ + s * ε, broadcast (m,) over (S, m)
    fn sample(&self, epsilon: &Tensor) -> Result<Tensor> {
        let std = self.std()?;
        epsilon.broadcast_mul(&std)?.broadcast_add(&self.loc)
    }

    /// log q(u) = -0.5 * [(u-μ)²/s² + 2*ln(s) + ln(2π)], summed over members
    fn log_prob(&self, theta: &Tensor) -> Result<Tensor> {
        let ln_2pi = (2.0 * std::f64::consts::PI).ln();

        let std = self.std()?;
        let normalized_sq = theta
            .broadcast_sub(&self.loc)?
            .broadcast_div(&std)?
            .sqr()?;

        let const_term = ((std.log()? * 2.0)? + ln_2pi)?;
        let log_prob_element = (normalized_sq.broadcast_add(&const_term)? * (-0.5))?;

        log_prob_element.sum(1)
    }
}
