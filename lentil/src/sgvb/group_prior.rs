use candle_core::{Device, Result, Tensor};
use candle_nn::VarMap;

use super::param_init::seeded_var;
use super::traits::Prior;

/// Bound on ln(σ) so that exp() neither overflows nor collapses to zero.
const MAX_LN_SCALE: f64 = 8.0;

/// Learnable Gaussian prior over one random-effect group, p(u) = N(0, σ²I)
///
/// The group standard deviation σ is shared by all members of the
/// group and stored as ln(σ).
pub struct GroupScalePrior {
    /// Log scale parameter ln(σ): shape (1,)
    ln_scale: Tensor,
}

impl GroupScalePrior {
    /// Create a new group prior with learnable scale.
    ///
    /// # Arguments
    /// * `varmap` - variable registry; the parameter is `{prefix}.prior.ln_scale`
    /// * `prefix` - group name
    /// * `init_ln_scale` - initial value of ln(σ)
    /// * `device` - device of the parameter
    pub fn new(varmap: &mut VarMap, prefix: &str, init_ln_scale: f32, device: &Device) -> Result<Self> {
        let name = format!("{}.prior.ln_scale", prefix);
        let ln_scale = seeded_var(varmap, &name, vec![init_ln_scale], device)?;
        Ok(Self { ln_scale })
    }

    fn ln_scale_clamped(&self) -> Result<Tensor> {
        self.ln_scale.clamp(-MAX_LN_SCALE, MAX_LN_SCALE)
    }

    /// Get the prior scale σ = exp(clamp(ln_scale)).
    pub fn scale(&self) -> Result<f32> {
        self.ln_scale_clamped()?.exp()?.squeeze(0)?.to_scalar::<f32>()
    }
}

impl Prior for GroupScalePrior {
    /// Compute log p(u) = sum over members of log N(u; 0, σ²)
    ///
    /// log N(u; 0, σ²) = -0.5 * [u²/σ² + 2*ln(σ) + ln(2π)]
    ///
    /// # Arguments
    /// * `theta` - Parameter samples, shape (S, m)
    ///
    /// # Returns
    /// Log prior probability, shape (S,)
    fn log_prob(&self, theta: &Tensor) -> Result<Tensor> {
        let ln_2pi = (2.0 * std::f64::consts::PI).ln();

        let ln_scale = self.ln_scale_clamped()?;
        let scale_sq = (&ln_scale * 2.0)?.exp()?;

        // u²/σ²: shape (S, m)
        let theta_sq_normalized = theta.sqr()?.broadcast_div(&scale_sq)?;

        // 2*ln(σ) + ln(2π): shape (1,)
        let const_term = ((ln_scale * 2.0)? + ln_2pi)?;

        let log_prob_element = (theta_sq_normalized.broadcast_add(&const_term)? * (-0.5))?;

        log_prob_element.sum(1)
    }
}
