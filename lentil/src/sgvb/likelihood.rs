//! Gaussian likelihood for continuous responses.

use candle_core::{Result, Tensor};

use super::traits::Likelihood;

/// Fixed-variance Gaussian likelihood: y ~ N(η, σ²) with known σ².
///
/// The mixed model uses σ² = 1.
pub struct FixedGaussianLikelihood {
    /// observed response, shape (n,)
    y: Tensor,
    inv_2var: f64,
    log_2pi_var: f64,
}

impl FixedGaussianLikelihood {
    pub fn new(y: Tensor, variance: f64) -> Self {
        Self {
            y,
            inv_2var: 0.5 / variance,
            log_2pi_var: (2.0 * std::f64::consts::PI * variance).ln(),
        }
    }

    pub fn unit_variance(y: Tensor) -> Self {
        Self::new(y, 1.0)
    }
}

impl Likelihood for FixedGaussianLikelihood {
    fn log_likelihood(&self, eta: &Tensor) -> Result<Tensor> {
        // eta: (S, n), y: (n,)
        let diff_sq = eta.broadcast_sub(&self.y)?.sqr()?;
        let log_prob = ((diff_sq * (-self.inv_2var))? + (-0.5 * self.log_2pi_var))?;
        log_prob.sum(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_perfect_fit() -> Result<()> {
        let device = Device::Cpu;

        let y = Tensor::new(&[0.0f32, 1.0, 2.0], &device)?;
        let eta = Tensor::new(&[[0.0f32, 1.0, 2.0], [1.0, 2.0, 3.0]], &device)?;

        let likelihood = FixedGaussianLikelihood::unit_variance(y);
        let llik = likelihood.log_likelihood(&eta)?.to_vec1::<f32>()?;

        let ln_2pi = (2.0 * std::f64::consts::PI).ln() as f32;
        assert!((llik[0] - (-1.5 * ln_2pi)).abs() < 1e-5);
        // each residual is 1, adding -0.5 per observation
        assert!((llik[1] - (-1.5 * ln_2pi - 1.5)).abs() < 1e-5);
        Ok(())
    }
}
