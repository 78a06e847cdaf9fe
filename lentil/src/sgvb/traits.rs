use candle_core::{Result, Tensor};

/// Observation model p(y|η).
/// Gradients flow through it back to η.
pub trait Likelihood {
    /// Evaluate log p(y|η)
    ///
    /// # Arguments
    /// * `eta` - linear predictor samples, shape (S, n)
    ///
    /// # Returns
    /// Log-likelihood values, shape (S,) summed over observations
    fn log_likelihood(&self, eta: &Tensor) -> Result<Tensor>;
}

/// Variational distribution trait for reparameterized sampling.
pub trait VariationalDistribution {
    /// Get the variational mean μ.
    ///
    /// # Returns
    /// Mean tensor, shape (m,)
    fn mean(&self) -> Result<Tensor>;

    /// Get the variational variance σ².
    ///
    /// # Returns
    /// Variance tensor, shape (m,)
    fn var(&self) -> Result<Tensor>;

    /// Map standard normal noise to a draw, θ = μ + σ ε
    ///
    /// # Arguments
    /// * `epsilon` - noise, shape (S, m)
    ///
    /// # Returns
    /// Samples, shape (S, m), differentiable in μ and σ
    fn sample(&self, epsilon: &Tensor) -> Result<Tensor>;

    /// Compute log q(θ), summed over the m elements
    ///
    /// # Arguments
    /// * `theta` - samples, shape (S, m)
    ///
    /// # Returns
    /// Log density, shape (S,)
    fn log_prob(&self, theta: &Tensor) -> Result<Tensor>;
}

/// Prior distribution trait.
pub trait Prior {
    /// Compute log p(θ) under the prior.
    ///
    /// # Arguments
    /// * `theta` - Parameter samples, shape (S, m)
    ///
    /// # Returns
    /// Log prior probability, shape (S,) summed over parameter dimensions
    fn log_prob(&self, theta: &Tensor) -> Result<Tensor>;
}
