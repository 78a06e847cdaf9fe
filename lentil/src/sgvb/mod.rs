//! Stochastic Gradient Variational Bayes (SGVB) for linear mixed models.
//!
//! Model definition and the mean-field variational family:
//!
//! ```text
//! y  ~ N(η, 1),   η = b0 + X b + Σ_g Z_g u_g
//! u_g ~ N(0, σ_g² I)                  (prior, σ_g trainable)
//! q(u_g) = N(μ_g, diag(s_g²))         (independent across groups)
//! ```
//!
//! # Key characteristics
//!
//! - Reparameterized draws `u = μ + s ε` so gradients flow through sampling
//! - Direct (negative) ELBO loss, differentiated by candle's autodiff
//! - Fixed effects and σ_g are point estimates updated in the same step
//!   as the variational parameters (variational EM)
//!
//! # Example
//!
//! ```ignore
//! let model = MixedModel::new(&spec, &mut varmap, ParamInit::default(), &mut rng, &device)?;
//! let likelihood = FixedGaussianLikelihood::unit_variance(y);
//!
//! for _ in 0..num_iters {
//!     let eps = vec![randn_tensor(&mut rng, 1, n_g, &device)?];
//!     let loss = direct_elbo_loss(&model, &design, &likelihood, &eps)?;
//!     optimizer.backward_step(&loss)?;
//! }
//! ```

mod elbo;
mod group_prior;
mod likelihood;
mod mixed_model;
mod param_init;
mod traits;
mod variational_gaussian;

pub use elbo::{compute_elbo, direct_elbo_loss, elbo_samples};
pub use group_prior::GroupScalePrior;
pub use likelihood::FixedGaussianLikelihood;
pub use mixed_model::{
    FixedEffects, GroupSpec, MixedModel, MixedModelSpec, ParamInit, RandomEffect, RandomEffects,
};
pub use param_init::{randn_tensor, randn_vec, seeded_var};
pub use traits::{Likelihood, Prior, VariationalDistribution};
pub use variational_gaussian::{softplus, GaussianVar};
