//! Variational EM engine for linear mixed models.
//!
//! Each [`VariationalEm::step`] draws one set of reparameterized random
//! effects, evaluates the negative ELBO on the full training set and
//! applies a single Adam update to every parameter: fixed effects, group
//! scales and variational locations/scales.
//!
//! ```text
//! Uninitialized --initialize--> Initialized --step--> Stepping --step--> ... Done
//!        any state --initialize--> Initialized
//! ```

use candle_core::backprop::GradStore;
use candle_core::{Device, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::data::{DesignTensors, GroupedData};
use crate::error::{LmmError, Result};
use crate::predict::{predict, Prediction};
use crate::sgvb::{
    compute_elbo, direct_elbo_loss, randn_tensor, FixedGaussianLikelihood, MixedModel,
    MixedModelSpec, ParamInit, VariationalDistribution,
};

/// Optimizer and initialization settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitConfig {
    pub learning_rate: f64,
    /// Monte Carlo draws per step
    pub num_samples: usize,
    /// seeds both the initial values and the noise stream
    pub seed: u64,
    pub init_loc_std: f32,
    pub init_ln_scale: f32,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            num_samples: 1,
            seed: 42,
            init_loc_std: 1.0,
            init_ln_scale: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineState {
    Uninitialized,
    Initialized,
    Stepping,
    Done,
}

/// Outcome of one step. Only `Updated` changes the parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Updated,
    NonFiniteLoss,
    NonFiniteGradient,
}

/// Per-step record
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// 1-based step counter since the last `initialize()`
    pub iteration: usize,
    /// single-draw estimate of the negative ELBO
    pub loss: f32,
    pub status: StepStatus,
}

impl Diagnostics {
    /// Whether this step changed the parameters
    pub fn is_applied(&self) -> bool {
        self.status == StepStatus::Updated
    }
}

/// Point estimates of one random-effect group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupEstimate {
    pub name: String,
    /// prior standard deviation σ_g
    pub scale: f32,
    /// variational locations, used as the random-effect estimates
    pub loc: Vec<f32>,
    /// variational standard deviations
    pub std: Vec<f32>,
}

/// Snapshot of all parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Estimates {
    /// steps applied since the last `initialize()`
    pub iteration: usize,
    pub intercept: f32,
    pub coef: Vec<f32>,
    pub groups: Vec<GroupEstimate>,
}

impl Estimates {
    /// All effects zero, unit scales
    pub fn zeros(spec: &MixedModelSpec) -> Self {
        Self {
            iteration: 0,
            intercept: 0.0,
            coef: vec![0.0; spec.num_fixed],
            groups: spec
                .groups
                .iter()
                .map(|g| GroupEstimate {
                    name: g.name.clone(),
                    scale: 1.0,
                    loc: vec![0.0; g.size],
                    std: vec![1.0; g.size],
                })
                .collect(),
        }
    }

    pub fn group(&self, name: &str) -> Option<&GroupEstimate> {
        self.groups.iter().find(|g| g.name == name)
    }

    pub fn group_scales(&self) -> Vec<f32> {
        self.groups.iter().map(|g| g.scale).collect()
    }
}

struct Session {
    optimizer: AdamW,
    max_iterations: usize,
    report_interval: usize,
}

/// Stochastic-gradient variational EM over a fixed training set
pub struct VariationalEm {
    spec: MixedModelSpec,
    config: FitConfig,
    device: Device,
    varmap: VarMap,
    model: MixedModel,
    design: DesignTensors,
    likelihood: FixedGaussianLikelihood,
    rng: StdRng,
    session: Option<Session>,
    iteration: usize,
    /// updates applied over the engine's lifetime, across re-initializations
    num_updates: usize,
    trace: Vec<Diagnostics>,
}

impl VariationalEm {
    /// Validate the training data and build all parameters.
    ///
    /// Configuration errors (bad cardinalities, out-of-range indices,
    /// length mismatches, missing response) surface here, before any
    /// optimizer state exists.
    pub fn new(spec: &MixedModelSpec, train: &GroupedData, config: FitConfig) -> Result<Self> {
        spec.validate()?;
        let nn = train.validate(spec)?;
        let y = train.require_response()?;

        if config.num_samples == 0 {
            return Err(LmmError::config("num_samples must be positive"));
        }
        if !(config.learning_rate.is_finite() && config.learning_rate > 0.0) {
            return Err(LmmError::config(format!(
                "learning rate must be positive, got {}",
                config.learning_rate
            )));
        }
        if !(config.init_loc_std.is_finite() && config.init_loc_std >= 0.0) {
            return Err(LmmError::config("init_loc_std must be non-negative"));
        }

        let device = Device::Cpu;
        let design = train.to_design(&device)?;
        let likelihood =
            FixedGaussianLikelihood::unit_variance(Tensor::from_vec(y.to_vec(), nn, &device)?);

        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut varmap = VarMap::new();
        let init = ParamInit {
            loc_std: config.init_loc_std,
            ln_scale: config.init_ln_scale,
        };
        let model = MixedModel::new(spec, &mut varmap, init, &mut rng, &device)?;

        info!(
            "mixed model: {} observations, {} fixed covariates, groups {:?}",
            nn,
            spec.num_fixed,
            spec.groups
                .iter()
                .map(|g| format!("{}({})", g.name, g.size))
                .collect::<Vec<_>>()
        );

        Ok(Self {
            spec: spec.clone(),
            config,
            device,
            varmap,
            model,
            design,
            likelihood,
            rng,
            session: None,
            iteration: 0,
            num_updates: 0,
            trace: vec![],
        })
    }

    /// Set the iteration budget and logging cadence, and allocate fresh
    /// Adam moments for every parameter.
    ///
    /// Calling it again resets the optimizer, the iteration counter and the
    /// diagnostics trace. Parameter values and the noise stream carry over.
    pub fn initialize(&mut self, max_iterations: usize, report_interval: usize) -> Result<()> {
        if max_iterations == 0 || report_interval == 0 {
            return Err(LmmError::config(format!(
                "max_iterations ({}) and report_interval ({}) must be positive",
                max_iterations, report_interval
            )));
        }

        let params = ParamsAdamW {
            lr: self.config.learning_rate,
            weight_decay: 0.0,
            ..Default::default()
        };
        let optimizer = AdamW::new(self.varmap.all_vars(), params)?;

        self.session = Some(Session {
            optimizer,
            max_iterations,
            report_interval,
        });
        self.iteration = 0;
        self.trace.clear();

        debug!(
            "initialized: {} iterations, lr = {}, {} draw(s) per step",
            max_iterations, self.config.learning_rate, self.config.num_samples
        );
        Ok(())
    }

    pub fn state(&self) -> EngineState {
        match self.session.as_ref() {
            None => EngineState::Uninitialized,
            Some(_) if self.iteration == 0 => EngineState::Initialized,
            Some(s) if self.iteration < s.max_iterations => EngineState::Stepping,
            Some(_) => EngineState::Done,
        }
    }

    /// One variational EM step over the full training set.
    ///
    /// A non-finite loss or gradient leaves the parameters untouched; the
    /// step still counts and its record is returned and traced.
    pub fn step(&mut self) -> Result<Diagnostics> {
        let (max_iterations, report_interval) = match self.session.as_ref() {
            None => return Err(LmmError::sequencing("step() called before initialize()")),
            Some(s) => (s.max_iterations, s.report_interval),
        };
        if self.iteration >= max_iterations {
            return Err(LmmError::sequencing(format!(
                "iteration budget of {} exhausted; call initialize() to continue",
                max_iterations
            )));
        }

        let epsilon = self.draw_noise(self.config.num_samples)?;
        let loss = direct_elbo_loss(&self.model, &self.design, &self.likelihood, &epsilon)?;
        let loss_val = loss.to_scalar::<f32>()?;

        let status = if !loss_val.is_finite() {
            StepStatus::NonFiniteLoss
        } else {
            let grads = loss.backward()?;
            if !all_finite(&self.varmap, &grads)? {
                StepStatus::NonFiniteGradient
            } else {
                if let Some(session) = self.session.as_mut() {
                    session.optimizer.step(&grads)?;
                }
                self.num_updates += 1;
                StepStatus::Updated
            }
        };

        self.iteration += 1;

        let diag = Diagnostics {
            iteration: self.iteration,
            loss: loss_val,
            status,
        };

        match status {
            StepStatus::Updated => {
                if self.iteration % report_interval == 0 || self.iteration == max_iterations {
                    info!(
                        "iter {:5}/{}: loss = {:12.4}",
                        self.iteration, max_iterations, loss_val
                    );
                }
            }
            _ => warn!(
                "iter {:5}/{}: {:?} (loss = {}), parameters not updated",
                self.iteration, max_iterations, status, loss_val
            ),
        }

        self.trace.push(diag);
        Ok(diag)
    }

    /// Step until the budget is exhausted and return the trace.
    pub fn run(&mut self) -> Result<&[Diagnostics]> {
        while self.state() != EngineState::Done {
            self.step()?;
        }
        Ok(&self.trace)
    }

    /// Current parameter values.
    ///
    /// Before the first step these are the initial values, which are fully
    /// determined by `FitConfig::seed`.
    pub fn current_estimates(&self) -> Result<Estimates> {
        let groups = self
            .model
            .random
            .iter()
            .map(|effect| -> Result<GroupEstimate> {
                Ok(GroupEstimate {
                    name: effect.name.clone(),
                    scale: effect.prior.scale()?,
                    loc: effect.variational.mean()?.to_vec1::<f32>()?,
                    std: effect.variational.std()?.to_vec1::<f32>()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Estimates {
            iteration: self.iteration,
            intercept: self.model.fixed.intercept()?,
            coef: self.model.fixed.coef()?,
            groups,
        })
    }

    /// Monte Carlo ELBO with `num_samples` draws, for monitoring only.
    ///
    /// Consumes draws from the engine's noise stream.
    pub fn evaluate_elbo(&mut self, num_samples: usize) -> Result<f32> {
        if num_samples == 0 {
            return Err(LmmError::config("num_samples must be positive"));
        }
        let epsilon = self.draw_noise(num_samples)?;
        Ok(compute_elbo(
            &self.model,
            &self.design,
            &self.likelihood,
            &epsilon,
        )?)
    }

    /// Predict held-out responses from the current estimates.
    pub fn predict(&self, held_out: &GroupedData) -> Result<Prediction> {
        if self.num_updates == 0 {
            return Err(LmmError::sequencing(
                "model not yet fitted; no step has updated the parameters",
            ));
        }
        predict(&self.current_estimates()?, &self.spec, held_out)
    }

    pub fn diagnostics(&self) -> &[Diagnostics] {
        &self.trace
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn spec(&self) -> &MixedModelSpec {
        &self.spec
    }

    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    fn draw_noise(&mut self, num_samples: usize) -> Result<Vec<Tensor>> {
        let sizes = self.spec.group_sizes();
        let epsilon = sizes
            .into_iter()
            .map(|m| randn_tensor(&mut self.rng, num_samples, m, &self.device))
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(epsilon)
    }
}

fn all_finite(varmap: &VarMap, grads: &GradStore) -> candle_core::Result<bool> {
    for var in varmap.all_vars() {
        if let Some(grad) = grads.get(var.as_tensor()) {
            if !grad.sum_all()?.to_scalar::<f32>()?.is_finite() {
                return Ok(false);
            }
        }
    }
    Ok(true)
}
